#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use community_cache::application::services::{TallyCache, VoteService};
use community_cache::domain::entities::{
    ChoiceCount, CollectionId, MemberRecord, MembershipStatus, NewVote, Poll, PollStatus, Vote,
    VoterKey,
};
use community_cache::domain::repositories::{
    MembershipRepository, PollRepository, VoteRepository,
};
use community_cache::error::AppError;
use community_cache::infrastructure::bus::{
    ConsumerSettings, InvalidationBus, MemoryBroker, spawn_consumer,
};
use community_cache::infrastructure::cache::{CacheStore, MemoryBackend};

/// In-memory membership table.
#[derive(Default)]
pub struct FakeMembershipRepository {
    rows: Mutex<Vec<(CollectionId, MemberRecord)>>,
    pub find_calls: AtomicUsize,
}

impl FakeMembershipRepository {
    pub fn upsert(&self, collection: CollectionId, record: MemberRecord) {
        let mut rows = self.rows.lock().unwrap();
        rows.retain(|(c, r)| !(*c == collection && r.member_id == record.member_id));
        rows.push((collection, record));
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MembershipRepository for FakeMembershipRepository {
    async fn find_members(
        &self,
        collection: CollectionId,
        status: MembershipStatus,
    ) -> Result<Vec<MemberRecord>, AppError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        let mut members: Vec<MemberRecord> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, r)| *c == collection && r.status == status)
            .map(|(_, r)| r.clone())
            .collect();
        members.sort_by_key(|m| m.member_id);
        Ok(members)
    }

    async fn find_member(
        &self,
        collection: CollectionId,
        member_id: i64,
    ) -> Result<Option<MemberRecord>, AppError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|(c, r)| *c == collection && r.member_id == member_id)
            .map(|(_, r)| r.clone()))
    }

    async fn count_members(
        &self,
        collection: CollectionId,
        status: MembershipStatus,
    ) -> Result<i64, AppError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, r)| *c == collection && r.status == status)
            .count() as i64)
    }
}

/// In-memory poll table.
#[derive(Default)]
pub struct FakePollRepository {
    polls: Mutex<HashMap<i64, Poll>>,
}

impl FakePollRepository {
    pub fn with_open_poll(id: i64, options: &[&str]) -> Self {
        let repo = Self::default();
        repo.polls.lock().unwrap().insert(
            id,
            Poll::new(
                id,
                "Question?",
                options.iter().map(|o| o.to_string()).collect(),
                PollStatus::Open,
                Utc::now(),
            ),
        );
        repo
    }

    pub fn is_open(&self, poll_id: i64) -> bool {
        self.polls
            .lock()
            .unwrap()
            .get(&poll_id)
            .is_some_and(|poll| poll.status == PollStatus::Open)
    }
}

#[async_trait]
impl PollRepository for FakePollRepository {
    async fn find_by_id(&self, poll_id: i64) -> Result<Option<Poll>, AppError> {
        Ok(self.polls.lock().unwrap().get(&poll_id).cloned())
    }

    async fn close(&self, poll_id: i64) -> Result<bool, AppError> {
        let mut polls = self.polls.lock().unwrap();
        match polls.get_mut(&poll_id) {
            Some(poll) if poll.status == PollStatus::Open => {
                poll.status = PollStatus::Closed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// In-memory vote table with a unique `(poll, voter)` constraint.
///
/// When built with [`FakeVoteRepository::backed_by`], inserts are refused for
/// polls that are not open, like the conditional insert in PostgreSQL.
#[derive(Default)]
pub struct FakeVoteRepository {
    votes: Mutex<Vec<Vote>>,
    next_id: AtomicI64,
    polls: Option<Arc<FakePollRepository>>,
    pub count_calls: AtomicUsize,
}

impl FakeVoteRepository {
    pub fn backed_by(polls: Arc<FakePollRepository>) -> Self {
        Self {
            polls: Some(polls),
            ..Self::default()
        }
    }

    /// Inserts rows as if they were cast before any cache existed.
    pub fn seed(&self, poll_id: i64, choice: &str, n: usize) {
        let mut votes = self.votes.lock().unwrap();
        for _ in 0..n {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            votes.push(Vote {
                id,
                poll_id,
                voter: VoterKey::User(1_000_000 + id),
                choice: choice.to_string(),
                created_at: Utc::now(),
            });
        }
    }

    pub fn rows_for(&self, poll_id: i64) -> usize {
        self.votes
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.poll_id == poll_id)
            .count()
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoteRepository for FakeVoteRepository {
    async fn insert_vote(&self, new_vote: NewVote) -> Result<Vote, AppError> {
        let mut votes = self.votes.lock().unwrap();
        if let Some(polls) = &self.polls
            && !polls.is_open(new_vote.poll_id)
        {
            return Err(AppError::bad_request(
                "Poll is closed",
                json!({ "poll_id": new_vote.poll_id }),
            ));
        }
        if votes
            .iter()
            .any(|v| v.poll_id == new_vote.poll_id && v.voter == new_vote.voter)
        {
            return Err(AppError::conflict(
                "Voter already voted on this poll",
                json!({ "poll_id": new_vote.poll_id }),
            ));
        }
        let vote = Vote {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            poll_id: new_vote.poll_id,
            voter: new_vote.voter,
            choice: new_vote.choice,
            created_at: Utc::now(),
        };
        votes.push(vote.clone());
        Ok(vote)
    }

    async fn find_choice(
        &self,
        poll_id: i64,
        voter: VoterKey,
    ) -> Result<Option<String>, AppError> {
        Ok(self
            .votes
            .lock()
            .unwrap()
            .iter()
            .find(|v| v.poll_id == poll_id && v.voter == voter)
            .map(|v| v.choice.clone()))
    }

    async fn count_by_choice(&self, poll_ids: &[i64]) -> Result<Vec<ChoiceCount>, AppError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        let mut counts: HashMap<(i64, String), i64> = HashMap::new();
        for vote in self.votes.lock().unwrap().iter() {
            if poll_ids.contains(&vote.poll_id) {
                *counts.entry((vote.poll_id, vote.choice.clone())).or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|((poll_id, choice), count)| ChoiceCount {
                poll_id,
                choice,
                count,
            })
            .collect())
    }
}

pub async fn create_test_poll(pool: &PgPool, options: &[&str]) -> i64 {
    let options: Vec<String> = options.iter().map(|o| o.to_string()).collect();
    sqlx::query_scalar::<_, i64>("INSERT INTO polls (question, options) VALUES ($1, $2) RETURNING id")
        .bind("Question?")
        .bind(options)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn create_test_membership(
    pool: &PgPool,
    collection: CollectionId,
    member_id: i64,
    status: MembershipStatus,
) {
    sqlx::query(
        "INSERT INTO memberships (collection_kind, collection_id, member_id, status) VALUES ($1, $2, $3, $4)",
    )
    .bind(collection.kind.as_str())
    .bind(collection.owner_id)
    .bind(member_id)
    .bind(status.as_str())
    .execute(pool)
    .await
    .unwrap();
}

pub fn member(member_id: i64, status: MembershipStatus) -> MemberRecord {
    MemberRecord::new(member_id, status, "member", Utc::now())
}

/// One simulated API process: its own cache store, bus handle and consumer.
pub struct Process {
    pub backend: Arc<MemoryBackend>,
    pub store: Arc<CacheStore>,
    pub bus: InvalidationBus,
    shutdown: watch::Sender<bool>,
    consumer: JoinHandle<()>,
}

impl Process {
    /// Starts a process bound to `broker` with the given topic bindings.
    pub async fn start(
        broker: &Arc<MemoryBroker>,
        backend: Arc<MemoryBackend>,
        bindings: &[&str],
    ) -> Self {
        let store = Arc::new(CacheStore::new(backend.clone(), 3600, 50));
        let bus = InvalidationBus::new(broker.clone());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let before = broker.queue_count();
        let consumer = spawn_consumer(
            bus.transport(),
            store.clone(),
            ConsumerSettings {
                bindings: bindings.iter().map(|b| b.to_string()).collect(),
                initial_backoff: Duration::from_millis(5),
                max_backoff: Duration::from_millis(50),
            },
            shutdown_rx,
        );
        wait_until(|| broker.queue_count() > before).await;
        Self {
            backend,
            store,
            bus,
            shutdown,
            consumer,
        }
    }

    pub fn vote_service<P: PollRepository>(
        &self,
        polls: Arc<P>,
        votes: Arc<FakeVoteRepository>,
    ) -> VoteService<P, FakeVoteRepository> {
        let tally = Arc::new(TallyCache::new(self.backend.clone(), votes.clone(), 3600));
        VoteService::new(polls, votes, tally, self.store.clone(), self.bus.clone())
    }

    pub async fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.consumer.await.unwrap();
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

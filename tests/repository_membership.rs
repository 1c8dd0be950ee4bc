mod common;

use community_cache::domain::entities::{CollectionId, MembershipStatus};
use community_cache::domain::repositories::MembershipRepository;
use community_cache::infrastructure::persistence::PgMembershipRepository;
use sqlx::PgPool;
use std::sync::Arc;

use common::create_test_membership;

#[sqlx::test]
async fn test_find_members_filters_collection_and_status(pool: PgPool) {
    let channel = CollectionId::channel_members(1);
    create_test_membership(&pool, channel, 3, MembershipStatus::Active).await;
    create_test_membership(&pool, channel, 1, MembershipStatus::Active).await;
    create_test_membership(&pool, channel, 2, MembershipStatus::Removed).await;
    create_test_membership(&pool, CollectionId::topic_members(1), 4, MembershipStatus::Active)
        .await;
    let repo = PgMembershipRepository::new(Arc::new(pool));

    let members = repo
        .find_members(channel, MembershipStatus::Active)
        .await
        .unwrap();

    let ids: Vec<i64> = members.iter().map(|m| m.member_id).collect();
    assert_eq!(ids, vec![1, 3]);
    assert!(members.iter().all(|m| m.status == MembershipStatus::Active));
    assert_eq!(members[0].role, "member");
}

#[sqlx::test]
async fn test_find_member_returns_any_status(pool: PgPool) {
    let requests = CollectionId::event_requests(9);
    create_test_membership(&pool, requests, 5, MembershipStatus::Active).await;
    let repo = PgMembershipRepository::new(Arc::new(pool));

    let found = repo.find_member(requests, 5).await.unwrap();
    let missing = repo.find_member(requests, 6).await.unwrap();

    assert_eq!(found.unwrap().status, MembershipStatus::Active);
    assert!(missing.is_none());
}

#[sqlx::test]
async fn test_count_members(pool: PgPool) {
    let requests = CollectionId::event_requests(2);
    for id in 1..=4 {
        create_test_membership(&pool, requests, id, MembershipStatus::Pending).await;
    }
    create_test_membership(&pool, requests, 5, MembershipStatus::Active).await;
    let repo = PgMembershipRepository::new(Arc::new(pool));

    assert_eq!(
        repo.count_members(requests, MembershipStatus::Pending)
            .await
            .unwrap(),
        4
    );
    assert_eq!(
        repo.count_members(CollectionId::event_requests(3), MembershipStatus::Pending)
            .await
            .unwrap(),
        0
    );
}

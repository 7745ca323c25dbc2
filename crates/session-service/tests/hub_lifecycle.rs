//! Integration tests for the room registry: creation on join, eviction when
//! the last admitted member leaves, and joins racing with eviction.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use session_service::session::{Hub, Role, RoomSettings};
use session_test_utils::TestIdentity;

/// Poll `condition` until it holds or a second passes.
async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_join_creates_room_once() {
    let hub = Hub::new(RoomSettings::default());
    let (alice, _alice_rx) = TestIdentity::new("alice").handle(8);
    let (bob, _bob_rx) = TestIdentity::new("bob").handle(8);

    let (room_a, role_a) = hub.join("standup", alice).await.unwrap();
    let (room_b, role_b) = hub.join("standup", bob).await.unwrap();

    assert_eq!(role_a, Role::Host);
    assert_eq!(role_b, Role::Waiting);
    assert!(Arc::ptr_eq(&room_a, &room_b));
    assert_eq!(hub.room_count(), 1);
    assert!(hub.contains("standup"));
}

#[tokio::test]
async fn test_rooms_are_independent() {
    let hub = Hub::new(RoomSettings::default());
    let (alice, _alice_rx) = TestIdentity::new("alice").handle(8);
    let (bob, _bob_rx) = TestIdentity::new("bob").handle(8);

    let (_, role_a) = hub.join("room-a", alice).await.unwrap();
    let (_, role_b) = hub.join("room-b", bob).await.unwrap();

    // Each is first in its own room
    assert_eq!(role_a, Role::Host);
    assert_eq!(role_b, Role::Host);
    assert_eq!(hub.room_count(), 2);
}

#[tokio::test]
async fn test_last_member_leaving_evicts_room() {
    let hub = Hub::new(RoomSettings::default());
    let (alice, _alice_rx) = TestIdentity::new("alice").handle(8);
    let (bob, _bob_rx) = TestIdentity::new("bob").handle(8);

    let (room, _) = hub.join("r1", alice.clone()).await.unwrap();
    hub.join("r1", bob.clone()).await.unwrap();
    room.route(
        &alice,
        serde_json::from_value(serde_json::json!({
            "event": "accept_waiting",
            "payload": {"clientId": "bob"}
        }))
        .unwrap(),
    )
    .await;
    assert_eq!(room.occupancy(), 2);

    room.disconnect(&alice).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(hub.contains("r1"), "bob is still in the room");

    room.disconnect(&bob).await;
    let observer = Arc::clone(&hub);
    wait_until(move || !observer.contains("r1")).await;

    assert!(room.is_evicted());
    assert_eq!(hub.room_count(), 0);
}

#[tokio::test]
async fn test_join_after_eviction_gets_fresh_room() {
    let hub = Hub::new(RoomSettings::default());
    let (alice, _alice_rx) = TestIdentity::new("alice").handle(8);

    let (old_room, _) = hub.join("r1", alice.clone()).await.unwrap();
    old_room.disconnect(&alice).await;
    let observer = Arc::clone(&hub);
    wait_until(move || !observer.contains("r1")).await;

    let (carol, _carol_rx) = TestIdentity::new("carol").handle(8);
    let (new_room, role) = hub.join("r1", carol).await.unwrap();

    assert_eq!(role, Role::Host);
    assert!(!Arc::ptr_eq(&old_room, &new_room));
    assert!(old_room.is_evicted());
    assert!(!new_room.is_evicted());
}

#[tokio::test]
async fn test_evict_if_empty_keeps_occupied_rooms() {
    let hub = Hub::new(RoomSettings::default());
    let (alice, _alice_rx) = TestIdentity::new("alice").handle(8);

    hub.join("busy", alice).await.unwrap();
    hub.get_or_create("idle");

    assert!(!hub.evict_if_empty("busy"));
    assert!(hub.evict_if_empty("idle"));
    assert!(!hub.evict_if_empty("never-created"));
    assert!(hub.contains("busy"));
    assert!(!hub.contains("idle"));
}

#[tokio::test]
async fn test_host_leaving_with_only_waiting_clients_evicts_room() {
    let hub = Hub::new(RoomSettings::default());
    let (host, _host_rx) = TestIdentity::new("host").handle(8);
    let (guest, _guest_rx) = TestIdentity::new("guest").handle(8);

    let (room, _) = hub.join("r1", host.clone()).await.unwrap();
    hub.join("r1", guest.clone()).await.unwrap();

    room.disconnect(&host).await;
    let observer = Arc::clone(&hub);
    wait_until(move || !observer.contains("r1")).await;

    // The next joiner starts a new session and becomes its host
    let (next, _next_rx) = TestIdentity::new("next").handle(8);
    let (_, role) = hub.join("r1", next).await.unwrap();
    assert_eq!(role, Role::Host);

    // The stranded waiting client can still leave cleanly
    room.disconnect(&guest).await;
    assert!(!room.inspect(|s| s.is_tracked("guest")).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_and_leaves_settle_empty() {
    let hub = Hub::new(RoomSettings::default());

    let mut tasks = Vec::new();
    for n in 0..32 {
        let hub = Arc::clone(&hub);
        tasks.push(tokio::spawn(async move {
            let room_id = format!("room-{}", n % 4);
            let (client, _rx) = TestIdentity::new(&format!("user-{n}")).handle(8);
            let (room, _) = hub.join(&room_id, client.clone()).await.unwrap();
            tokio::task::yield_now().await;
            room.disconnect(&client).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let observer = Arc::clone(&hub);
    wait_until(move || observer.room_count() == 0).await;
}

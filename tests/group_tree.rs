//! Groups, their child lists and the account-level manager.

mod common;

use common::{until, Harness};
use live_mirror::{
    Group, GroupEvent, GroupInfo, GroupManager, Key, Level, LiveError, ManagerEvent, Method,
    MemberLookup,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

const ME: u64 = 7;

fn group(h: &Harness, info: serde_json::Value) -> Group {
    let info: GroupInfo = serde_json::from_value(info).unwrap();
    Group::new(h.client(ME), info, None).unwrap()
}

fn builders(h: &Harness) -> Group {
    group(
        h,
        json!({
            "id": 42,
            "name": "Builders",
            "servers": [{"id": 10, "name": "alpha"}, {"id": 11, "name": "beta"}],
        }),
    )
}

// =============================================================================
// MEMBER LISTS TESTS
// =============================================================================

#[tokio::test]
async fn test_find_member_by_id_or_name() {
    let h = Harness::new();
    h.api.respond(
        Method::Get,
        "groups/42/members?limit=1000",
        json!([{"user_id": 1, "username": "Alice"}, {"user_id": 2, "username": "bob"}]),
    );
    h.api.respond(
        Method::Get,
        "groups/42/members/5",
        json!({"user_id": 5, "username": "eve"}),
    );
    let group = builders(&h);
    let members = group.members();

    assert_eq!(members.find(1u64).await.unwrap().unwrap().username(), "Alice");
    assert_eq!(members.find("ALICE").await.unwrap().unwrap().user_id(), Key(1));
    assert_eq!(members.find("2").await.unwrap().unwrap().username(), "bob");
    assert!(members.find("nobody").await.unwrap().is_none());

    // Not in the bulk list: fetched on its own.
    assert_eq!(members.find(5u64).await.unwrap().unwrap().username(), "eve");
    assert_eq!(members.len(), 3);
    assert_eq!(h.api.calls_to("groups/42/members?limit=1000"), 1);
}

#[test]
fn test_lookup_from_text() {
    assert_eq!(MemberLookup::from("12"), MemberLookup::Id(Key(12)));
    assert_eq!(
        MemberLookup::from("Twelve"),
        MemberLookup::Name("Twelve".to_string())
    );
}

#[tokio::test]
async fn test_invite_list_has_no_single_fetch() {
    let h = Harness::new();
    h.api
        .respond(Method::Get, "groups/42/invites?limit=1000", json!([]));
    let group = builders(&h);

    assert!(group.invites().find(3u64).await.unwrap().is_none());
    assert_eq!(h.api.calls().len(), 1);
}

// =============================================================================
// GROUP EVENTS TESTS
// =============================================================================

#[tokio::test]
async fn test_child_changes_surface_as_group_events() {
    let h = Harness::new();
    h.api
        .respond(Method::Get, "groups/42/members?limit=1000", json!([]));
    h.api.respond(Method::Get, "groups/42/bans?limit=1000", json!([]));
    let group = builders(&h);
    group.members().refresh(true).await.unwrap();
    group.bans().refresh(true).await.unwrap();
    group.servers().refresh(true).await.unwrap();
    let handle = group.events().channel(16);

    h.bus
        .publish("group-member-create", 42u64, json!({"user_id": 3, "username": "cy"}))
        .await;
    h.bus
        .publish("group-member-update", 42u64, json!({"user_id": 3, "username": "Cy"}))
        .await;
    h.bus
        .publish("group-ban-create", 42u64, json!({"user_id": 4}))
        .await;
    h.bus
        .publish("group-server-delete", 42u64, json!({"id": 10}))
        .await;

    let events = handle.drain();
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], GroupEvent::MemberCreate(m) if m.username() == "cy"));
    assert!(matches!(&events[1], GroupEvent::BanCreate(m) if m.user_id() == Key(4)));
    assert!(matches!(&events[2], GroupEvent::ServerDelete(s) if s.id() == Key(10)));
    assert_eq!(group.members().cached(3u64).unwrap().username(), "Cy");
}

#[tokio::test]
async fn test_group_actions_hit_their_routes() {
    let h = Harness::new();
    h.api.respond(Method::Delete, "groups/42/members", json!(null));
    h.api.respond(Method::Post, "groups/42/invites/9", json!({"ok": true}));
    h.api.respond(Method::Patch, "groups/42", json!({"id": 42}));
    let group = builders(&h);

    group.leave().await.unwrap();
    group.invite(9).await.unwrap();
    group.edit_info(json!({"name": "Crafters"})).await.unwrap();

    let calls = h.api.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2].method, Method::Patch);
    assert_eq!(calls[2].body, Some(json!({"name": "Crafters"})));
}

// =============================================================================
// ONLINE SERVERS TESTS
// =============================================================================

#[tokio::test]
async fn test_watch_online_servers() {
    let h = Harness::new();
    h.api.respond(Method::Get, "servers/10", json!({"is_online": true}));
    h.api.respond(Method::Get, "servers/11", json!({"is_online": false}));
    let group = builders(&h);

    let online = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&online);
    group
        .watch_online_servers(move |server| sink.lock().push(server.id()))
        .await
        .unwrap();
    assert_eq!(*online.lock(), vec![Key(10)]);

    let status = |id: u64, up: bool| json!({"content": {"id": id, "is_online": up}});
    h.bus.publish("group-server-status", 42u64, status(11, true)).await;
    h.bus.publish("group-server-status", 42u64, status(10, true)).await;
    assert_eq!(*online.lock(), vec![Key(10), Key(11)]);

    // Only offline-to-online transitions are reported.
    h.bus.publish("group-server-status", 42u64, status(10, false)).await;
    h.bus.publish("group-server-status", 42u64, status(10, true)).await;
    assert_eq!(*online.lock(), vec![Key(10), Key(11), Key(10)]);

    let err = group.watch_online_servers(|_| {}).await.unwrap_err();
    assert!(matches!(err, LiveError::AlreadyEnabled(_)));
    assert_eq!(h.bus.subscribe_calls("group-server-status"), 1);
}

// =============================================================================
// MANAGER TESTS
// =============================================================================

fn joined(id: u64, name: &str) -> serde_json::Value {
    json!({"group": {"id": id, "name": name}, "member": {"user_id": ME, "username": "me"}})
}

#[tokio::test]
async fn test_manager_loads_and_fetches_groups() {
    let h = Harness::new();
    h.api.respond(
        Method::Get,
        "groups/joined?limit=1000",
        json!([joined(1, "One")]),
    );
    h.api.respond(Method::Get, "groups/2", json!({"id": 2, "name": "Two"}));
    h.api.respond(
        Method::Get,
        "groups/2/members/7",
        json!({"user_id": ME, "username": "me", "role": "owner"}),
    );
    let manager = GroupManager::new(h.client(ME));
    let handle = manager.events().channel(8);

    let groups = manager.refresh(true).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].member.as_ref().unwrap().username(), "me");

    // Groups are sparse: a missing one is fetched alone.
    let two = manager.get(2u64).await.unwrap().unwrap();
    assert_eq!(two.name(), "Two");
    assert_eq!(two.member.as_ref().unwrap().info.extra["role"], "owner");
    assert_eq!(h.api.calls_to("groups/joined?limit=1000"), 1);

    let events = handle.drain();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| matches!(e, ManagerEvent::Create(_))));
}

#[tokio::test]
async fn test_group_updates_reissue_the_group() {
    let h = Harness::new();
    h.api.respond(
        Method::Get,
        "groups/joined?limit=1000",
        json!([joined(1, "One")]),
    );
    h.api.respond(
        Method::Get,
        "groups/1",
        json!({"id": 1, "name": "One", "servers": []}),
    );
    let manager = GroupManager::new(h.client(ME));
    manager.refresh(true).await.unwrap();
    let original = manager.groups().cached(1u64).unwrap();
    manager.attach(&original).await.unwrap();
    manager.attach(&original).await.unwrap();
    assert_eq!(h.bus.subscriber_count("group-update", 1u64), 1);

    let manager_events = manager.events().channel(8);
    let group_events = original.events().channel(8);
    h.bus
        .publish("group-update", 1u64, json!({"id": 1, "name": "Renamed"}))
        .await;

    let current = manager.groups().cached(1u64).unwrap();
    assert_eq!(current.name(), "Renamed");
    assert!(current.same_group(&original));
    assert_eq!(current.member.as_ref().unwrap().username(), "me");
    assert!(matches!(
        manager_events.try_recv().unwrap(),
        ManagerEvent::Update(g) if g.name() == "Renamed"
    ));
    assert!(matches!(group_events.try_recv().unwrap(), GroupEvent::Update(_)));
}

#[tokio::test]
async fn test_leaving_a_group_disposes_it() {
    let h = Harness::new();
    h.api.respond(
        Method::Get,
        "groups/joined?limit=1000",
        json!([joined(1, "One")]),
    );
    h.api
        .respond(Method::Get, "groups/1", json!({"id": 1, "name": "One"}));
    let manager = GroupManager::new(h.client(ME));
    manager.refresh(true).await.unwrap();
    let group = manager.groups().cached(1u64).unwrap();
    manager.attach(&group).await.unwrap();
    group.watch_online_servers(|_| {}).await.unwrap();
    assert_eq!(h.bus.subscriber_count("group-server-status", 1u64), 1);
    let handle = manager.events().channel(8);

    h.bus
        .publish("me-group-delete", ME, json!({"group": {"id": 1}}))
        .await;

    assert!(manager.groups().is_empty());
    assert!(matches!(handle.try_recv().unwrap(), ManagerEvent::Delete(_)));
    until(|| h.bus.subscriber_count("group-update", 1u64) == 0).await;
    until(|| h.bus.subscriber_count("group-server-create", 1u64) == 0).await;
    until(|| h.bus.subscriber_count("group-server-status", 1u64) == 0).await;
    assert!(!group.servers().status_channel().is_live());
}

fn invites(h: &Harness, list: serde_json::Value) {
    h.api
        .respond(Method::Get, "groups/invites?limit=1000", list);
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_accept_all_invites() {
    let h = Harness::new();
    invites(
        &h,
        json!([{"id": 5, "name": "Five"}, {"id": 6, "name": "Six"}]),
    );
    h.api.respond(Method::Post, "groups/invites/5", json!({}));
    h.api.fail(Method::Post, "groups/invites/6", "expired");
    h.api.respond(Method::Post, "groups/invites/8", json!({}));
    let manager = GroupManager::new(h.client(ME));

    assert_eq!(manager.accept_all_invites(true).await.unwrap(), 1);
    assert_eq!(
        h.log
            .at(Level::Error)
            .iter()
            .filter(|line| line.message.contains("Six"))
            .count(),
        1
    );

    // Invites that arrive later are accepted as they come in.
    h.bus
        .publish("me-group-invite-create", ME, json!({"id": 8, "name": "Eight"}))
        .await;
    until(|| h.api.calls_to("groups/invites/8") == 1).await;

    // A second call retries failures only and adds no second listener.
    assert_eq!(manager.accept_all_invites(true).await.unwrap(), 0);
    assert_eq!(h.api.calls_to("groups/invites/5"), 1);
    assert_eq!(h.api.calls_to("groups/invites/6"), 2);
    assert_eq!(h.api.calls_to("groups/invites/8"), 1);
    assert_eq!(manager.invites().events().listener_count(), 1);

    // A re-issued invite is accepted again, once.
    h.bus
        .publish("me-group-invite-delete", ME, json!({"id": 8}))
        .await;
    h.bus
        .publish("me-group-invite-create", ME, json!({"id": 8, "name": "Eight"}))
        .await;
    until(|| h.api.calls_to("groups/invites/8") == 2).await;
    settle().await;
    assert_eq!(h.api.calls_to("groups/invites/8"), 2);
}

#[tokio::test]
async fn test_invite_arriving_during_accepts_is_accepted() {
    let h = Harness::new();
    invites(&h, json!([{"id": 5, "name": "Five"}]));
    h.api.respond(Method::Post, "groups/invites/5", json!({}));
    h.api.respond(Method::Post, "groups/invites/9", json!({}));
    let gate = h.api.pause("groups/invites/5");
    let manager = GroupManager::new(h.client(ME));

    let (accepted, _) = tokio::join!(manager.accept_all_invites(true), async {
        until(|| h.api.calls_to("groups/invites/5") == 1).await;
        h.bus
            .publish("me-group-invite-create", ME, json!({"id": 9, "name": "Nine"}))
            .await;
        gate.release();
    });

    assert_eq!(accepted.unwrap(), 1);
    assert!(manager.invites().cached(9u64).is_some());
    until(|| h.api.calls_to("groups/invites/9") == 1).await;
    settle().await;
    assert_eq!(h.api.calls_to("groups/invites/9"), 1);
    assert_eq!(h.api.calls_to("groups/invites/5"), 1);
}

#[tokio::test]
async fn test_accept_without_subscribe_leaves_no_listener() {
    let h = Harness::new();
    invites(&h, json!([{"id": 5, "name": "Five"}]));
    h.api.respond(Method::Post, "groups/invites/5", json!({}));
    let manager = GroupManager::new(h.client(ME));

    assert_eq!(manager.accept_all_invites(false).await.unwrap(), 1);

    assert_eq!(manager.invites().events().listener_count(), 0);
    assert!(!manager.invites().is_subscribed());
    assert_eq!(h.bus.subscribe_calls("me-group-invite-create"), 0);
}

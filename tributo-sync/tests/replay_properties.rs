//! Replay ordering, isolation and convergence.

use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;
use tributo_core::{payload_of, ChangeKind};
use tributo_storage::InMemoryStore;
use tributo_test_utils::{
    apply_ops, arb_offline_ops, sector, Harness, RemoteCall, Sector, SyncReport,
};

fn shape(items: &[Sector]) -> Vec<String> {
    let mut shapes: Vec<String> = items
        .iter()
        .map(|s| payload_of(s).unwrap().to_string())
        .collect();
    shapes.sort();
    shapes
}

#[tokio::test]
async fn test_failed_entry_is_retained_others_removed() {
    let harness = Harness::<Sector>::offline().await;
    for nombre in ["Uno", "Dos", "Tres"] {
        harness.gateway.create(json!({"nombre": nombre})).await.unwrap();
    }

    harness.remote.fail_mutation(2);
    harness.go_online().await;
    let report = harness.coordinator.sync_now("sector").await.unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert!(!report.skipped);

    let remaining = harness.gateway.pending_changes().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].kind, ChangeKind::Create);
    assert_eq!(remaining[0].payload, json!({"nombre": "Dos"}));

    let names: Vec<String> = harness.remote.records().into_iter().map(|s| s.nombre).collect();
    assert_eq!(names, vec!["Uno", "Tres"]);

    // The retained create stays visible after the refresh.
    let cached = harness.gateway.cached().unwrap();
    assert_eq!(cached.len(), 3);
    assert!(cached.iter().any(|s| s.id < 0 && s.nombre == "Dos"));

    let second = harness.coordinator.sync_now("sector").await.unwrap();
    assert_eq!(second.succeeded, 1);
    assert_eq!(harness.remote.records().len(), 3);
    assert_eq!(harness.pending(), 0);
}

#[tokio::test]
async fn test_dependent_entries_fail_with_their_create() {
    let harness = Harness::<Sector>::offline().await;
    let created = harness.gateway.create(json!({"nombre": "Uno"})).await.unwrap();
    harness
        .gateway
        .update(created.id, json!({"nombre": "Uno bis"}))
        .await
        .unwrap();

    harness.remote.fail_mutation(1);
    harness.go_online().await;
    let report = harness.coordinator.sync_now("sector").await.unwrap();

    // The update never reaches the backend: its target has no server id yet.
    assert_eq!(report, SyncReport { succeeded: 0, failed: 2, skipped: false });
    assert_eq!(harness.remote.mutation_calls().len(), 1);
    assert_eq!(harness.pending(), 2);

    let report = harness.coordinator.sync_now("sector").await.unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(harness.remote.records(), vec![sector(1, "Uno bis")]);
}

#[tokio::test]
async fn test_replay_order_ignores_storage_order() {
    let harness = Harness::<Sector>::offline().await;
    let a = harness.gateway.create(json!({"nombre": "A"})).await.unwrap();
    harness.gateway.update(a.id, json!({"nombre": "A2"})).await.unwrap();
    harness.gateway.create(json!({"nombre": "B"})).await.unwrap();

    let mut queue = harness.store.load_queue("sector").unwrap();
    queue.reverse();
    harness.store.save_queue("sector", &queue).unwrap();

    harness.go_online().await;
    let report = harness.coordinator.sync_now("sector").await.unwrap();
    assert_eq!(report.succeeded, 3);

    assert_eq!(
        harness.remote.mutation_calls(),
        vec![
            RemoteCall::Create(json!({"nombre": "A"})),
            RemoteCall::Update(1, json!({"nombre": "A2"})),
            RemoteCall::Create(json!({"nombre": "B"})),
        ]
    );
    assert_eq!(
        harness.remote.records(),
        vec![sector(1, "A2"), sector(2, "B")]
    );
}

#[tokio::test]
async fn test_interrupted_pass_does_not_resend_accepted_changes() {
    let harness = Harness::<Sector>::offline().await;
    let a = harness.gateway.create(json!({"nombre": "A"})).await.unwrap();
    harness.gateway.create(json!({"nombre": "B"})).await.unwrap();
    harness
        .gateway
        .update(a.id, json!({"nombre": "A2"}))
        .await
        .unwrap();

    // The backend accepts "A", then never answers the create of "B".
    harness.remote.stall_mutation(2);
    harness.go_online().await;
    let cut = tokio::time::timeout(Duration::from_millis(200), harness.gateway.replay()).await;
    assert!(cut.is_err());

    let remaining = harness.gateway.pending_changes().unwrap();
    assert_eq!(remaining.len(), 2);
    assert_eq!(remaining[0].kind, ChangeKind::Create);
    assert_eq!(remaining[0].payload, json!({"nombre": "B"}));
    // The update already points at the server id of "A".
    assert_eq!(remaining[1].kind, ChangeKind::Update);
    assert_eq!(remaining[1].target_id, Some(1));
    assert!(harness.gateway.cached().unwrap().iter().any(|s| s.id == 1));

    harness.remote.clear_calls();
    let report = harness.gateway.replay().await;
    assert_eq!(report, SyncReport { succeeded: 2, failed: 0, skipped: false });
    assert_eq!(
        harness.remote.mutation_calls(),
        vec![
            RemoteCall::Create(json!({"nombre": "B"})),
            RemoteCall::Update(1, json!({"nombre": "A2"})),
        ]
    );
    assert_eq!(harness.remote.records(), vec![sector(1, "A2"), sector(2, "B")]);
    assert_eq!(harness.pending(), 0);
}

#[tokio::test]
async fn test_second_pass_is_a_no_op() {
    let harness = Harness::<Sector>::offline().await;
    harness.gateway.create(json!({"nombre": "Centro"})).await.unwrap();

    harness.go_online().await;
    let first = harness.coordinator.sync_now("sector").await.unwrap();
    assert_eq!(first.succeeded, 1);

    harness.remote.clear_calls();
    let second = harness.coordinator.sync_now("sector").await.unwrap();
    assert_eq!(second, SyncReport::default());
    assert!(harness.remote.mutation_calls().is_empty());
    // The refresh still runs.
    assert_eq!(harness.remote.calls(), vec![RemoteCall::List]);
}

#[tokio::test]
async fn test_sync_all_covers_every_entity_type() {
    let harness = Harness::<Sector>::with_store(InMemoryStore::new(), 1);
    harness.go_offline().await;
    harness.gateway.create(json!({"nombre": "Centro"})).await.unwrap();
    harness.go_online().await;

    let reports = harness.coordinator.sync_all().await;
    assert_eq!(reports.len(), 1);
    assert_eq!(reports["sector"].succeeded, 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_replay_converges_to_local_state(ops in arb_offline_ops(24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let harness = Harness::<Sector>::offline().await;
            apply_ops(&harness.gateway, &ops).await.unwrap();
            let local = harness.gateway.cached().unwrap();

            harness.go_online().await;
            let report = harness.coordinator.sync_now("sector").await.unwrap();

            assert_eq!(report.failed, 0);
            assert_eq!(harness.pending(), 0);
            assert_eq!(shape(&harness.remote.records()), shape(&local));
            assert_eq!(shape(&harness.gateway.cached().unwrap()), shape(&local));

            let again = harness.coordinator.sync_now("sector").await.unwrap();
            assert_eq!(again, SyncReport::default());
        });
    }
}

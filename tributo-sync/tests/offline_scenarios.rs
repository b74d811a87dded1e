//! End-to-end offline behaviour of an entity gateway and its replay.

use std::time::Duration;

use serde_json::json;
use tributo_core::{ChangeKind, EntityError, TributoError};
use tributo_storage::{InMemoryStore, KeyValueStore};
use tributo_test_utils::{sector, Harness, RemoteCall, Sector, SyncReport};

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_offline_create_is_cached_and_queued() {
    let harness = Harness::<Sector>::offline().await;

    let created = harness
        .gateway
        .create(json!({"nombre": "Sector X"}))
        .await
        .unwrap();

    assert!(created.id < 0);
    assert_eq!(created.nombre, "Sector X");

    let queue = harness.store.load_queue("sector").unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].kind, ChangeKind::Create);
    assert_eq!(queue[0].temporary_id, Some(created.id));

    let cache = harness.store.load_cache::<Sector>().unwrap().unwrap();
    assert_eq!(cache, vec![created]);
    assert!(harness.raw_store.get("sector_cache").unwrap().is_some());
    assert!(harness.remote.calls().is_empty());
}

#[tokio::test]
async fn test_reconnect_replays_create_and_adopts_server_id() {
    let harness = Harness::<Sector>::with_store(InMemoryStore::new(), 42);
    harness.go_offline().await;
    harness
        .gateway
        .create(json!({"nombre": "Sector X"}))
        .await
        .unwrap();

    harness.coordinator.attach();
    assert!(harness.go_online().await);
    assert!(harness.wait_for_pending(0, WAIT).await);

    // Waits for the replay pass to release the gateway.
    let loaded = harness.gateway.load().await.unwrap();
    assert_eq!(loaded, vec![sector(42, "Sector X")]);
    assert_eq!(harness.gateway.cached().unwrap(), vec![sector(42, "Sector X")]);
    assert!(harness.raw_store.get("pending_sector_changes").unwrap().is_none());
}

#[tokio::test]
async fn test_successive_offline_edits_replay_in_order() {
    let harness = Harness::<Sector>::with_store(InMemoryStore::new(), 1);
    harness.remote.seed([sector(1, "Centro")]);
    harness.go_online().await;
    harness.gateway.load().await.unwrap();

    harness.go_offline().await;
    harness.gateway.update(1, json!({"nombre": "A"})).await.unwrap();
    harness.gateway.update(1, json!({"nombre": "B"})).await.unwrap();
    assert_eq!(harness.gateway.cached().unwrap(), vec![sector(1, "B")]);

    harness.go_online().await;
    harness.remote.clear_calls();
    let report = harness.coordinator.sync_now("sector").await.unwrap();

    assert_eq!(
        report,
        SyncReport {
            succeeded: 2,
            failed: 0,
            skipped: false
        }
    );
    assert_eq!(
        harness.remote.mutation_calls(),
        vec![
            RemoteCall::Update(1, json!({"nombre": "A"})),
            RemoteCall::Update(1, json!({"nombre": "B"})),
        ]
    );
    assert_eq!(harness.gateway.cached().unwrap(), vec![sector(1, "B")]);
    assert_eq!(harness.remote.record(1), Some(sector(1, "B")));
}

#[tokio::test]
async fn test_offline_update_of_unknown_id_is_rejected() {
    let harness = Harness::<Sector>::offline().await;

    let err = harness
        .gateway
        .update(99, json!({"nombre": "Nada"}))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TributoError::Entity(EntityError::NotFound { id: 99, .. })
    ));
    assert_eq!(harness.pending(), 0);
}

#[tokio::test]
async fn test_offline_delete_removes_from_cache() {
    let harness = Harness::<Sector>::with_store(InMemoryStore::new(), 1);
    harness.remote.seed([sector(1, "Centro"), sector(2, "Norte")]);
    harness.go_online().await;
    harness.gateway.load().await.unwrap();

    harness.go_offline().await;
    harness.gateway.delete(2).await.unwrap();
    assert_eq!(harness.gateway.cached().unwrap(), vec![sector(1, "Centro")]);
    assert_eq!(harness.pending(), 1);

    harness.go_online().await;
    let report = harness.coordinator.sync_now("sector").await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(harness.remote.records(), vec![sector(1, "Centro")]);
}

#[tokio::test]
async fn test_remote_failure_falls_back_offline() {
    let harness = Harness::<Sector>::online().await;
    // Probe still says reachable, the call itself fails.
    harness.remote.set_offline(true);

    let created = harness
        .gateway
        .create(json!({"nombre": "Sur"}))
        .await
        .unwrap();

    assert_eq!(created.id, -1);
    assert_eq!(harness.pending(), 1);
    assert!(!harness.monitor.is_available("sector"));
    let record = harness.monitor.status("sector").unwrap();
    assert!(record.last_error().is_some());
}

#[tokio::test]
async fn test_online_update_and_delete_write_through() {
    let harness = Harness::<Sector>::online().await;
    harness.remote.seed([sector(1, "Centro"), sector(2, "Norte")]);
    harness.gateway.load().await.unwrap();

    let updated = harness
        .gateway
        .update(1, json!({"nombre": "Centro Historico"}))
        .await
        .unwrap();
    assert_eq!(updated, sector(1, "Centro Historico"));
    harness.gateway.delete(2).await.unwrap();

    assert_eq!(harness.pending(), 0);
    assert_eq!(harness.gateway.cached().unwrap(), vec![sector(1, "Centro Historico")]);
    assert_eq!(harness.remote.records(), vec![sector(1, "Centro Historico")]);
}

#[tokio::test]
async fn test_update_failing_in_flight_is_queued() {
    let harness = Harness::<Sector>::online().await;
    harness.remote.seed([sector(1, "Centro")]);
    harness.gateway.load().await.unwrap();
    harness.remote.set_offline(true);

    let updated = harness
        .gateway
        .update(1, json!({"descripcion": "casco viejo"}))
        .await
        .unwrap();

    assert_eq!(updated.id, 1);
    assert_eq!(updated.nombre, "Centro");
    assert_eq!(updated.descripcion.as_deref(), Some("casco viejo"));
    assert_eq!(harness.gateway.cached().unwrap(), vec![updated]);
    let queue = harness.gateway.pending_changes().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].kind, ChangeKind::Update);
    assert_eq!(queue[0].target_id, Some(1));
    assert!(!harness.monitor.is_available("sector"));
}

#[tokio::test]
async fn test_delete_failing_in_flight_is_queued() {
    let harness = Harness::<Sector>::online().await;
    harness.remote.seed([sector(1, "Centro"), sector(2, "Norte")]);
    harness.gateway.load().await.unwrap();
    harness.remote.set_offline(true);

    harness.gateway.delete(2).await.unwrap();

    assert_eq!(harness.gateway.cached().unwrap(), vec![sector(1, "Centro")]);
    let queue = harness.gateway.pending_changes().unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].kind, ChangeKind::Delete);
    assert_eq!(queue[0].target_id, Some(2));
    assert!(!harness.monitor.is_available("sector"));

    harness.go_online().await;
    let report = harness.coordinator.sync_now("sector").await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(harness.remote.records(), vec![sector(1, "Centro")]);
}

#[tokio::test]
async fn test_load_failing_in_flight_serves_cache() {
    let harness = Harness::<Sector>::online().await;
    harness.remote.seed([sector(1, "Centro")]);
    let fresh = harness.gateway.load().await.unwrap();
    harness.remote.set_offline(true);

    let served = harness.gateway.load().await.unwrap();
    assert_eq!(served, fresh);
    assert_eq!(harness.pending(), 0);
    assert!(!harness.monitor.is_available("sector"));
    assert!(harness.monitor.status("sector").unwrap().last_error().is_some());
}

#[tokio::test]
async fn test_load_serves_cache_while_offline() {
    let harness = Harness::<Sector>::with_store(InMemoryStore::new(), 1);
    harness.remote.seed([sector(1, "Centro"), sector(2, "Norte")]);
    harness.go_online().await;
    let online = harness.gateway.load().await.unwrap();

    harness.go_offline().await;
    let offline = harness.gateway.load().await.unwrap();
    assert_eq!(online, offline);
}

#[tokio::test]
async fn test_edits_on_temporary_ids_follow_the_create() {
    let harness = Harness::<Sector>::with_store(InMemoryStore::new(), 10);
    harness.go_offline().await;

    let a = harness.gateway.create(json!({"nombre": "A"})).await.unwrap();
    let b = harness.gateway.create(json!({"nombre": "B"})).await.unwrap();
    assert_eq!((a.id, b.id), (-1, -2));

    harness
        .gateway
        .update(a.id, json!({"descripcion": "renombrado"}))
        .await
        .unwrap();
    harness.gateway.delete(b.id).await.unwrap();
    assert_eq!(harness.pending(), 4);

    harness.go_online().await;
    let report = harness.coordinator.sync_now("sector").await.unwrap();
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed, 0);

    assert_eq!(
        harness.remote.mutation_calls(),
        vec![
            RemoteCall::Create(json!({"nombre": "A"})),
            RemoteCall::Create(json!({"nombre": "B"})),
            RemoteCall::Update(10, json!({"descripcion": "renombrado"})),
            RemoteCall::Delete(11),
        ]
    );
    let cached = harness.gateway.cached().unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].id, 10);
    assert_eq!(cached[0].descripcion.as_deref(), Some("renombrado"));
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let raw = InMemoryStore::new();
    {
        let first = Harness::<Sector>::with_store(raw.clone(), 1);
        first.go_offline().await;
        first
            .gateway
            .create(json!({"nombre": "Persistente"}))
            .await
            .unwrap();
    }

    let second = Harness::<Sector>::with_store(raw, 7);
    assert_eq!(second.pending(), 1);
    assert_eq!(second.gateway.cached().unwrap()[0].nombre, "Persistente");

    // Already reachable when the coordinator attaches: the subscription call
    // itself starts the pass.
    second.go_online().await;
    second.coordinator.attach();
    assert!(second.wait_for_pending(0, WAIT).await);
    second.gateway.load().await.unwrap();
    assert_eq!(second.gateway.cached().unwrap(), vec![sector(7, "Persistente")]);
}

#[tokio::test]
async fn test_corrupt_queue_is_discarded() {
    let harness = Harness::<Sector>::offline().await;
    harness
        .raw_store
        .set("pending_sector_changes", "[{\"kind\":")
        .unwrap();

    assert_eq!(harness.pending(), 0);
    assert!(harness.raw_store.get("pending_sector_changes").unwrap().is_none());

    // The gateway keeps working on a fresh queue.
    harness.gateway.create(json!({"nombre": "Nuevo"})).await.unwrap();
    assert_eq!(harness.pending(), 1);
}

#[tokio::test]
async fn test_invalid_payload_queues_nothing() {
    let harness = Harness::<Sector>::offline().await;
    let err = harness.gateway.create(json!(["no", "objeto"])).await.unwrap_err();
    assert!(matches!(
        err,
        TributoError::Entity(EntityError::PayloadNotObject { .. })
    ));
    assert_eq!(harness.pending(), 0);
    assert!(harness.gateway.cached().unwrap().is_empty());
}

use std::time::Duration;

use serde_json::json;
use syncgate_core::{AccessError, ErrorKind};

use super::SyncCoordinator;
use super::harness::{FakeAccess, ScriptedIndex, dir_entry, file_entry, test_config};
use crate::config::EngineConfig;
use crate::events::TransferEvent;

fn engine_with(
    index: &ScriptedIndex,
    access: &FakeAccess,
    config: EngineConfig,
) -> SyncCoordinator {
    SyncCoordinator::with_config(access.as_access(), index.as_index(), config)
}

#[tokio::test(start_paused = true)]
async fn gather_reports_malformed_entries_as_partial_success() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());

    for n in 0..7 {
        index.put(file_entry(&format!("Docs/file-{n}.txt"), "not_downloaded"));
    }
    index.put_invalid(json!({ "size": 12 }));
    index.put_invalid(json!({ "path": 99 }));
    index.put_invalid(json!("not an object"));

    let listing = engine.gather("/").await.unwrap();
    assert_eq!(listing.items.len(), 7);
    assert_eq!(listing.invalid.len(), 3);
    assert!(listing.items.windows(2).all(|w| w[0].path <= w[1].path));
    assert!(listing.invalid[0].reason.contains("path"));
    assert_eq!(index.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn gather_scopes_to_the_requested_subtree() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    index.put(file_entry("Docs/A.txt", "not_downloaded"));
    index.put(file_entry("Docs/sub/B.txt", "current"));
    index.put(file_entry("Other/C.txt", "current"));

    let listing = engine.gather("/Docs").await.unwrap();
    let paths: Vec<_> = listing.items.iter().map(|item| item.path.as_str()).collect();
    assert_eq!(paths, vec!["Docs/A.txt", "Docs/sub/B.txt"]);
}

#[tokio::test(start_paused = true)]
async fn live_gather_reemits_and_cancel_stops_updates() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    index.put(file_entry("Docs/A.txt", "not_downloaded"));

    let mut stream = engine.gather_live("Docs").await.unwrap();
    let initial = stream.take_initial().unwrap();
    assert_eq!(initial.items.len(), 1);

    index.put(file_entry("Docs/B.txt", "not_downloaded"));
    let update = stream.next().await.unwrap();
    assert_eq!(update.items.len(), 2);

    stream.cancel();
    assert_eq!(index.active(), 0);
    assert_eq!(engine.active_operations(), 0);

    index.put(file_entry("Docs/C.txt", "not_downloaded"));
    assert!(stream.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn dropping_a_live_gather_still_releases_the_query() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    index.put(file_entry("Docs/A.txt", "not_downloaded"));

    let stream = engine.gather_live("Docs").await.unwrap();
    assert_eq!(index.active(), 1);
    drop(stream);
    assert_eq!(index.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn gather_times_out_when_the_initial_snapshot_never_arrives() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let config = EngineConfig {
        idle_interval: Duration::from_secs(5),
        ..test_config()
    };
    let engine = engine_with(&index, &access, config);
    index.suppress_initial();

    let err = engine.gather("/").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(index.started(), 1);
    assert_eq!(index.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn delete_resolves_remote_only_sources_through_the_index() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    index.put(file_entry("Docs/cloud-only.txt", "not_downloaded"));

    engine.delete("Docs/cloud-only.txt").await.unwrap();
    assert_eq!(access.removed(), vec!["Docs/cloud-only.txt".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn delete_of_an_unknown_path_is_not_found() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());

    let err = engine.delete("Docs/missing.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(access.removed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn move_and_copy_pass_normalized_paths_to_the_primitive() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    index.put(file_entry("Docs/A.txt", "current"));

    engine.move_item("/Docs/A.txt", "/Docs/B.txt").await.unwrap();
    assert_eq!(
        access.moved(),
        vec![("Docs/A.txt".to_string(), "Docs/B.txt".to_string())]
    );

    index.put(file_entry("Docs/B.txt", "current"));
    engine.copy_item("/Docs/B.txt", "/Docs/C.txt").await.unwrap();
    assert_eq!(
        access.copied(),
        vec![("Docs/B.txt".to_string(), "Docs/C.txt".to_string())]
    );

    let err = engine.move_item("Docs/ghost.txt", "Docs/D.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test(start_paused = true)]
async fn mutation_failures_surface_as_native_with_cause() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    index.put(file_entry("Docs/A.txt", "current"));
    access.script_structural(Err(AccessError::Backend {
        operation: "remove",
        message: "device busy".into(),
    }));

    let err = engine.delete("Docs/A.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NativeFailure);
    assert!(err.to_string().contains("device busy"));
}

#[tokio::test(start_paused = true)]
async fn directories_count_as_locally_available() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    index.put(dir_entry("Docs"));

    assert!(engine.exists("Docs").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn transfers_are_consumable_as_a_stream() {
    use futures_util::StreamExt;

    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    index.put(file_entry("Docs/A.txt", "current"));

    let transfer = engine.start_download("Docs/A.txt").await.unwrap();
    let events: Vec<TransferEvent> = transfer.collect().await;
    assert_eq!(events.last(), Some(&TransferEvent::Done));
    assert_eq!(
        events.iter().filter(|event| event.is_terminal()).count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn every_started_query_is_stopped_across_mixed_outcomes() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let config = EngineConfig {
        idle_interval: Duration::from_secs(5),
        max_attempts: 1,
        ..test_config()
    };
    let engine = engine_with(&index, &access, config);

    // success
    index.put(file_entry("Docs/ok.txt", "current"));
    engine.download("Docs/ok.txt").await.unwrap();

    // classified failure
    index.put(file_entry("Docs/bad.txt", "current"));
    access.script_open("Docs/bad.txt", Err(AccessError::NotFound("Docs/bad.txt".into())));
    assert!(engine.download("Docs/bad.txt").await.is_err());

    // timeout with retries exhausted
    index.put(file_entry("Docs/stuck.txt", "not_downloaded"));
    assert_eq!(
        engine.download("Docs/stuck.txt").await.unwrap_err().kind(),
        ErrorKind::Timeout
    );

    // caller cancellation
    index.put(file_entry("Docs/cancelled.txt", "not_downloaded"));
    let transfer = engine.start_download("Docs/cancelled.txt").await.unwrap();
    transfer.cancel();

    // listings, one-shot and live
    engine.gather("/").await.unwrap();
    let mut stream = engine.gather_live("/Docs").await.unwrap();
    stream.cancel();

    assert!(index.started() >= 6);
    assert_eq!(index.started(), index.stopped());
    assert_eq!(index.active(), 0);
    assert_eq!(engine.active_operations(), 0);
}

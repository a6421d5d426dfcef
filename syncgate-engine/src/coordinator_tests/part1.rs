use std::time::Duration;

use syncgate_core::{AccessError, AccessMode, ErrorKind, SyncError};

use super::SyncCoordinator;
use super::harness::{
    FakeAccess, ScriptedIndex, file_entry, progress_entry, test_config, upload_flags_entry,
    upload_progress_entry,
};
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
async fn download_completes_after_status_turns_current() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    index.put(file_entry("Docs/A.txt", "not_downloaded"));

    let mut transfer = engine.start_download("/Docs/A.txt").await.unwrap();
    assert_eq!(access.fetches(), 1);

    index.put(progress_entry("Docs/A.txt", "downloaded", 0.4));
    index.put(file_entry("Docs/A.txt", "current"));

    let mut events = Vec::new();
    while let Some(event) = transfer.next_event().await {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            TransferEvent::Progress(0.4),
            TransferEvent::Progress(1.0),
            TransferEvent::Done,
        ]
    );
    assert_eq!(access.opens(), 1);
    assert_eq!(engine.active_operations(), 0);
    assert_eq!(index.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn current_item_is_probed_not_short_circuited() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    index.put(file_entry("Docs/A.txt", "current"));
    access.script_open(
        "Docs/A.txt",
        Err(AccessError::NotFound("Docs/A.txt".into())),
    );

    let err = engine.download("Docs/A.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFoundOnRead);
    // already-current items skip the fetch request but never the open probe
    assert_eq!(access.fetches(), 0);
    assert_eq!(
        access.open_modes(),
        vec![("Docs/A.txt".to_string(), AccessMode::Read)]
    );
    assert_eq!(engine.active_operations(), 0);
}

#[tokio::test(start_paused = true)]
async fn duplicate_current_notifications_yield_one_probe_and_one_terminal() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    index.put(file_entry("Docs/A.txt", "current"));
    access.gate_opens();

    let mut transfer = engine.start_download("Docs/A.txt").await.unwrap();
    index.notify_path("Docs/A.txt");
    index.notify_path("Docs/A.txt");
    tokio::time::sleep(Duration::from_millis(5)).await;
    access.release_open();

    let mut terminals = 0;
    while let Some(event) = transfer.next_event().await {
        if event.is_terminal() {
            terminals += 1;
            assert_eq!(event, TransferEvent::Done);
        }
    }
    assert_eq!(terminals, 1);
    assert_eq!(access.opens(), 1);
    assert_eq!(index.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn stale_progress_values_are_dropped_not_delivered() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    index.put(file_entry("Docs/A.txt", "not_downloaded"));

    let mut transfer = engine.start_download("Docs/A.txt").await.unwrap();
    index.put(progress_entry("Docs/A.txt", "downloaded", 0.2));
    index.put(progress_entry("Docs/A.txt", "downloaded", 0.5));
    index.put(progress_entry("Docs/A.txt", "downloaded", 0.3));
    index.put(file_entry("Docs/A.txt", "current"));

    let mut progress = Vec::new();
    while let Some(event) = transfer.next_event().await {
        if let TransferEvent::Progress(value) = event {
            progress.push(value);
        }
    }
    assert_eq!(progress, vec![0.2, 0.5, 1.0]);
}

#[tokio::test(start_paused = true)]
async fn idle_download_times_out_after_exhausting_retries() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let config = EngineConfig {
        idle_interval: Duration::from_secs(5),
        max_attempts: 2,
        ..test_config()
    };
    let engine = engine_with(&index, &access, config);
    index.put(file_entry("Docs/A.txt", "not_downloaded"));

    let transfer = engine.start_download("Docs/A.txt").await.unwrap();
    let err = transfer.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(
        err,
        SyncError::Timeout {
            path: "Docs/A.txt".into(),
            attempts: 2
        }
    );
    // one fetch per attempt, one query per attempt, all stopped again
    assert_eq!(access.fetches(), 2);
    assert_eq!(index.started(), 2);
    assert_eq!(index.active(), 0);
    assert_eq!(engine.active_operations(), 0);
}

#[tokio::test(start_paused = true)]
async fn unavailable_container_fails_fast_without_retry() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    index.put(file_entry("Docs/A.txt", "not_downloaded"));
    access.script_fetch(Err(AccessError::Unavailable("not signed in".into())));

    let err = engine.download("Docs/A.txt").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContainerUnavailable);
    assert_eq!(access.fetches(), 1);
    assert_eq!(index.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn invalid_paths_are_rejected_before_any_subscription() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());

    let err = engine.download("../outside").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = engine.download("").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(index.started(), 0);
    assert_eq!(access.fetches(), 0);
}

#[tokio::test(start_paused = true)]
async fn upload_finishes_on_flag_transition_while_write_is_stuck() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    access.hang_stores();

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("in.bin");
    std::fs::write(&source, b"payload").unwrap();

    let mut transfer = engine.start_upload(&source, "Docs/out.bin").await.unwrap();
    index.put(upload_progress_entry("Docs/out.bin", 0.3));
    index.put(upload_flags_entry("Docs/out.bin", false, true));

    let mut events = Vec::new();
    while let Some(event) = transfer.next_event().await {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            TransferEvent::Progress(0.3),
            TransferEvent::Progress(1.0),
            TransferEvent::Done,
        ]
    );
    assert_eq!(access.stores(), 1);
    assert_eq!(index.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn upload_finishes_on_write_success_without_index_activity() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("in.bin");
    std::fs::write(&source, b"payload").unwrap();

    engine.upload(&source, "Docs/out.bin").await.unwrap();
    assert_eq!(access.stores(), 1);
    assert_eq!(index.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn upload_write_not_found_classifies_as_write_side() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    access.script_store(Err(AccessError::NotFound("Docs/out.bin".into())));

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("in.bin");
    std::fs::write(&source, b"payload").unwrap();

    let err = engine.upload(&source, "Docs/out.bin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFoundOnWrite);
}

#[tokio::test(start_paused = true)]
async fn stalled_upload_restarts_the_write_then_times_out() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let config = EngineConfig {
        idle_interval: Duration::from_secs(5),
        max_attempts: 2,
        ..test_config()
    };
    let engine = engine_with(&index, &access, config);
    access.hang_stores();

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("in.bin");
    std::fs::write(&source, b"payload").unwrap();

    let err = engine.upload(&source, "Docs/out.bin").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(access.stores(), 2);
    assert_eq!(index.started(), 2);
    assert_eq!(index.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_releases_the_subscription_before_returning() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    index.put(file_entry("Docs/A.txt", "not_downloaded"));

    let transfer = engine.start_download("Docs/A.txt").await.unwrap();
    assert_eq!(engine.active_operations(), 1);
    assert_eq!(index.active(), 1);

    transfer.cancel();
    assert_eq!(engine.active_operations(), 0);
    assert_eq!(index.active(), 0);

    // a late status change reaches nobody and triggers nothing
    index.put(file_entry("Docs/A.txt", "current"));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(access.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn exists_false_does_not_poison_a_later_download() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());

    assert!(!engine.exists("Docs/remote.txt").await.unwrap());
    index.put(file_entry("Docs/remote.txt", "not_downloaded"));
    assert!(!engine.exists("Docs/remote.txt").await.unwrap());

    let transfer = engine.start_download("Docs/remote.txt").await.unwrap();
    index.put(file_entry("Docs/remote.txt", "current"));
    transfer.wait().await.unwrap();

    assert!(engine.exists("Docs/remote.txt").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn concurrent_downloads_complete_independently() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    index.put(file_entry("Docs/A.txt", "not_downloaded"));
    index.put(file_entry("Docs/B.txt", "not_downloaded"));

    let a = engine.start_download("Docs/A.txt").await.unwrap();
    let b = engine.start_download("Docs/B.txt").await.unwrap();
    assert_ne!(a.token(), b.token());
    assert_eq!(engine.active_operations(), 2);

    // finish them in the opposite order of starting
    index.put(file_entry("Docs/B.txt", "current"));
    b.wait().await.unwrap();
    assert_eq!(engine.active_operations(), 1);

    index.put(file_entry("Docs/A.txt", "current"));
    a.wait().await.unwrap();
    assert_eq!(engine.active_operations(), 0);
    assert_eq!(index.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn progress_callback_surface_reports_each_fraction_once() {
    let index = ScriptedIndex::new();
    let access = FakeAccess::new();
    let engine = engine_with(&index, &access, test_config());
    index.put(file_entry("Docs/A.txt", "not_downloaded"));

    let engine_task = async {
        let mut seen = Vec::new();
        engine
            .download_with("Docs/A.txt", |value| seen.push(value))
            .await
            .map(|_| seen)
    };
    let feeder = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        index.put(progress_entry("Docs/A.txt", "downloaded", 0.25));
        index.put(progress_entry("Docs/A.txt", "downloaded", 0.75));
        index.put(file_entry("Docs/A.txt", "current"));
    };

    let (seen, _) = tokio::join!(engine_task, feeder);
    assert_eq!(seen.unwrap(), vec![0.25, 0.75, 1.0]);
}

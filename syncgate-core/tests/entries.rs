use serde_json::json;
use syncgate_core::{
    AccessContext, AccessError, DownloadStatus, ErrorKind, classify, parse_entry,
};

#[test]
fn mixed_snapshot_parses_entry_by_entry() {
    let entries = vec![
        json!({ "path": "Docs/A.txt", "download_status": "current", "size": 3 }),
        json!({ "size": 9 }),
        json!({ "path": "Docs/B.txt" }),
        json!("not an object"),
        json!({ "path": "Docs", "is_dir": true }),
    ];

    let parsed: Vec<_> = entries.iter().map(parse_entry).collect();
    assert_eq!(parsed.iter().filter(|r| r.is_ok()).count(), 3);
    assert_eq!(parsed.iter().filter(|r| r.is_err()).count(), 2);

    let first = parsed[0].as_ref().unwrap();
    assert_eq!(first.download_status, DownloadStatus::Current);
    assert!(parsed[4].as_ref().unwrap().is_directory);
}

#[test]
fn identical_cause_splits_by_access_context() {
    let read = classify(
        AccessError::NotFound("Docs/A.txt".into()),
        AccessContext::Read,
    );
    let write = classify(
        AccessError::NotFound("Docs/A.txt".into()),
        AccessContext::Write,
    );
    assert_eq!(read.kind(), ErrorKind::NotFoundOnRead);
    assert_eq!(write.kind(), ErrorKind::NotFoundOnWrite);
    assert_ne!(read, write);
}

#[test]
fn taxonomy_messages_name_the_item() {
    let err = classify(
        AccessError::NotFound("Docs/A.txt".into()),
        AccessContext::Neutral,
    );
    assert_eq!(err.to_string(), "item not found: Docs/A.txt");
}

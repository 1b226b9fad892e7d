use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use zkpanel_core::{Credentials, ProofStatus, QueryResult, Respondent, Workspace};
use zkpanel_kernel::Kernel;

fn respondent(id: &str) -> Respondent {
    Respondent {
        id: id.to_string(),
        commitment: format!("digest-{id}"),
        proof_status: ProofStatus::Pending,
        attributes_pending_proof: BTreeSet::from(["age".to_string()]),
        attribute_commitments: BTreeMap::from([("age".to_string(), "aa".to_string())]),
        query: None,
        query_result: QueryResult::Pending,
        synced_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        email_sent: false,
    }
}

#[test]
fn merging_novel_ids_grows_by_exactly_k() {
    let dir = tempfile::tempdir().expect("temp dir");
    let kernel = Kernel::open(dir.path()).expect("kernel");
    kernel
        .merge_respondents(Workspace::Panel, &[respondent("a")])
        .expect("seed");

    let batch: Vec<_> = ["b", "c", "d", "e"].iter().map(|id| respondent(id)).collect();
    let added = kernel
        .merge_respondents(Workspace::Panel, &batch)
        .expect("merge");
    assert_eq!(added, 4);
    assert_eq!(kernel.count_respondents(Workspace::Panel).expect("count"), 5);

    let ids: Vec<_> = kernel
        .list_respondents(Workspace::Panel)
        .expect("list")
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["a", "b", "c", "d", "e"], "insertion order is kept");
}

#[test]
fn existing_record_keeps_fields_owned_by_other_flows() {
    let dir = tempfile::tempdir().expect("temp dir");
    let kernel = Kernel::open(dir.path()).expect("kernel");
    kernel
        .merge_respondents(Workspace::Insight, &[respondent("r-1")])
        .expect("seed");
    assert!(kernel
        .set_proof_status(Workspace::Insight, "r-1", ProofStatus::Verified)
        .expect("verify"));
    assert!(kernel
        .mark_email_sent(Workspace::Insight, "r-1")
        .expect("email"));

    let mut incoming = respondent("r-1");
    incoming.proof_status = ProofStatus::Failed;
    incoming.email_sent = false;
    incoming.commitment = "other-digest".into();
    let added = kernel
        .merge_respondents(Workspace::Insight, &[incoming, respondent("r-2")])
        .expect("merge");
    assert_eq!(added, 1);

    let kept = kernel
        .get_respondent(Workspace::Insight, "r-1")
        .expect("get")
        .expect("present");
    assert_eq!(kept.proof_status, ProofStatus::Verified);
    assert!(kept.email_sent);
    assert_eq!(kept.commitment, "digest-r-1");
}

#[test]
fn duplicates_inside_one_batch_keep_the_first() {
    let dir = tempfile::tempdir().expect("temp dir");
    let kernel = Kernel::open(dir.path()).expect("kernel");
    let mut second = respondent("dup");
    second.commitment = "second".into();
    let added = kernel
        .merge_respondents(Workspace::Panel, &[respondent("dup"), second])
        .expect("merge");
    assert_eq!(added, 1);
    let rec = kernel
        .get_respondent(Workspace::Panel, "dup")
        .expect("get")
        .expect("present");
    assert_eq!(rec.commitment, "digest-dup");
}

#[test]
fn workspaces_do_not_share_collections_or_settings() {
    let dir = tempfile::tempdir().expect("temp dir");
    let kernel = Kernel::open(dir.path()).expect("kernel");
    kernel
        .merge_respondents(Workspace::Panel, &[respondent("same")])
        .expect("panel");
    let added = kernel
        .merge_respondents(Workspace::Insight, &[respondent("same")])
        .expect("insight");
    assert_eq!(added, 1, "same id in another workspace is novel");

    kernel
        .set_sync_enabled(Workspace::Panel, true)
        .expect("enable panel");
    assert!(kernel.sync_settings(Workspace::Panel).expect("panel").enabled);
    assert!(!kernel.sync_settings(Workspace::Insight).expect("insight").enabled);
}

#[test]
fn sync_settings_round_trip() {
    let dir = tempfile::tempdir().expect("temp dir");
    let kernel = Kernel::open(dir.path()).expect("kernel");
    let empty = kernel.sync_settings(Workspace::Panel).expect("empty");
    assert!(!empty.enabled);
    assert!(empty.credentials.is_none());
    assert!(empty.last_sync_at.is_none());

    let creds = Credentials {
        base_url: "http://127.0.0.1:8081".into(),
        api_key: "k".into(),
        user_id: "u".into(),
        workspace_id: "w".into(),
    };
    kernel
        .set_credentials(Workspace::Panel, &creds)
        .expect("creds");
    kernel
        .set_sync_enabled(Workspace::Panel, true)
        .expect("enable");
    let at = Utc.with_ymd_and_hms(2024, 6, 2, 8, 30, 0).unwrap();
    kernel
        .set_last_sync_at(Workspace::Panel, at)
        .expect("last sync");

    // Settings survive a reopen.
    let reopened = Kernel::open(dir.path()).expect("reopen");
    let settings = reopened.sync_settings(Workspace::Panel).expect("settings");
    assert!(settings.enabled);
    assert_eq!(settings.credentials, Some(creds));
    assert_eq!(settings.last_sync_at, Some(at));
}

#[test]
fn concurrent_merges_never_duplicate() {
    let dir = tempfile::tempdir().expect("temp dir");
    let kernel = Arc::new(Kernel::open(dir.path()).expect("kernel"));
    let batch: Vec<_> = (0..20).map(|i| respondent(&format!("r-{i}"))).collect();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let kernel = kernel.clone();
            let batch = batch.clone();
            std::thread::spawn(move || kernel.merge_respondents(Workspace::Panel, &batch))
        })
        .collect();
    let total: usize = handles
        .into_iter()
        .map(|h| h.join().expect("thread").expect("merge"))
        .sum();
    assert_eq!(total, 20);
    assert_eq!(kernel.count_respondents(Workspace::Panel).expect("count"), 20);
}

#[tokio::test]
async fn async_wrappers_share_the_store() {
    let dir = tempfile::tempdir().expect("temp dir");
    let kernel = Kernel::open(dir.path()).expect("kernel");
    let added = kernel
        .merge_respondents_async(Workspace::Panel, vec![respondent("x"), respondent("y")])
        .await
        .expect("merge");
    assert_eq!(added, 2);
    let listed = kernel
        .list_respondents_async(Workspace::Panel)
        .await
        .expect("list");
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0], respondent("x"));
}

#[tokio::test]
async fn sync_batch_records_last_sync_with_the_rows() {
    let dir = tempfile::tempdir().expect("temp dir");
    let kernel = Kernel::open(dir.path()).expect("kernel");
    let at = Utc.with_ymd_and_hms(2024, 7, 4, 9, 0, 0).unwrap();
    let added = kernel
        .merge_sync_batch_async(Workspace::Insight, vec![respondent("s-1"), respondent("s-1")], at)
        .await
        .expect("merge");
    assert_eq!(added, 1);
    let settings = kernel.sync_settings(Workspace::Insight).expect("settings");
    assert_eq!(settings.last_sync_at, Some(at));
    assert!(!settings.enabled);

    // An empty batch still counts as a completed sync.
    let later = Utc.with_ymd_and_hms(2024, 7, 4, 9, 0, 30).unwrap();
    assert_eq!(
        kernel
            .merge_sync_batch(Workspace::Insight, &[], later)
            .expect("empty merge"),
        0
    );
    assert_eq!(
        kernel.sync_settings(Workspace::Insight).expect("settings").last_sync_at,
        Some(later)
    );
}

#[test]
fn failed_last_sync_write_rolls_back_the_rows() {
    let dir = tempfile::tempdir().expect("temp dir");
    let kernel = Kernel::open(dir.path()).expect("kernel");
    let raw = rusqlite::Connection::open(kernel.db_path()).expect("raw conn");
    raw.execute_batch("DROP TABLE sync_settings;").expect("drop");

    let at = Utc.with_ymd_and_hms(2024, 7, 4, 9, 0, 0).unwrap();
    assert!(kernel
        .merge_sync_batch(Workspace::Panel, &[respondent("r-1")], at)
        .is_err());
    assert_eq!(kernel.count_respondents(Workspace::Panel).expect("count"), 0);
}

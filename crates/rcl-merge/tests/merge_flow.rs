//! End-to-end merge runs against the in-memory store.

use rcl_merge::{EligibilityPolicy, MergeConfig, MergeEngine, MergeError};
use rcl_store::{BackoffPolicy, MemoryStore, Table};
use std::time::Duration;

const CAST_HEADER: [&str; 8] = [
    "Show IMDbID",
    "TMDb CastID",
    "CastName",
    "Cast IMDbID",
    "TMDb ShowID",
    "ShowName",
    "EpisodeCount",
    "Seasons",
];

const PERSON_HEADER: [&str; 7] = [
    "PersonName",
    "PersonIMDbID",
    "PersonTMDbID",
    "TotalShows",
    "TotalEpisodes",
    "ShowIMDbID",
    "ShowTMDbID",
];

fn cast_table(rows: Vec<Vec<&str>>) -> Table {
    let mut table = Table::new("CastInfo", CAST_HEADER.to_vec());
    for row in rows {
        table.push_row(row);
    }
    table
}

fn viable_table(rows: Vec<Vec<&str>>) -> Table {
    let mut table = Table::new("ViableCast", CAST_HEADER.to_vec());
    for row in rows {
        table.push_row(row);
    }
    table
}

fn person_table(rows: Vec<Vec<&str>>) -> Table {
    let mut table = Table::new("UpdateInfo", PERSON_HEADER.to_vec());
    for row in rows {
        table.push_row(row);
    }
    table
}

fn show_table(rows: Vec<Vec<&str>>) -> Table {
    let mut table = Table::new(
        "ShowInfo",
        vec!["ShowID", "ShowName", "c2", "c3", "c4", "IMDbSeriesID"],
    );
    for row in rows {
        table.push_row(row);
    }
    table
}

async fn seed_default(store: &MemoryStore) {
    store
        .insert_table(cast_table(vec![vec![
            "tt100",
            "500",
            "Pat Example",
            "nm1",
            "900",
            "Survivor",
            "3",
            "1",
        ]]))
        .await;
    store.insert_table(viable_table(vec![])).await;
    store
        .insert_table(person_table(vec![vec![
            "Pat Example",
            "nm1",
            "500",
            "",
            "",
            "",
            "",
        ]]))
        .await;
    store
        .insert_table(show_table(vec![vec!["900", "Survivor", "", "", "", "tt100"]]))
        .await;
}

fn engine(store: &MemoryStore, config: MergeConfig) -> MergeEngine<'_> {
    MergeEngine::new(store, config, EligibilityPolicy::default()).with_backoff(BackoffPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    })
}

#[tokio::test]
async fn first_run_appends_then_rerun_is_idempotent() {
    let store = MemoryStore::new();
    seed_default(&store).await;

    let summary = engine(&store, MergeConfig::default()).run().await.unwrap();
    assert_eq!(summary.appends_planned, 1);
    assert_eq!(summary.patches_planned, 0);

    let table = store.table("ViableCast").await.unwrap();
    assert_eq!(table.rows.len(), 1);
    assert_eq!(
        table.rows[0],
        vec!["tt100", "500", "Pat Example", "nm1", "900", "Survivor"]
    );

    let summary = engine(&store, MergeConfig::default()).run().await.unwrap();
    assert_eq!(summary.appends_planned, 0);
    assert_eq!(summary.patches_planned, 0);
    assert_eq!(store.table("ViableCast").await.unwrap().rows.len(), 1);
}

#[tokio::test]
async fn existing_rows_stay_byte_identical_and_reserved_columns_untouched() {
    let store = MemoryStore::new();
    seed_default(&store).await;
    store
        .insert_table(viable_table(vec![vec![
            "tt200",
            "600",
            "Sam Other",
            "nm2",
            "901",
            "Below Deck",
            "12",
            "3",
        ]]))
        .await;

    engine(&store, MergeConfig::default()).run().await.unwrap();

    let table = store.table("ViableCast").await.unwrap();
    assert_eq!(table.rows.len(), 2);
    assert_eq!(
        table.rows[0],
        vec!["tt200", "600", "Sam Other", "nm2", "901", "Below Deck", "12", "3"]
    );
    assert_eq!(table.rows[1][0], "tt100");
}

#[tokio::test]
async fn below_threshold_pairings_are_not_promoted() {
    let store = MemoryStore::new();
    seed_default(&store).await;
    // Survivor is a competition format; one episode is below threshold.
    store
        .insert_table(cast_table(vec![vec![
            "tt100", "500", "Pat Example", "nm1", "900", "Survivor", "1", "",
        ]]))
        .await;

    let summary = engine(&store, MergeConfig::default()).run().await.unwrap();
    assert_eq!(summary.appends_planned, 0);
    assert_eq!(summary.pairings_excluded, 1);
    assert!(store.table("ViableCast").await.unwrap().rows.is_empty());
}

#[tokio::test]
async fn duplicate_source_rows_append_a_single_row() {
    let store = MemoryStore::new();
    seed_default(&store).await;
    store
        .insert_table(cast_table(vec![
            vec!["tt100", "500", "Pat Example", "nm1", "900", "Survivor", "3", "1"],
            vec!["tt100", "500", "Pat Example", "nm1", "900", "Survivor", "2", "1"],
        ]))
        .await;

    let summary = engine(&store, MergeConfig::default()).run().await.unwrap();
    assert_eq!(summary.appends_planned, 1);
    assert_eq!(store.table("ViableCast").await.unwrap().rows.len(), 1);
}

#[tokio::test]
async fn blank_identifier_cells_receive_column_scoped_patches() {
    let store = MemoryStore::new();
    seed_default(&store).await;
    store
        .insert_table(viable_table(vec![vec![
            "tt100",
            "500",
            "Pat Example",
            "",
            "900",
            "Survivor",
            "7",
            "2",
        ]]))
        .await;

    let summary = engine(&store, MergeConfig::default()).run().await.unwrap();
    assert_eq!(summary.patches_planned, 1);
    // the filled row now carries the candidate's key, so no duplicate append
    assert_eq!(summary.appends_planned, 0);

    let table = store.table("ViableCast").await.unwrap();
    assert_eq!(table.rows.len(), 1);
    let patched = &table.rows[0];
    assert_eq!(patched[3], "nm1");
    // every other cell untouched, reserved columns included
    assert_eq!(patched[1], "500");
    assert_eq!(patched[6], "7");
    assert_eq!(patched[7], "2");
}

#[tokio::test]
async fn schema_mismatch_aborts_before_any_write() {
    let store = MemoryStore::new();
    seed_default(&store).await;
    store
        .insert_table(Table::new("CastInfo", vec!["Show IMDbID", "CastName"]))
        .await;

    let err = engine(&store, MergeConfig::default()).run().await.unwrap_err();
    assert!(matches!(err, MergeError::Schema(_)));
    assert_eq!(store.append_calls().await, 0);
    assert_eq!(store.patch_calls().await, 0);
}

#[tokio::test]
async fn rate_limited_batch_is_retried_without_resending_confirmed_ones() {
    let store = MemoryStore::new();
    seed_default(&store).await;
    store
        .insert_table(cast_table(vec![
            vec!["tt100", "500", "Pat Example", "nm1", "900", "Survivor", "3", ""],
            vec!["tt100", "600", "Sam Other", "nm2", "900", "Survivor", "4", ""],
            vec!["tt100", "700", "Lee Third", "nm3", "900", "Survivor", "5", ""],
        ]))
        .await;

    let config = MergeConfig {
        batch_size: 1,
        ..MergeConfig::default()
    };
    // First batch fails once and is retried; the others are sent once each.
    store.rate_limit_next_writes(1).await;
    let summary = engine(&store, config).run().await.unwrap();

    assert_eq!(summary.appends_planned, 3);
    assert_eq!(summary.append_batches_sent, 3);
    assert_eq!(store.append_calls().await, 3);
    assert_eq!(store.table("ViableCast").await.unwrap().rows.len(), 3);
}

#[tokio::test]
async fn retry_exhaustion_names_the_failing_batch_range() {
    let store = MemoryStore::new();
    seed_default(&store).await;
    store.rate_limit_next_writes(10).await;

    let err = engine(&store, MergeConfig::default()).run().await.unwrap_err();
    match err {
        MergeError::BatchFailed {
            start,
            end,
            batches_sent,
            ..
        } => {
            assert_eq!(start, 0);
            assert_eq!(end, 1);
            assert_eq!(batches_sent, 0);
        }
        other => panic!("expected BatchFailed, got {other:?}"),
    }
    assert!(store.table("ViableCast").await.unwrap().rows.is_empty());
}

#[tokio::test]
async fn dry_run_plans_but_writes_nothing() {
    let store = MemoryStore::new();
    seed_default(&store).await;

    let config = MergeConfig {
        dry_run: true,
        ..MergeConfig::default()
    };
    let summary = engine(&store, config).run().await.unwrap();
    assert_eq!(summary.appends_planned, 1);
    assert_eq!(summary.append_batches_sent, 0);
    assert!(store.table("ViableCast").await.unwrap().rows.is_empty());
    assert_eq!(store.append_calls().await, 0);
}

#[tokio::test]
async fn run_report_is_written_when_a_reports_dir_is_set() {
    let store = MemoryStore::new();
    seed_default(&store).await;
    let dir = tempfile::tempdir().unwrap();

    let config = MergeConfig {
        reports_dir: Some(dir.path().to_path_buf()),
        ..MergeConfig::default()
    };
    let summary = engine(&store, config).run().await.unwrap();

    let report_path = dir.path().join(format!("merge-{}.json", summary.run_id));
    let body = std::fs::read_to_string(report_path).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["appends_planned"], 1);
    assert_eq!(parsed["source_fingerprint"], summary.source_fingerprint.as_str());
}

#[tokio::test]
async fn unresolved_people_are_counted_but_not_persisted() {
    let store = MemoryStore::new();
    seed_default(&store).await;
    store
        .insert_table(cast_table(vec![vec![
            "tt100", "", "Mystery Guest", "", "900", "Survivor", "5", "",
        ]]))
        .await;
    store.insert_table(person_table(vec![])).await;

    let summary = engine(&store, MergeConfig::default()).run().await.unwrap();
    assert_eq!(summary.skipped_unresolved, 1);
    assert_eq!(summary.appends_planned, 0);
}

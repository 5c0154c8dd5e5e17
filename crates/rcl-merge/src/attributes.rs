//! Person-attribute backfill from the metadata provider.
//!
//! Walks the person table and fills curated attribute cells (gender,
//! birthday) via the reconciliation policy. A person is only fetched when at
//! least one of their cells is actually fillable, and a lookup that finds
//! nothing writes the field's placeholder sentinel so the same person is not
//! re-fetched on every run.

use rcl_providers::PersonMetadataProvider;
use rcl_store::{CellPatch, Table};
use tracing::{debug, warn};

use crate::reconcile::{reconcile, KeepReason, ReconcileField, WriteDecision};
use crate::resolver::csv_split;
use crate::schema::PersonAttributeColumns;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct AttributeOutcome {
    pub patches: Vec<CellPatch>,
    pub people_fetched: usize,
    pub lookups_failed: usize,
    pub cells_frozen_by_override: usize,
}

pub async fn backfill_person_attributes(
    table: &Table,
    cols: &PersonAttributeColumns,
    provider: &dyn PersonMetadataProvider,
) -> AttributeOutcome {
    let mut outcome = AttributeOutcome::default();
    for row_index in 0..table.rows.len() {
        let numeric_id = table.cell(row_index, cols.person_numeric);
        if numeric_id.is_empty() {
            continue;
        }
        // Multi-value cells keep their first id for lookups.
        let numeric_id = *csv_split(numeric_id).first().unwrap_or(&numeric_id);

        let fields = [
            (
                ReconcileField::Gender,
                cols.gender,
                table.cell(row_index, cols.gender_update),
            ),
            (
                ReconcileField::Birthday,
                cols.birthday,
                table.cell(row_index, cols.birthday_update),
            ),
        ];
        let mut needs_fetch = false;
        for (field, column, override_value) in &fields {
            let current = table.cell(row_index, *column);
            let fillable = current.trim().is_empty() || field.is_placeholder(current);
            if !fillable {
                continue;
            }
            if override_value.trim().is_empty() {
                needs_fetch = true;
            } else {
                outcome.cells_frozen_by_override += 1;
            }
        }
        if !needs_fetch {
            continue;
        }

        let attributes = match provider.person_attributes(numeric_id).await {
            Ok(found) => found,
            Err(err) => {
                warn!(numeric_id, error = %err, "attribute lookup failed");
                outcome.lookups_failed += 1;
                continue;
            }
        };
        outcome.people_fetched += 1;

        for (field, column, override_value) in fields {
            let current = table.cell(row_index, column);
            let fetched = attributes.as_ref().and_then(|a| match field {
                ReconcileField::Gender => a.gender.clone(),
                ReconcileField::Birthday => a.birthday.clone(),
            });
            match reconcile(field, current, override_value, fetched.as_deref()) {
                WriteDecision::Write(value) => outcome.patches.push(CellPatch {
                    row: row_index + 2,
                    column,
                    value,
                }),
                WriteDecision::Keep(KeepReason::OverridePresent) => {}
                WriteDecision::Keep(KeepReason::NoCandidate) => {
                    // Mark the miss so the next run skips this cell.
                    if current.trim().is_empty() {
                        outcome.patches.push(CellPatch {
                            row: row_index + 2,
                            column,
                            value: field.placeholder().to_string(),
                        });
                    }
                }
                WriteDecision::Keep(KeepReason::AlreadyFilled) => {}
            }
        }
    }
    debug!(
        patches = outcome.patches.len(),
        fetched = outcome.people_fetched,
        failed = outcome.lookups_failed,
        "attribute backfill computed"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rcl_providers::{FixtureProvider, PersonAttributes};

    use super::*;

    const HEADER: [&str; 13] = [
        "PersonName",
        "PersonIMDbID",
        "PersonTMDbID",
        "TotalShows",
        "TotalEpisodes",
        "ShowIMDbID",
        "ShowTMDbID",
        "c7",
        "c8",
        "Gender",
        "Gender-Update",
        "Birthday",
        "Birthday-Update",
    ];

    fn table(rows: Vec<Vec<&str>>) -> (Table, PersonAttributeColumns) {
        let mut table = Table::new("UpdateInfo", HEADER.to_vec());
        for row in rows {
            table.push_row(row);
        }
        let cols = PersonAttributeColumns::resolve(&table).unwrap();
        (table, cols)
    }

    fn provider() -> FixtureProvider {
        let mut map = HashMap::new();
        map.insert(
            "500".to_string(),
            PersonAttributes {
                gender: Some("Female".into()),
                birthday: Some("1990-05-01".into()),
            },
        );
        FixtureProvider::new(map)
    }

    #[tokio::test]
    async fn fillable_cells_are_patched_from_the_provider() {
        let (table, cols) = table(vec![vec![
            "Pat", "nm1", "500", "2", "8", "", "", "", "", "unknown **", "", "", "",
        ]]);
        let outcome = backfill_person_attributes(&table, &cols, &provider()).await;
        assert_eq!(
            outcome.patches,
            vec![
                CellPatch { row: 2, column: 9, value: "Female".into() },
                CellPatch { row: 2, column: 11, value: "1990-05-01".into() },
            ]
        );
        assert_eq!(outcome.people_fetched, 1);
    }

    #[tokio::test]
    async fn overrides_freeze_cells_and_filled_people_skip_the_fetch() {
        let (table, cols) = table(vec![
            vec!["Pat", "nm1", "500", "", "", "", "", "", "", "", "Nonbinary", "1990-01-01", ""],
            vec!["Sam", "nm2", "501", "", "", "", "", "", "", "Male", "", "1980-02-02", ""],
        ]);
        let outcome = backfill_person_attributes(&table, &cols, &provider()).await;
        assert_eq!(outcome.cells_frozen_by_override, 1);
        // Sam is fully filled, so no fetch happened for an unknown id.
        assert_eq!(outcome.lookups_failed, 0);
        assert!(outcome.patches.is_empty());
    }

    #[tokio::test]
    async fn unknown_people_get_placeholder_sentinels() {
        let (table, cols) = table(vec![vec![
            "Lee", "nm3", "777", "", "", "", "", "", "", "", "", "", "",
        ]]);
        let outcome = backfill_person_attributes(&table, &cols, &provider()).await;
        assert_eq!(
            outcome.patches,
            vec![
                CellPatch { row: 2, column: 9, value: "unknown **".into() },
                CellPatch { row: 2, column: 11, value: " **".into() },
            ]
        );
    }

    #[tokio::test]
    async fn multi_value_numeric_cells_fetch_by_first_id() {
        let (table, cols) = table(vec![vec![
            "Pat", "nm1", "500, 501", "", "", "", "", "", "", "", "", "", "",
        ]]);
        let outcome = backfill_person_attributes(&table, &cols, &provider()).await;
        assert_eq!(outcome.people_fetched, 1);
        assert!(outcome
            .patches
            .iter()
            .any(|p| p.value == "Female"));
    }
}

//! Episode/season transfer from the viable table back to the appearance
//! table.
//!
//! The viable table's manual-annotation columns are curated by hand; the
//! appearance table wants the same figures. The transfer is placeholder
//! aware: only cells that are empty or carry the literal `SKIP` marker are
//! fillable, so a value someone typed into the appearance table directly is
//! never clobbered.

use std::collections::HashMap;

use rcl_core::CompositeKey;
use rcl_store::{CellPatch, Table};
use tracing::debug;

use crate::schema::{AppearanceColumns, ViableColumns};

const SKIP_MARKER: &str = "skip";

fn is_fillable(cell: &str) -> bool {
    let trimmed = cell.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case(SKIP_MARKER)
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TransferOutcome {
    pub patches: Vec<CellPatch>,
    pub rows_without_match: usize,
    pub cells_preserved: usize,
}

/// Compute fill patches for the appearance table from the viable table's
/// annotated episode/season cells, keyed by (person alnum, show alnum).
pub fn transfer_episodes_seasons(
    appearance: &Table,
    appearance_cols: &AppearanceColumns,
    viable: &Table,
    viable_cols: &ViableColumns,
) -> TransferOutcome {
    let mut annotations: HashMap<CompositeKey, (String, String)> = HashMap::new();
    for row_index in 0..viable.rows.len() {
        let person = viable.cell(row_index, viable_cols.person_alnum);
        let show = viable.cell(row_index, viable_cols.show_alnum);
        if person.is_empty() || show.is_empty() {
            continue;
        }
        let episodes = viable.cell(row_index, viable_cols.reserved_episodes);
        let seasons = viable.cell(row_index, viable_cols.reserved_seasons);
        if episodes.is_empty() && seasons.is_empty() {
            continue;
        }
        annotations
            .entry(CompositeKey::new(person, show))
            .or_insert_with(|| (episodes.to_string(), seasons.to_string()));
    }

    let mut outcome = TransferOutcome::default();
    for row_index in 0..appearance.rows.len() {
        let person = appearance.cell(row_index, appearance_cols.person_alnum);
        let show = appearance.cell(row_index, appearance_cols.show_alnum);
        if person.is_empty() || show.is_empty() {
            continue;
        }
        let Some((episodes, seasons)) = annotations.get(&CompositeKey::new(person, show)) else {
            outcome.rows_without_match += 1;
            continue;
        };
        let mut fill = |column: usize, value: &str| {
            if value.is_empty() {
                return;
            }
            if is_fillable(appearance.cell(row_index, column)) {
                outcome.patches.push(CellPatch {
                    row: row_index + 2,
                    column,
                    value: value.to_string(),
                });
            } else {
                outcome.cells_preserved += 1;
            }
        };
        fill(appearance_cols.episodes, episodes);
        fill(appearance_cols.seasons, seasons);
    }

    debug!(
        patches = outcome.patches.len(),
        preserved = outcome.cells_preserved,
        unmatched = outcome.rows_without_match,
        "episode/season transfer computed"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: [&str; 8] = [
        "Show IMDbID",
        "TMDb CastID",
        "CastName",
        "Cast IMDbID",
        "TMDb ShowID",
        "ShowName",
        "EpisodeCount",
        "Seasons",
    ];

    fn viable() -> (Table, ViableColumns) {
        let mut table = Table::new("ViableCast", HEADER.to_vec());
        table.push_row(vec!["tt100", "500", "Pat", "nm1", "900", "Survivor", "12", "3"]);
        table.push_row(vec!["tt200", "501", "Sam", "nm2", "901", "Below Deck", "", "2"]);
        let cols = ViableColumns::resolve(&table).unwrap();
        (table, cols)
    }

    fn appearance(rows: Vec<Vec<&str>>) -> (Table, AppearanceColumns) {
        let mut table = Table::new("CastInfo", HEADER.to_vec());
        for row in rows {
            table.push_row(row);
        }
        let cols = AppearanceColumns::resolve(&table).unwrap();
        (table, cols)
    }

    #[test]
    fn empty_and_skip_cells_are_filled() {
        let (viable, vcols) = viable();
        let (appearance, acols) = appearance(vec![
            vec!["tt100", "500", "Pat", "nm1", "900", "Survivor", "", "SKIP"],
        ]);
        let outcome = transfer_episodes_seasons(&appearance, &acols, &viable, &vcols);
        assert_eq!(
            outcome.patches,
            vec![
                CellPatch { row: 2, column: 6, value: "12".into() },
                CellPatch { row: 2, column: 7, value: "3".into() },
            ]
        );
    }

    #[test]
    fn hand_entered_values_are_preserved() {
        let (viable, vcols) = viable();
        let (appearance, acols) = appearance(vec![
            vec!["tt100", "500", "Pat", "nm1", "900", "Survivor", "9", ""],
        ]);
        let outcome = transfer_episodes_seasons(&appearance, &acols, &viable, &vcols);
        assert_eq!(outcome.cells_preserved, 1);
        assert_eq!(
            outcome.patches,
            vec![CellPatch { row: 2, column: 7, value: "3".into() }]
        );
    }

    #[test]
    fn rows_without_annotation_match_are_counted() {
        let (viable, vcols) = viable();
        let (appearance, acols) = appearance(vec![
            vec!["tt999", "502", "Lee", "nm3", "902", "Unknown", "", ""],
        ]);
        let outcome = transfer_episodes_seasons(&appearance, &acols, &viable, &vcols);
        assert!(outcome.patches.is_empty());
        assert_eq!(outcome.rows_without_match, 1);
    }

    #[test]
    fn blank_annotation_sides_write_nothing() {
        let (viable, vcols) = viable();
        // nm2/tt200 has an empty episode annotation; only seasons transfers
        let (appearance, acols) = appearance(vec![
            vec!["tt200", "501", "Sam", "nm2", "901", "Below Deck", "", ""],
        ]);
        let outcome = transfer_episodes_seasons(&appearance, &acols, &viable, &vcols);
        assert_eq!(
            outcome.patches,
            vec![CellPatch { row: 2, column: 7, value: "2".into() }]
        );
    }
}

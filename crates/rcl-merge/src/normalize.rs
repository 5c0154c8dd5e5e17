//! Show-name normalization against the ground-truth title table.
//!
//! Source tables accumulate divergent spellings of the same show title.
//! Given a snapshot and the canonical title map, this emits column-scoped
//! patches for cells whose stored name differs from the authoritative one.
//! Show ids without a known canonical title are counted and logged, never an
//! error: the title table lags behind new shows.

use rcl_store::{CellPatch, Table};
use tracing::{debug, warn};

use crate::resolver::IdentityResolver;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct NormalizeOutcome {
    pub patches: Vec<CellPatch>,
    pub already_canonical: usize,
    pub unknown_show_ids: usize,
}

/// Compare every row's show name against the canonical title for its show id.
/// `show_alnum_col` and `show_name_col` are 0-based indices into `table`.
pub fn normalize_show_names(
    table: &Table,
    show_alnum_col: usize,
    show_name_col: usize,
    resolver: &IdentityResolver,
) -> NormalizeOutcome {
    let mut outcome = NormalizeOutcome::default();
    for row_index in 0..table.rows.len() {
        let show_alnum = table.cell(row_index, show_alnum_col);
        if show_alnum.is_empty() {
            continue;
        }
        let Some(canonical) = resolver.canonical_show_title(show_alnum) else {
            outcome.unknown_show_ids += 1;
            continue;
        };
        let stored = table.cell(row_index, show_name_col);
        if stored == canonical {
            outcome.already_canonical += 1;
            continue;
        }
        outcome.patches.push(CellPatch {
            row: row_index + 2,
            column: show_name_col,
            value: canonical.to_string(),
        });
    }
    if outcome.unknown_show_ids > 0 {
        warn!(
            table = %table.title,
            unknown = outcome.unknown_show_ids,
            "show ids without a canonical title were skipped"
        );
    }
    debug!(
        table = %table.title,
        corrections = outcome.patches.len(),
        already_canonical = outcome.already_canonical,
        "show-name normalization computed"
    );
    outcome
}

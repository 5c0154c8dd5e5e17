//! Cross-namespace identity resolution.
//!
//! Built once per run from a snapshot of the identity-mapping table and the
//! ground-truth show-title table. Lookups are pure; absence is a normal
//! outcome, never an error. The mapping table may file one person under
//! several numeric ids (comma-separated), and different rows may disagree:
//! the first-seen mapping for a given source id is authoritative and later
//! conflicting values are ignored, so resolution cannot oscillate between
//! runs.

use std::collections::{BTreeMap, HashMap};

use rcl_core::{PersonRef, ShowRef};
use rcl_store::Table;
use tracing::debug;

use crate::schema::{PersonTableColumns, ShowTableColumns};

/// Similarity floor for accepting a name-keyed identity match. Names are a
/// lower-fidelity key than ids; below this the match is discarded.
pub const NAME_MATCH_THRESHOLD: f64 = 0.93;

#[derive(Debug, Default)]
pub struct IdentityResolver {
    alnum_by_numeric: HashMap<String, String>,
    numeric_by_alnum: HashMap<String, String>,
    // ordered so the fuzzy fallback scan is deterministic
    alnum_by_name: BTreeMap<String, String>,
    title_by_show_alnum: HashMap<String, String>,
    conflicts_ignored: usize,
}

pub fn csv_split(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect()
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl IdentityResolver {
    pub fn from_tables(
        person_table: &Table,
        person_columns: &PersonTableColumns,
        show_table: &Table,
        show_columns: &ShowTableColumns,
    ) -> Self {
        let mut resolver = Self::default();
        for row_index in 0..person_table.rows.len() {
            let alnum = person_table.cell(row_index, person_columns.person_alnum);
            let numeric_csv = person_table.cell(row_index, person_columns.person_numeric);
            let name = person_table.cell(row_index, person_columns.person_name);
            resolver.insert_person_mapping(alnum, numeric_csv, name);
        }
        for row_index in 0..show_table.rows.len() {
            let alnum = show_table.cell(row_index, show_columns.show_alnum);
            let title = show_table.cell(row_index, show_columns.show_name);
            resolver.insert_show_title(alnum, title);
        }
        debug!(
            mappings = resolver.alnum_by_numeric.len(),
            titles = resolver.title_by_show_alnum.len(),
            conflicts_ignored = resolver.conflicts_ignored,
            "identity resolver built"
        );
        resolver
    }

    /// Record one mapping row. First-seen wins for every source id.
    pub fn insert_person_mapping(&mut self, alnum: &str, numeric_csv: &str, name: &str) {
        if alnum.is_empty() {
            return;
        }
        for numeric in csv_split(numeric_csv) {
            let entry = self.alnum_by_numeric.entry(numeric.to_string());
            if let std::collections::hash_map::Entry::Occupied(existing) = &entry {
                if existing.get() != alnum {
                    self.conflicts_ignored += 1;
                    debug!(numeric, kept = %existing.get(), ignored = alnum, "conflicting mapping ignored");
                }
                continue;
            }
            entry.or_insert_with(|| alnum.to_string());
        }
        if let Some(first_numeric) = csv_split(numeric_csv).first() {
            self.numeric_by_alnum
                .entry(alnum.to_string())
                .or_insert_with(|| first_numeric.to_string());
        }
        if !name.trim().is_empty() {
            self.alnum_by_name
                .entry(normalize_name(name))
                .or_insert_with(|| alnum.to_string());
        }
    }

    /// Record one ground-truth title. First non-empty title per id wins.
    pub fn insert_show_title(&mut self, alnum: &str, title: &str) {
        if alnum.is_empty() || title.is_empty() {
            return;
        }
        self.title_by_show_alnum
            .entry(alnum.to_string())
            .or_insert_with(|| title.to_string());
    }

    pub fn alnum_for_numeric(&self, numeric: &str) -> Option<&str> {
        self.alnum_by_numeric.get(numeric).map(String::as_str)
    }

    pub fn numeric_for_alnum(&self, alnum: &str) -> Option<&str> {
        self.numeric_by_alnum.get(alnum).map(String::as_str)
    }

    pub fn canonical_show_title(&self, alnum: &str) -> Option<&str> {
        self.title_by_show_alnum.get(alnum).map(String::as_str)
    }

    pub fn conflicts_ignored(&self) -> usize {
        self.conflicts_ignored
    }

    /// Name-keyed fallback. An exact normalized match wins; otherwise the
    /// stored names are scanned and the best one passing the similarity
    /// guard is accepted, so a scraped spelling variant still resolves.
    /// Documented lower fidelity: two real people sharing a name will
    /// collide here.
    pub fn alnum_for_name(&self, name: &str) -> Option<&str> {
        let normalized = normalize_name(name);
        if let Some(id) = self.alnum_by_name.get(&normalized) {
            return Some(id.as_str());
        }
        let mut best: Option<(f64, &str)> = None;
        for (stored, id) in &self.alnum_by_name {
            if !Self::names_match(stored, name) {
                continue;
            }
            let score = strsim::jaro_winkler(stored, &normalized);
            if best.map_or(true, |(top, _)| score > top) {
                best = Some((score, id.as_str()));
            }
        }
        best.map(|(_, id)| id)
    }

    /// Whether a fetched display name is close enough to a stored one to
    /// trust a name-keyed match.
    pub fn names_match(stored: &str, fetched: &str) -> bool {
        strsim::jaro_winkler(&normalize_name(stored), &normalize_name(fetched))
            >= NAME_MATCH_THRESHOLD
    }

    /// Fill any missing person id from the mapping. Present ids are never
    /// overwritten here; corrections against ground truth are emitted as
    /// patches by the merge engine instead.
    pub fn resolve_person(&self, person: &PersonRef) -> PersonRef {
        let mut resolved = person.clone();
        if resolved.alnum_id.as_deref().unwrap_or("").is_empty() {
            if let Some(numeric) = resolved.numeric_id.as_deref() {
                if let Some(alnum) = self.alnum_for_numeric(numeric) {
                    resolved.alnum_id = Some(alnum.to_string());
                }
            }
        }
        if resolved.alnum_id.as_deref().unwrap_or("").is_empty() && !resolved.name.trim().is_empty()
        {
            if let Some(alnum) = self.alnum_for_name(&resolved.name) {
                resolved.alnum_id = Some(alnum.to_string());
            }
        }
        if resolved.numeric_id.as_deref().unwrap_or("").is_empty() {
            if let Some(alnum) = resolved.alnum_id.as_deref() {
                if let Some(numeric) = self.numeric_for_alnum(alnum) {
                    resolved.numeric_id = Some(numeric.to_string());
                }
            }
        }
        resolved
    }

    /// Fill a show's canonical display name from the ground-truth table.
    /// The authoritative title replaces a divergent stored name; ids are
    /// only filled, never changed.
    pub fn resolve_show(&self, show: &ShowRef) -> ShowRef {
        let mut resolved = show.clone();
        if let Some(alnum) = resolved.alnum_id.as_deref() {
            if let Some(title) = self.canonical_show_title(alnum) {
                resolved.name = title.to_string();
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver_with(rows: &[(&str, &str, &str)]) -> IdentityResolver {
        let mut resolver = IdentityResolver::default();
        for (alnum, numeric_csv, name) in rows {
            resolver.insert_person_mapping(alnum, numeric_csv, name);
        }
        resolver
    }

    #[test]
    fn multi_value_numeric_cells_all_map_to_the_row_alnum() {
        let resolver = resolver_with(&[("nm1", "500, 501,502", "Pat Example")]);
        assert_eq!(resolver.alnum_for_numeric("500"), Some("nm1"));
        assert_eq!(resolver.alnum_for_numeric("501"), Some("nm1"));
        assert_eq!(resolver.alnum_for_numeric("502"), Some("nm1"));
        assert_eq!(resolver.numeric_for_alnum("nm1"), Some("500"));
    }

    #[test]
    fn first_seen_mapping_wins_over_later_conflicts() {
        let resolver = resolver_with(&[
            ("nm1", "500", "Pat Example"),
            ("nm2", "500", "Pat Imposter"),
        ]);
        assert_eq!(resolver.alnum_for_numeric("500"), Some("nm1"));
        assert_eq!(resolver.conflicts_ignored(), 1);
    }

    #[test]
    fn first_wins_is_stable_regardless_of_how_often_conflicts_repeat() {
        let mut resolver = resolver_with(&[("nm1", "500", "")]);
        for _ in 0..3 {
            resolver.insert_person_mapping("nm9", "500", "");
        }
        assert_eq!(resolver.alnum_for_numeric("500"), Some("nm1"));
        assert_eq!(resolver.conflicts_ignored(), 3);
    }

    #[test]
    fn unknown_ids_resolve_to_unchanged_input() {
        let resolver = resolver_with(&[]);
        let person = PersonRef {
            numeric_id: Some("999".into()),
            alnum_id: None,
            name: "Nobody Known".into(),
        };
        assert_eq!(resolver.resolve_person(&person), person);
    }

    #[test]
    fn resolve_fills_missing_ids_but_never_overwrites_present_ones() {
        let resolver = resolver_with(&[("nm1", "500", "Pat Example")]);

        let partial = PersonRef {
            numeric_id: Some("500".into()),
            alnum_id: None,
            name: "Pat Example".into(),
        };
        let resolved = resolver.resolve_person(&partial);
        assert_eq!(resolved.alnum_id.as_deref(), Some("nm1"));

        let already_set = PersonRef {
            numeric_id: Some("500".into()),
            alnum_id: Some("nm7".into()),
            name: "Pat Example".into(),
        };
        let resolved = resolver.resolve_person(&already_set);
        assert_eq!(resolved.alnum_id.as_deref(), Some("nm7"));
    }

    #[test]
    fn name_fallback_resolves_when_no_id_is_present() {
        let resolver = resolver_with(&[("nm1", "500", "Pat Example")]);
        let person = PersonRef::named("  pat   EXAMPLE ");
        let resolved = resolver.resolve_person(&person);
        assert_eq!(resolved.alnum_id.as_deref(), Some("nm1"));
        assert_eq!(resolved.numeric_id.as_deref(), Some("500"));
    }

    #[test]
    fn misspelled_name_resolves_through_the_similarity_guard() {
        let resolver = resolver_with(&[("nm1", "500", "Pat Example")]);
        let person = PersonRef::named("Pat Exampel");
        let resolved = resolver.resolve_person(&person);
        assert_eq!(resolved.alnum_id.as_deref(), Some("nm1"));
    }

    #[test]
    fn dissimilar_names_are_rejected_by_the_guard() {
        let resolver = resolver_with(&[("nm1", "500", "Pat Example")]);
        assert_eq!(resolver.alnum_for_name("Morgan Rivers"), None);
        let resolved = resolver.resolve_person(&PersonRef::named("Morgan Rivers"));
        assert_eq!(resolved.alnum_id, None);
    }

    #[test]
    fn fuzzy_fallback_picks_the_closest_stored_name() {
        let resolver = resolver_with(&[
            ("nm1", "500", "Pat Example"),
            ("nm2", "501", "Pat Examples Jr"),
        ]);
        assert_eq!(resolver.alnum_for_name("Pat Exampel"), Some("nm1"));
    }

    #[test]
    fn canonical_title_replaces_divergent_show_name() {
        let mut resolver = IdentityResolver::default();
        resolver.insert_show_title("tt100", "Survivor");
        resolver.insert_show_title("tt100", "Survivor (US)");
        let show = ShowRef {
            numeric_id: None,
            alnum_id: Some("tt100".into()),
            name: "survivor us".into(),
        };
        assert_eq!(resolver.resolve_show(&show).name, "Survivor");
    }

    #[test]
    fn near_identical_names_pass_the_similarity_guard() {
        assert!(IdentityResolver::names_match("Pat Example", "pat example"));
        assert!(IdentityResolver::names_match(
            "Pat Example",
            "Pat  Exampl"
        ));
        assert!(!IdentityResolver::names_match(
            "Pat Example",
            "Completely Different"
        ));
    }
}

//! Person-level table build.
//!
//! Flattens per-person aggregates into the denormalized person-table layout:
//! one row per person carrying name, both ids, totals and comma-joined show
//! id lists. Output order is deterministic (lowercased name, then alnum id as
//! a tiebreak) so repeated builds of the same snapshot are byte-identical.

use std::collections::BTreeMap;

use rcl_core::{AggregateStats, PersonKey};
use rcl_store::Table;

/// Header for the built table, in persisted column order.
pub const PERSON_TABLE_HEADER: [&str; 7] = [
    "PersonName",
    "PersonIMDbID",
    "PersonTMDbID",
    "TotalShows",
    "TotalEpisodes",
    "ShowIMDbID",
    "ShowTMDbID",
];

fn joined_sorted(values: impl Iterator<Item = String>) -> String {
    let mut list: Vec<String> = values.filter(|v| !v.is_empty()).collect();
    list.sort();
    list.dedup();
    list.join(", ")
}

pub fn build_person_rows(stats: &BTreeMap<PersonKey, AggregateStats>) -> Vec<Vec<String>> {
    let mut rows: Vec<Vec<String>> = stats
        .values()
        .map(|person| {
            let show_alnum_ids = joined_sorted(
                person
                    .shows
                    .values()
                    .filter_map(|s| s.show.alnum_id.clone()),
            );
            let show_numeric_ids = joined_sorted(
                person
                    .shows
                    .values()
                    .filter_map(|s| s.show.numeric_id.clone()),
            );
            vec![
                person.name.clone(),
                person.alnum_id.clone().unwrap_or_default(),
                person.numeric_id.clone().unwrap_or_default(),
                person.distinct_show_count().to_string(),
                person.total_episodes.to_string(),
                show_alnum_ids,
                show_numeric_ids,
            ]
        })
        .collect();
    rows.sort_by(|a, b| {
        (a[0].to_lowercase(), &a[1]).cmp(&(b[0].to_lowercase(), &b[1]))
    });
    rows
}

/// Rows to append to the output table. A missing or headerless target gets
/// the header row prepended so a fresh table is self-describing.
pub fn person_table_payload(target: Option<&Table>, rows: Vec<Vec<String>>) -> Vec<Vec<String>> {
    let has_header = target.map_or(false, |t| t.header.iter().any(|c| !c.trim().is_empty()));
    if has_header {
        return rows;
    }
    let mut payload = Vec::with_capacity(rows.len() + 1);
    payload.push(PERSON_TABLE_HEADER.iter().map(|c| c.to_string()).collect());
    payload.extend(rows);
    payload
}

//! Per-person appearance aggregation.
//!
//! A pure fold over resolved appearance records: no IO, recomputed from
//! scratch every run. Records group by person key, shows group by show key
//! inside each person, season labels union as a set, and the episode total is
//! derived from the per-show figures so that repeated records for the same
//! show never double-count.

use std::collections::BTreeMap;

use rcl_core::{AggregateStats, AppearanceRecord, PersonKey};
use tracing::debug;

/// Fold appearance records into per-person aggregates. Records with neither
/// an id nor a usable name are dropped and counted, not errored.
pub fn aggregate(records: &[AppearanceRecord]) -> AggregateOutcome {
    let mut stats: BTreeMap<PersonKey, AggregateStats> = BTreeMap::new();
    let mut skipped_unkeyed = 0usize;
    let mut skipped_showless = 0usize;

    for record in records {
        let Some(person_key) = record.person.key() else {
            skipped_unkeyed += 1;
            continue;
        };
        let Some(show_key) = record.show.key() else {
            skipped_showless += 1;
            continue;
        };

        let entry = stats.entry(person_key).or_default();
        if entry.name.is_empty() && !record.person.name.trim().is_empty() {
            entry.name = record.person.name.trim().to_string();
        }
        if entry.numeric_id.is_none() {
            entry.numeric_id = record
                .person
                .numeric_id
                .clone()
                .filter(|id| !id.is_empty());
        }
        if entry.alnum_id.is_none() {
            entry.alnum_id = record.person.alnum_id.clone().filter(|id| !id.is_empty());
        }

        let show_entry = entry.shows.entry(show_key).or_default();
        if show_entry.show.name.is_empty() {
            show_entry.show = record.show.clone();
        }
        if show_entry.show.numeric_id.is_none() {
            show_entry.show.numeric_id =
                record.show.numeric_id.clone().filter(|id| !id.is_empty());
        }
        // Sources disagree on episode figures for the same show; the larger
        // observation is kept so record order cannot change the result.
        if let Some(count) = record.episode_count {
            show_entry.episode_count = show_entry.episode_count.max(count);
        }
        show_entry.seasons.extend(record.seasons.iter().cloned());
    }

    for person in stats.values_mut() {
        person.total_episodes = person.shows.values().map(|s| s.episode_count).sum();
    }

    debug!(
        people = stats.len(),
        skipped_unkeyed, skipped_showless, "aggregation complete"
    );
    AggregateOutcome {
        stats,
        skipped_unkeyed,
        skipped_showless,
    }
}

#[derive(Debug, Default)]
pub struct AggregateOutcome {
    pub stats: BTreeMap<PersonKey, AggregateStats>,
    pub skipped_unkeyed: usize,
    pub skipped_showless: usize,
}

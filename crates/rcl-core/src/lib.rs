//! Core domain model for the Reality Cast Ledger.
//!
//! People and shows carry identifiers from two external namespaces that only
//! partially overlap: a numeric one (TMDb-style) and an alphanumeric one
//! (IMDb-style, `nm…` for people and `tt…` for shows). Nothing here talks to
//! a store; these are the value types the resolver, aggregator and merge
//! engine pass between each other.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "rcl-core";

/// Partial or resolved identity of a cast member.
///
/// Either id may be missing; resolution only ever fills a missing id, it
/// never overwrites a present one (identifier corrections against ground
/// truth are expressed as [`CorrectionPatch`]es, not as mutation here).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersonRef {
    pub numeric_id: Option<String>,
    pub alnum_id: Option<String>,
    pub name: String,
}

impl PersonRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            numeric_id: None,
            alnum_id: None,
            name: name.into(),
        }
    }

    /// Grouping key for aggregation: the alphanumeric id when known,
    /// otherwise the raw display name (lower fidelity; two distinct people
    /// sharing a name will merge under it).
    pub fn key(&self) -> Option<PersonKey> {
        if let Some(id) = self.alnum_id.as_deref().filter(|s| !s.is_empty()) {
            return Some(PersonKey::Alnum(id.to_string()));
        }
        if !self.name.trim().is_empty() {
            return Some(PersonKey::Name(self.name.trim().to_string()));
        }
        None
    }
}

/// Partial or resolved identity of a show.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShowRef {
    pub numeric_id: Option<String>,
    pub alnum_id: Option<String>,
    pub name: String,
}

impl ShowRef {
    pub fn key(&self) -> Option<ShowKey> {
        if let Some(id) = self.alnum_id.as_deref().filter(|s| !s.is_empty()) {
            return Some(ShowKey::Alnum(id.to_string()));
        }
        if !self.name.trim().is_empty() {
            return Some(ShowKey::Name(self.name.trim().to_string()));
        }
        None
    }
}

/// Aggregation key for a person. `Alnum` is authoritative; `Name` is the
/// documented fallback used when no id resolved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PersonKey {
    Alnum(String),
    Name(String),
}

impl PersonKey {
    pub fn is_resolved(&self) -> bool {
        matches!(self, PersonKey::Alnum(_))
    }
}

impl fmt::Display for PersonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersonKey::Alnum(id) => write!(f, "{id}"),
            PersonKey::Name(name) => write!(f, "name:{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ShowKey {
    Alnum(String),
    Name(String),
}

impl fmt::Display for ShowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShowKey::Alnum(id) => write!(f, "{id}"),
            ShowKey::Name(name) => write!(f, "name:{name}"),
        }
    }
}

/// Which source table a raw appearance row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceTag {
    Appearance,
    PersonTable,
}

/// One raw appearance row, pre-aggregation. Multiple records for the same
/// (person, show) pair may arrive from different source passes; they are
/// merged by the aggregator, never duplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppearanceRecord {
    pub person: PersonRef,
    pub show: ShowRef,
    pub episode_count: Option<u32>,
    pub seasons: BTreeSet<String>,
    pub source: SourceTag,
}

/// Per-show detail inside a person's aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShowStats {
    pub show: ShowRef,
    pub episode_count: u32,
    pub seasons: BTreeSet<String>,
}

/// Per-person aggregate, recomputed from scratch on every run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregateStats {
    pub name: String,
    pub numeric_id: Option<String>,
    pub alnum_id: Option<String>,
    pub shows: BTreeMap<ShowKey, ShowStats>,
    pub total_episodes: u32,
}

impl AggregateStats {
    pub fn distinct_show_count(&self) -> usize {
        self.shows.len()
    }
}

/// Composite key of a persisted viable row: (person alnum id, show alnum id).
/// Unique across the target table; the engine only appends rows whose key is
/// absent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompositeKey {
    pub person_alnum: String,
    pub show_alnum: String,
}

impl CompositeKey {
    pub fn new(person_alnum: impl Into<String>, show_alnum: impl Into<String>) -> Self {
        Self {
            person_alnum: person_alnum.into(),
            show_alnum: show_alnum.into(),
        }
    }
}

impl fmt::Display for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.person_alnum, self.show_alnum)
    }
}

/// A promoted (person, show) pairing in the denormalized column layout the
/// target table persists. Only these six columns are engine-owned; the two
/// trailing manual-annotation columns are never represented here because the
/// engine must never write them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViableRecord {
    pub show_alnum_id: String,
    pub person_numeric_id: String,
    pub person_name: String,
    pub person_alnum_id: String,
    pub show_numeric_id: String,
    pub show_name: String,
}

impl ViableRecord {
    pub fn composite_key(&self) -> CompositeKey {
        CompositeKey::new(self.person_alnum_id.clone(), self.show_alnum_id.clone())
    }

    /// Row cells in persisted column order.
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.show_alnum_id.clone(),
            self.person_numeric_id.clone(),
            self.person_name.clone(),
            self.person_alnum_id.clone(),
            self.show_numeric_id.clone(),
            self.show_name.clone(),
        ]
    }
}

/// A narrow, targeted overwrite of one cell on an existing persisted row,
/// produced only when a ground-truth identity source disagrees with (or can
/// fill) a stored identifier. `row` is 1-based to match sheet addressing;
/// `column` is a 0-based index into the persisted layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionPatch {
    pub row: usize,
    pub column: usize,
    pub value: String,
}

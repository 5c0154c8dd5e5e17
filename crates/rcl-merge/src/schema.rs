//! Column contracts for the source and target tables.
//!
//! Columns are resolved by normalized header name first, with a documented
//! positional fallback for sheets whose headers drifted. A required column
//! that is absent under both lookups is fatal before any write happens,
//! since proceeding would risk writing into the wrong column.

use rcl_store::Table;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("table '{table}' is missing required column '{column}'")]
    MissingColumn { table: String, column: String },
    #[error("table '{table}' has no header row")]
    EmptyHeader { table: String },
}

/// One required column: the canonical header name plus the position it has
/// historically occupied, used only when no header matches by name.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub fallback_index: usize,
}

fn normalize_header(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

pub fn resolve_column(table: &Table, spec: ColumnSpec) -> Result<usize, SchemaError> {
    if table.header.is_empty() {
        return Err(SchemaError::EmptyHeader {
            table: table.title.clone(),
        });
    }
    let wanted = normalize_header(spec.name);
    for (index, header) in table.header.iter().enumerate() {
        if normalize_header(header) == wanted {
            return Ok(index);
        }
    }
    if spec.fallback_index < table.header.len() {
        return Ok(spec.fallback_index);
    }
    Err(SchemaError::MissingColumn {
        table: table.title.clone(),
        column: spec.name.to_string(),
    })
}

/// Appearance source layout (and the identical viable-table layout): six
/// identifier/name columns followed by episode and season columns.
#[derive(Debug, Clone, Copy)]
pub struct AppearanceColumns {
    pub show_alnum: usize,
    pub person_numeric: usize,
    pub person_name: usize,
    pub person_alnum: usize,
    pub show_numeric: usize,
    pub show_name: usize,
    pub episodes: usize,
    pub seasons: usize,
}

impl AppearanceColumns {
    pub fn resolve(table: &Table) -> Result<Self, SchemaError> {
        Ok(Self {
            show_alnum: resolve_column(table, ColumnSpec { name: "Show IMDbID", fallback_index: 0 })?,
            person_numeric: resolve_column(table, ColumnSpec { name: "TMDb CastID", fallback_index: 1 })?,
            person_name: resolve_column(table, ColumnSpec { name: "CastName", fallback_index: 2 })?,
            person_alnum: resolve_column(table, ColumnSpec { name: "Cast IMDbID", fallback_index: 3 })?,
            show_numeric: resolve_column(table, ColumnSpec { name: "TMDb ShowID", fallback_index: 4 })?,
            show_name: resolve_column(table, ColumnSpec { name: "ShowName", fallback_index: 5 })?,
            episodes: resolve_column(table, ColumnSpec { name: "EpisodeCount", fallback_index: 6 })?,
            seasons: resolve_column(table, ColumnSpec { name: "Seasons", fallback_index: 7 })?,
        })
    }
}

/// Viable (target) table layout. Columns A-F are engine-owned; the episode
/// and season columns at the tail are reserved for manual annotation and are
/// never written by the engine.
#[derive(Debug, Clone, Copy)]
pub struct ViableColumns {
    pub show_alnum: usize,
    pub person_numeric: usize,
    pub person_name: usize,
    pub person_alnum: usize,
    pub show_numeric: usize,
    pub show_name: usize,
    pub reserved_episodes: usize,
    pub reserved_seasons: usize,
}

impl ViableColumns {
    pub fn resolve(table: &Table) -> Result<Self, SchemaError> {
        Ok(Self {
            show_alnum: resolve_column(table, ColumnSpec { name: "Show IMDbID", fallback_index: 0 })?,
            person_numeric: resolve_column(table, ColumnSpec { name: "TMDb CastID", fallback_index: 1 })?,
            person_name: resolve_column(table, ColumnSpec { name: "CastName", fallback_index: 2 })?,
            person_alnum: resolve_column(table, ColumnSpec { name: "Cast IMDbID", fallback_index: 3 })?,
            show_numeric: resolve_column(table, ColumnSpec { name: "TMDb ShowID", fallback_index: 4 })?,
            show_name: resolve_column(table, ColumnSpec { name: "ShowName", fallback_index: 5 })?,
            reserved_episodes: resolve_column(table, ColumnSpec { name: "EpisodeCount", fallback_index: 6 })?,
            reserved_seasons: resolve_column(table, ColumnSpec { name: "Seasons", fallback_index: 7 })?,
        })
    }
}

/// Identity-mapping (person-level) table layout. The numeric-id column may
/// carry a comma-separated multi-value list when a person was filed under
/// several numeric ids.
#[derive(Debug, Clone, Copy)]
pub struct PersonTableColumns {
    pub person_name: usize,
    pub person_alnum: usize,
    pub person_numeric: usize,
    pub total_shows: usize,
    pub total_episodes: usize,
    pub show_alnum_list: usize,
    pub show_numeric_list: usize,
}

impl PersonTableColumns {
    pub fn resolve(table: &Table) -> Result<Self, SchemaError> {
        Ok(Self {
            person_name: resolve_column(table, ColumnSpec { name: "PersonName", fallback_index: 0 })?,
            person_alnum: resolve_column(table, ColumnSpec { name: "PersonIMDbID", fallback_index: 1 })?,
            person_numeric: resolve_column(table, ColumnSpec { name: "PersonTMDbID", fallback_index: 2 })?,
            total_shows: resolve_column(table, ColumnSpec { name: "TotalShows", fallback_index: 3 })?,
            total_episodes: resolve_column(table, ColumnSpec { name: "TotalEpisodes", fallback_index: 4 })?,
            show_alnum_list: resolve_column(table, ColumnSpec { name: "ShowIMDbID", fallback_index: 5 })?,
            show_numeric_list: resolve_column(table, ColumnSpec { name: "ShowTMDbID", fallback_index: 6 })?,
        })
    }
}

/// Person-attribute columns on the person table: base value columns plus the
/// sibling `*-Update` columns reserved for manual curation.
#[derive(Debug, Clone, Copy)]
pub struct PersonAttributeColumns {
    pub person_numeric: usize,
    pub gender: usize,
    pub gender_update: usize,
    pub birthday: usize,
    pub birthday_update: usize,
}

impl PersonAttributeColumns {
    pub fn resolve(table: &Table) -> Result<Self, SchemaError> {
        Ok(Self {
            person_numeric: resolve_column(table, ColumnSpec { name: "PersonTMDbID", fallback_index: 2 })?,
            gender: resolve_column(table, ColumnSpec { name: "Gender", fallback_index: 9 })?,
            gender_update: resolve_column(table, ColumnSpec { name: "Gender-Update", fallback_index: 10 })?,
            birthday: resolve_column(table, ColumnSpec { name: "Birthday", fallback_index: 11 })?,
            birthday_update: resolve_column(table, ColumnSpec { name: "Birthday-Update", fallback_index: 12 })?,
        })
    }
}

/// Ground-truth show-title table: one authoritative name per alnum show id.
#[derive(Debug, Clone, Copy)]
pub struct ShowTableColumns {
    pub show_alnum: usize,
    pub show_name: usize,
}

impl ShowTableColumns {
    pub fn resolve(table: &Table) -> Result<Self, SchemaError> {
        Ok(Self {
            show_alnum: resolve_column(table, ColumnSpec { name: "IMDbSeriesID", fallback_index: 5 })?,
            show_name: resolve_column(table, ColumnSpec { name: "ShowName", fallback_index: 1 })?,
        })
    }
}

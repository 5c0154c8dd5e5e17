//! Field reconciliation for curated person attributes.
//!
//! Some person columns are shared between automation and human curators. Each
//! such column has a sibling `*-Update` column reserved for manual overrides
//! and a field-specific placeholder sentinel that marks "looked it up,
//! nothing found". Precedence is strict: a non-empty override freezes the
//! field entirely; a real (non-placeholder) stored value is never
//! overwritten; only empty or placeholder cells accept a fetched value.

use std::fmt;

/// A reconcilable column with its placeholder sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileField {
    Gender,
    Birthday,
}

impl ReconcileField {
    /// Whether a stored cell value is this field's placeholder.
    pub fn is_placeholder(&self, value: &str) -> bool {
        let trimmed = value.trim();
        match self {
            ReconcileField::Gender => trimmed.eq_ignore_ascii_case("unknown **"),
            ReconcileField::Birthday => trimmed == "**",
        }
    }

    /// The sentinel to write when a lookup found nothing, so the cell is not
    /// re-fetched forever.
    pub fn placeholder(&self) -> &'static str {
        match self {
            ReconcileField::Gender => "unknown **",
            ReconcileField::Birthday => " **",
        }
    }
}

impl fmt::Display for ReconcileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileField::Gender => write!(f, "Gender"),
            ReconcileField::Birthday => write!(f, "Birthday"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteDecision {
    Write(String),
    Keep(KeepReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepReason {
    OverridePresent,
    AlreadyFilled,
    NoCandidate,
}

/// Decide what, if anything, to write for one field. Pure; the caller turns
/// `Write` into a cell patch.
pub fn reconcile(
    field: ReconcileField,
    current: &str,
    override_value: &str,
    fetched: Option<&str>,
) -> WriteDecision {
    if !override_value.trim().is_empty() {
        return WriteDecision::Keep(KeepReason::OverridePresent);
    }
    let fillable = current.trim().is_empty() || field.is_placeholder(current);
    if !fillable {
        return WriteDecision::Keep(KeepReason::AlreadyFilled);
    }
    match fetched {
        Some(value) if !value.trim().is_empty() => WriteDecision::Write(value.trim().to_string()),
        _ => WriteDecision::Keep(KeepReason::NoCandidate),
    }
}

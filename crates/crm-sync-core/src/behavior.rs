//! The three closed behavior enums that configure a step (§9 "Configurable
//! behavior enums"). Each `Step` holds one default plus a per-field override
//! map; see [`crate::step::Step`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How an extraction step obtains its initial set of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtractionScope {
    /// `SELECT <fields> FROM <type>` with no filter.
    AllRecords,
    /// `SELECT <fields> FROM <type> WHERE <where_clause>`.
    Query,
    /// Seeded only by descendent-lookup fields pointing at already-extracted
    /// records of an earlier type.
    Descendents,
    /// No initial pass; records arrive only via dependency resolution. The
    /// configuration layer is expected to pre-seed the pending-dependency
    /// set for such steps before `execute` runs.
    SelectedRecords,
}

/// Whether a self-referencing lookup field is traced to discover more
/// records of the step's own type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelfLookupBehavior {
    TraceAll,
    TraceNone,
}

impl Default for SelfLookupBehavior {
    fn default() -> Self {
        SelfLookupBehavior::TraceAll
    }
}

/// What to do when a reference field points at a record outside the
/// operation's extracted/extractable set (an earlier type that hasn't
/// extracted the target, or a type not in the operation at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutsideLookupBehavior {
    Include,
    DropField,
    Error,
}

impl Default for OutsideLookupBehavior {
    fn default() -> Self {
        OutsideLookupBehavior::Include
    }
}

/// A step-level default plus per-field overrides for one of the behavior
/// enums above (§9 "each step holds a default plus a per-field override
/// map").
#[derive(Debug, Clone)]
pub struct FieldBehavior<T> {
    default: T,
    overrides: HashMap<String, T>,
}

impl<T: Copy + Default> Default for FieldBehavior<T> {
    fn default() -> Self {
        Self {
            default: T::default(),
            overrides: HashMap::new(),
        }
    }
}

impl<T: Copy> FieldBehavior<T> {
    pub fn with_default(default: T) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> T {
        self.overrides.get(field).copied().unwrap_or(self.default)
    }

    pub fn set(&mut self, field: &str, behavior: T) {
        self.overrides.insert(field.to_string(), behavior);
    }

    pub fn set_default(&mut self, default: T) {
        self.default = default;
    }
}

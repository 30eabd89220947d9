//! The row type that flows between transport, mapper, and file adapters:
//! an ordered mapping of column name to string value, mirroring the "row
//! file" model assumed by §6 (input/output files are row-oriented mappings
//! of column→string).

use indexmap::IndexMap;

/// One record, keyed by field/column name, values as their string wire form.
/// Order is preserved so that output files can be written in the step's
/// configured field order (§6: "the field ordering per file equals the
/// step's configured field list").
pub type Record = IndexMap<String, String>;

/// The constant column name holding a record's own identifier.
pub const ID_FIELD: &str = "Id";

/// Result-file column names (§6): load result files are row-oriented with
/// columns `Original Id`, `New Id`, and (on failure) `Error`.
pub const ORIGINAL_ID_FIELD: &str = "Original Id";
pub const NEW_ID_FIELD: &str = "New Id";
pub const ERROR_FIELD: &str = "Error";

/// Fetch and parse the record's own `Id` column.
pub fn record_id(row: &Record) -> Option<crate::id::Id> {
    row.get(ID_FIELD).and_then(|s| crate::id::Id::from_string(s).ok())
}

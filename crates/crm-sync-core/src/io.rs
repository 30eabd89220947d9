//! Row file reader/writer ports (§6: "row-oriented, each row a mapping of
//! column→string"). Concrete adapters (a CSV implementation) live in the
//! `crm-sync-io` crate; this crate only depends on the trait objects so that
//! `OperationContext` can hold arbitrary file handles without knowing their
//! concrete format.

use crate::record::Record;

/// Reads rows from an extraction output file / load input file.
pub trait RowReader: Send {
    fn read_row(&mut self) -> std::io::Result<Option<Record>>;
}

/// Writes rows to an extraction output file / load result file.
pub trait RowWriter: Send {
    fn write_row(&mut self, row: &Record) -> std::io::Result<()>;

    /// Flush and release the underlying handle. Idempotent: called by
    /// `OperationContext::close_files` on every exit path and safe to call
    /// more than once.
    fn close(&mut self) -> std::io::Result<()>;
}

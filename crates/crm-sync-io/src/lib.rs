//! # crm-sync-io - Row File Reader/Writer Adapters
//!
//! Concrete implementations of the [`crm_sync_core::io::RowReader`] and
//! [`crm_sync_core::io::RowWriter`] ports the engine holds as trait objects
//! for its extraction output files, load input files, and load result files.
//!
//! ## Features
//!
//! - **CSV**: the reference row-file format. Extraction output, load input,
//!   and load result files are all ordinary CSV with a header row. Column
//!   order on write follows the step's configured field list (§6); column
//!   order on read follows the file's own header.
//!
//! Per the distilled specification, the row file reader/writer is treated as
//! an external collaborator: "assumed to stream mappings of column→string."
//! This crate is the one illustrative adapter satisfying that assumption, not
//! a hardened implementation of every serialization format a real migration
//! tool might need.

/// CSV row file reader/writer.
pub mod csv;

pub use csv::{CsvRowReader, CsvRowWriter};

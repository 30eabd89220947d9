//! # crm-sync-core
//!
//! The extraction and load engine for the CRM record-graph sync tool: a
//! dependency-directed multi-pass traversal that discovers and fetches
//! records across related object types, and a symmetric two-phase load that
//! re-inserts them into a target tenant, remapping every internal identifier
//! and resolving cyclic or self-referential links in a follow-up pass.
//!
//! Everything here is transport- and file-format-agnostic: it consumes the
//! [`transport::Transport`] and [`io::RowReader`]/[`io::RowWriter`] traits,
//! leaving the `reqwest`-backed REST/Bulk client and the CSV row adapter to
//! the `crm-sync-transport` and `crm-sync-io` crates respectively.
//!
//! ## Layout
//!
//! - [`id`]: canonicalized 15/18-character record identifiers.
//! - [`describe`]: per-object-type field metadata and the tenant-wide
//!   object list used to build the key-prefix table.
//! - [`behavior`]: the closed enums that configure a step's scope and
//!   lookup handling (`ExtractionScope`, `SelfLookupBehavior`,
//!   `OutsideLookupBehavior`).
//! - [`step`]: the field-classification shared by extraction and load steps.
//! - [`extract`] / [`load`]: the two step state machines.
//! - [`mapper`]: column renaming and value transforms applied to rows.
//! - [`context`]: the shared `OperationContext` every step reads and
//!   mutates.
//! - [`operation`]: `ExtractOperation`/`LoadOperation`, the orchestrators
//!   that drive steps in declared order and own file-handle lifecycle.
//! - [`transport`]: the `Transport` port.
//! - [`io`]: the `RowReader`/`RowWriter` ports.
//! - [`error`]: configuration-class error types.
//! - [`testing`]: in-memory test doubles, exported (not `#[cfg(test)]`-gated)
//!   so downstream crates' integration tests can use them too.

pub mod behavior;
pub mod context;
pub mod describe;
pub mod error;
pub mod extract;
pub mod id;
pub mod io;
pub mod load;
pub mod mapper;
pub mod operation;
pub mod record;
pub mod step;
pub mod testing;
pub mod transport;

pub use context::OperationContext;
pub use error::{ConfigError, IdError, OperationError};
pub use extract::ExtractionStep;
pub use id::Id;
pub use load::LoadStep;
pub use operation::{ExtractOperation, LoadOperation};
pub use record::Record;
pub use step::Step;
pub use transport::Transport;

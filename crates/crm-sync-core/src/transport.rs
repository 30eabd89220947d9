//! The transport boundary (§6): a synchronous single-record query API and an
//! asynchronous bulk API. This crate only defines the port; the reference
//! `reqwest`-backed adapter lives in the `crm-sync-transport` crate, and an
//! in-memory adapter used by this crate's own tests lives in
//! [`crate::testing`].

use async_trait::async_trait;
use thiserror::Error;

use crate::describe::{DescribeResult, GlobalDescribeResult};
use crate::record::Record;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport request failed: {0}")]
    Request(String),

    #[error("transport returned malformed response: {0}")]
    Malformed(String),
}

/// The result of a synchronous `query`/`query_all` call.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub records: Vec<Record>,
}

/// The outcome of one record in a bulk `insert`/`update` call, positionally
/// indexed to the submitted batch (§4.E).
#[derive(Debug, Clone)]
pub struct BulkResult {
    pub success: bool,
    pub id: Option<String>,
    pub errors: Vec<BulkRecordError>,
}

/// One error reported against a bulk record, carrying the fields the
/// transport blamed so the engine can build the `§7` failure message.
#[derive(Debug, Clone)]
pub struct BulkRecordError {
    pub status_code: String,
    pub message: String,
    pub fields: Vec<String>,
}

/// The transport primitives the engine consumes. Implementations are
/// expected to block (from the step's point of view) until bulk work
/// completes. See §5: "bulk jobs are submitted and polled synchronously
/// from the step's viewpoint."
#[async_trait]
pub trait Transport: Send + Sync {
    /// Synchronous single query; does not include soft-deleted/archived rows.
    async fn query(&self, soql: &str) -> Result<QueryResult, TransportError>;

    /// Synchronous single query including soft-deleted/archived rows.
    async fn query_all(&self, soql: &str) -> Result<QueryResult, TransportError>;

    /// Per-object-type field metadata.
    async fn describe(&self, sobject: &str) -> Result<DescribeResult, TransportError>;

    /// Tenant-wide object type list, used to build the key-prefix table.
    async fn describe_global(&self) -> Result<GlobalDescribeResult, TransportError>;

    /// Submit a bulk query and return every matching row.
    async fn bulk_query(&self, sobject: &str, soql: &str) -> Result<Vec<Record>, TransportError>;

    /// Bulk insert; results are positionally indexed to `rows`.
    async fn bulk_insert(
        &self,
        sobject: &str,
        rows: Vec<Record>,
    ) -> Result<Vec<BulkResult>, TransportError>;

    /// Bulk update; results are positionally indexed to `rows`.
    async fn bulk_update(
        &self,
        sobject: &str,
        rows: Vec<Record>,
    ) -> Result<Vec<BulkResult>, TransportError>;
}

//! In-memory test doubles: a `Transport` the engine's own test suite drives
//! without a network, and `RowReader`/`RowWriter` backed by a `Vec` so tests
//! can assert on exactly what was written. Always compiled (not gated to
//! `#[cfg(test)]`) so downstream crates' integration tests can use them too.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::describe::{DescribeResult, GlobalDescribeResult, SObjectInfo};
use crate::io::{RowReader, RowWriter};
use crate::record::Record;
use crate::transport::{BulkResult, QueryResult, Transport, TransportError};

/// An in-memory `Transport` driven entirely by calls to its `set_*`/`push_*`
/// setup methods and inspected afterwards via its `recorded_*` accessors.
#[derive(Default)]
pub struct MockTransport {
    describes: Mutex<HashMap<String, DescribeResult>>,
    global: Mutex<GlobalDescribeResult>,
    query_queue: Mutex<VecDeque<QueryResult>>,
    query_all_queue: Mutex<VecDeque<QueryResult>>,
    bulk_query_queue: Mutex<HashMap<String, VecDeque<Vec<Record>>>>,
    bulk_insert_queue: Mutex<HashMap<String, VecDeque<Vec<BulkResult>>>>,
    bulk_update_queue: Mutex<HashMap<String, VecDeque<Vec<BulkResult>>>>,
    recorded_queries: Mutex<Vec<String>>,
    recorded_bulk_inserts: Mutex<Vec<(String, Vec<Record>)>>,
    recorded_bulk_updates: Mutex<Vec<(String, Vec<Record>)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_describe(&self, sobject: &str, describe: DescribeResult) {
        self.describes.lock().unwrap().insert(sobject.to_string(), describe);
    }

    pub fn add_prefix(&self, prefix: &str, sobject: &str) {
        self.global.lock().unwrap().sobjects.push(SObjectInfo {
            name: sobject.to_string(),
            key_prefix: prefix.to_string(),
        });
    }

    pub fn push_query_result(&self, result: QueryResult) {
        self.query_queue.lock().unwrap().push_back(result);
    }

    pub fn push_query_all_result(&self, result: QueryResult) {
        self.query_all_queue.lock().unwrap().push_back(result);
    }

    pub fn push_bulk_query_result(&self, sobject: &str, rows: Vec<Record>) {
        self.bulk_query_queue
            .lock()
            .unwrap()
            .entry(sobject.to_string())
            .or_default()
            .push_back(rows);
    }

    pub fn push_bulk_insert_result(&self, sobject: &str, results: Vec<BulkResult>) {
        self.bulk_insert_queue
            .lock()
            .unwrap()
            .entry(sobject.to_string())
            .or_default()
            .push_back(results);
    }

    pub fn push_bulk_update_result(&self, sobject: &str, results: Vec<BulkResult>) {
        self.bulk_update_queue
            .lock()
            .unwrap()
            .entry(sobject.to_string())
            .or_default()
            .push_back(results);
    }

    pub fn recorded_queries(&self) -> Vec<String> {
        self.recorded_queries.lock().unwrap().clone()
    }

    pub fn recorded_bulk_inserts(&self) -> Vec<(String, Vec<Record>)> {
        self.recorded_bulk_inserts.lock().unwrap().clone()
    }

    pub fn recorded_bulk_updates(&self) -> Vec<(String, Vec<Record>)> {
        self.recorded_bulk_updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn query(&self, soql: &str) -> Result<QueryResult, TransportError> {
        self.recorded_queries.lock().unwrap().push(soql.to_string());
        Ok(self.query_queue.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn query_all(&self, soql: &str) -> Result<QueryResult, TransportError> {
        self.recorded_queries.lock().unwrap().push(soql.to_string());
        Ok(self.query_all_queue.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn describe(&self, sobject: &str) -> Result<DescribeResult, TransportError> {
        self.describes
            .lock()
            .unwrap()
            .get(sobject)
            .cloned()
            .ok_or_else(|| TransportError::Malformed(format!("no describe configured for {sobject}")))
    }

    async fn describe_global(&self) -> Result<GlobalDescribeResult, TransportError> {
        Ok(self.global.lock().unwrap().clone())
    }

    async fn bulk_query(&self, sobject: &str, soql: &str) -> Result<Vec<Record>, TransportError> {
        self.recorded_queries.lock().unwrap().push(soql.to_string());
        Ok(self
            .bulk_query_queue
            .lock()
            .unwrap()
            .get_mut(sobject)
            .and_then(|q| q.pop_front())
            .unwrap_or_default())
    }

    async fn bulk_insert(
        &self,
        sobject: &str,
        rows: Vec<Record>,
    ) -> Result<Vec<BulkResult>, TransportError> {
        self.recorded_bulk_inserts
            .lock()
            .unwrap()
            .push((sobject.to_string(), rows.clone()));
        if let Some(results) = self
            .bulk_insert_queue
            .lock()
            .unwrap()
            .get_mut(sobject)
            .and_then(|q| q.pop_front())
        {
            return Ok(results);
        }
        Ok(rows
            .iter()
            .map(|_| BulkResult {
                success: true,
                id: Some("000000000000000".to_string()),
                errors: Vec::new(),
            })
            .collect())
    }

    async fn bulk_update(
        &self,
        sobject: &str,
        rows: Vec<Record>,
    ) -> Result<Vec<BulkResult>, TransportError> {
        self.recorded_bulk_updates
            .lock()
            .unwrap()
            .push((sobject.to_string(), rows.clone()));
        if let Some(results) = self
            .bulk_update_queue
            .lock()
            .unwrap()
            .get_mut(sobject)
            .and_then(|q| q.pop_front())
        {
            return Ok(results);
        }
        Ok(rows.iter().map(|_| BulkResult { success: true, id: None, errors: Vec::new() }).collect())
    }
}

/// An in-memory `RowWriter` backed by a shared `Vec`, so a test can hold on
/// to the `Arc<Mutex<..>>` after handing the boxed writer to the context and
/// assert on exactly what was written.
#[derive(Clone, Default)]
pub struct VecRowWriter {
    pub rows: Arc<Mutex<Vec<Record>>>,
    pub closed: Arc<Mutex<bool>>,
}

impl VecRowWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Record> {
        self.rows.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

impl RowWriter for VecRowWriter {
    fn write_row(&mut self, row: &Record) -> std::io::Result<()> {
        self.rows.lock().unwrap().push(row.clone());
        Ok(())
    }

    fn close(&mut self) -> std::io::Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

/// An in-memory `RowReader` that yields a fixed, pre-loaded sequence of rows.
pub struct VecRowReader {
    rows: VecDeque<Record>,
}

impl VecRowReader {
    pub fn new(rows: Vec<Record>) -> Self {
        Self { rows: rows.into() }
    }
}

impl RowReader for VecRowReader {
    fn read_row(&mut self) -> std::io::Result<Option<Record>> {
        Ok(self.rows.pop_front())
    }
}

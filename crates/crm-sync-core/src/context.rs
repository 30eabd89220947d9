//! The shared state every step reads and mutates (§3, §4.B): transport
//! handle, per-type describe cache, id→type prefix table, extracted-id and
//! pending-dependency sets, field mappers, and the input/output file
//! registry.
//!
//! Steps never own a reference back to their `Operation`; instead
//! `Operation::execute` passes `&mut OperationContext` into each step call
//! explicitly (§9 "Back-references in the context").

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::describe::{DescribeResult, FieldDescriptor};
use crate::id::Id;
use crate::io::{RowReader, RowWriter};
use crate::mapper::DataMapper;
use crate::record::{Record, ERROR_FIELD, NEW_ID_FIELD, ORIGINAL_ID_FIELD};
use crate::transport::{BulkResult, Transport, TransportError};

/// A cached handle bound to one object type. `OperationContext` hands out
/// the same handle on every call for a given type (§4.B: "cached transport
/// handles per type"); both `get_proxy_object` (single-record API) and
/// `get_bulk_proxy_object` (bulk API) resolve to this, since the underlying
/// `Transport` already unifies both surfaces behind one trait.
#[derive(Clone)]
pub struct SObjectHandle {
    transport: Arc<dyn Transport>,
    sobject: String,
}

impl SObjectHandle {
    pub fn sobject(&self) -> &str {
        &self.sobject
    }

    pub async fn query(&self, soql: &str) -> Result<crate::transport::QueryResult, TransportError> {
        self.transport.query(soql).await
    }

    pub async fn query_all(&self, soql: &str) -> Result<crate::transport::QueryResult, TransportError> {
        self.transport.query_all(soql).await
    }

    pub async fn bulk_query(&self, soql: &str) -> Result<Vec<Record>, TransportError> {
        self.transport.bulk_query(&self.sobject, soql).await
    }

    pub async fn bulk_insert(&self, rows: Vec<Record>) -> Result<Vec<BulkResult>, TransportError> {
        self.transport.bulk_insert(&self.sobject, rows).await
    }

    pub async fn bulk_update(&self, rows: Vec<Record>) -> Result<Vec<BulkResult>, TransportError> {
        self.transport.bulk_update(&self.sobject, rows).await
    }
}

/// Shared state for one extraction or load operation. Created once, mutated
/// only by the currently executing step, and read-only after `execute`
/// returns (§3 Lifecycle).
pub struct OperationContext {
    transport: Arc<dyn Transport>,

    /// Ordered list of object types registered via `add_step`, in step order.
    sobject_order: Vec<String>,

    describe_cache: HashMap<String, DescribeResult>,
    field_map_cache: HashMap<String, HashMap<String, FieldDescriptor>>,
    /// Three-char prefix -> object type name, populated lazily on first use.
    prefix_table: HashMap<String, String>,

    proxies: HashMap<String, SObjectHandle>,

    mappers: HashMap<String, DataMapper>,

    // Extraction-only state.
    extracted_ids: HashMap<String, HashSet<Id>>,
    pending_dependencies: HashMap<String, HashSet<Id>>,
    output_files: HashMap<String, Box<dyn RowWriter>>,

    // Load-only state.
    input_files: HashMap<String, Box<dyn RowReader>>,
    result_files: HashMap<String, Box<dyn RowWriter>>,
    id_remap: HashMap<String, Id>,

    files_closed: bool,
}

impl OperationContext {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            sobject_order: Vec::new(),
            describe_cache: HashMap::new(),
            field_map_cache: HashMap::new(),
            prefix_table: HashMap::new(),
            proxies: HashMap::new(),
            mappers: HashMap::new(),
            extracted_ids: HashMap::new(),
            pending_dependencies: HashMap::new(),
            output_files: HashMap::new(),
            input_files: HashMap::new(),
            result_files: HashMap::new(),
            id_remap: HashMap::new(),
            files_closed: false,
        }
    }

    /// Register an object type in step order. Called once per step by
    /// `Operation::add_step`; idempotent for a given name.
    pub fn register_sobject(&mut self, sobject: &str) {
        if !self.sobject_order.contains(&sobject.to_string()) {
            self.sobject_order.push(sobject.to_string());
        }
        self.extracted_ids.entry(sobject.to_string()).or_default();
        self.pending_dependencies.entry(sobject.to_string()).or_default();
    }

    pub fn get_sobject_list(&self) -> &[String] {
        &self.sobject_order
    }

    pub fn register_mapper(&mut self, sobject: &str, mapper: DataMapper) {
        self.mappers.insert(sobject.to_string(), mapper);
    }

    pub async fn get_describe(&mut self, sobject: &str) -> Result<&DescribeResult, TransportError> {
        if !self.describe_cache.contains_key(sobject) {
            let describe = self.transport.describe(sobject).await?;
            self.field_map_cache
                .insert(sobject.to_string(), describe.field_map());
            self.describe_cache.insert(sobject.to_string(), describe);
        }
        Ok(self.describe_cache.get(sobject).expect("just inserted"))
    }

    pub async fn get_field_map(
        &mut self,
        sobject: &str,
    ) -> Result<&HashMap<String, FieldDescriptor>, TransportError> {
        self.get_describe(sobject).await?;
        Ok(self.field_map_cache.get(sobject).expect("populated by get_describe"))
    }

    /// Like `get_field_map`, but returns only the fields matching `predicate`.
    /// Not cached: the predicate varies per call, the underlying map is.
    pub async fn get_filtered_field_map(
        &mut self,
        sobject: &str,
        predicate: impl Fn(&FieldDescriptor) -> bool,
    ) -> Result<HashMap<String, FieldDescriptor>, TransportError> {
        let map = self.get_field_map(sobject).await?;
        Ok(map
            .iter()
            .filter(|(_, d)| predicate(d))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// Classify an id by its three-character prefix, populating the
    /// key-prefix table from the tenant's global describe on first use.
    pub async fn get_sobject_name_for_id(
        &mut self,
        id: &Id,
    ) -> Result<Option<String>, TransportError> {
        if self.prefix_table.is_empty() {
            let global = self.transport.describe_global().await?;
            for sobject in global.sobjects {
                self.prefix_table.insert(sobject.key_prefix, sobject.name);
            }
        }
        Ok(self.prefix_table.get(id.prefix()).cloned())
    }

    fn proxy_for(&mut self, sobject: &str) -> SObjectHandle {
        self.proxies
            .entry(sobject.to_string())
            .or_insert_with(|| SObjectHandle {
                transport: Arc::clone(&self.transport),
                sobject: sobject.to_string(),
            })
            .clone()
    }

    pub fn get_proxy_object(&mut self, sobject: &str) -> SObjectHandle {
        self.proxy_for(sobject)
    }

    pub fn get_bulk_proxy_object(&mut self, sobject: &str) -> SObjectHandle {
        self.proxy_for(sobject)
    }

    // --- Extraction-only state ---------------------------------------

    pub fn set_output_file(&mut self, sobject: &str, writer: Box<dyn RowWriter>) {
        self.output_files.insert(sobject.to_string(), writer);
    }

    /// The choke point for every extracted row (§4.B). Returns `true` if
    /// the row was newly written, `false` if it was already extracted.
    pub fn store_result(&mut self, sobject: &str, row: Record) -> std::io::Result<bool> {
        let id = match crate::record::record_id(&row) {
            Some(id) => id,
            None => return Ok(false),
        };

        let extracted = self.extracted_ids.entry(sobject.to_string()).or_default();
        if extracted.contains(&id) {
            return Ok(false);
        }
        extracted.insert(id.clone());

        if let Some(pending) = self.pending_dependencies.get_mut(sobject) {
            pending.remove(&id);
        }

        let mapped = match self.mappers.get(sobject) {
            Some(mapper) => mapper.transform_record(&row),
            None => row,
        };

        if let Some(writer) = self.output_files.get_mut(sobject) {
            writer.write_row(&mapped)?;
        }

        Ok(true)
    }

    /// Apply the type's registered mapper (if any) to `row`. Extraction
    /// applies this inside `store_result`; load applies it explicitly while
    /// reading each input row (§4.E step 2a), since load has no single choke
    /// point equivalent to `store_result` on the write side.
    pub fn transform_with_mapper(&self, sobject: &str, row: &Record) -> Record {
        match self.mappers.get(sobject) {
            Some(mapper) => mapper.transform_record(row),
            None => row.clone(),
        }
    }

    pub fn get_extracted_ids(&self, sobject: &str) -> HashSet<Id> {
        self.extracted_ids.get(sobject).cloned().unwrap_or_default()
    }

    pub fn get_dependencies(&self, sobject: &str) -> HashSet<Id> {
        self.pending_dependencies.get(sobject).cloned().unwrap_or_default()
    }

    /// Register `id` as a dependency of `sobject`. A no-op if `id` is
    /// already extracted for that type (§3 invariant: an id is never in
    /// both sets simultaneously).
    pub fn add_dependency(&mut self, sobject: &str, id: Id) {
        if self
            .extracted_ids
            .get(sobject)
            .map(|s| s.contains(&id))
            .unwrap_or(false)
        {
            return;
        }
        self.pending_dependencies
            .entry(sobject.to_string())
            .or_default()
            .insert(id);
    }

    /// The ids to filter `sobject`'s descendent-lookup query on: the
    /// already-extracted ids of the field's target type. `field` is kept in
    /// the signature so callers can validate it names an actual reference
    /// field on `sobject`; the returned set depends only on the target
    /// type's extracted ids.
    pub fn get_sobject_ids_for_reference(&self, target_sobject: &str, _field: &str) -> HashSet<Id> {
        self.get_extracted_ids(target_sobject)
    }

    // --- Load-only state -----------------------------------------------

    pub fn set_input_file(&mut self, sobject: &str, reader: Box<dyn RowReader>) {
        self.input_files.insert(sobject.to_string(), reader);
    }

    pub fn read_input_row(&mut self, sobject: &str) -> std::io::Result<Option<Record>> {
        match self.input_files.get_mut(sobject) {
            Some(reader) => reader.read_row(),
            None => Ok(None),
        }
    }

    pub fn set_result_file(&mut self, sobject: &str, writer: Box<dyn RowWriter>) {
        self.result_files.insert(sobject.to_string(), writer);
    }

    /// Record a newly-inserted record's remapped id and append a
    /// `{Original Id, New Id}` row to the type's result file.
    pub fn register_new_id(&mut self, sobject: &str, old: &Id, new: &Id) -> std::io::Result<()> {
        self.id_remap.insert(old.as_18().to_string(), new.clone());
        if let Some(writer) = self.result_files.get_mut(sobject) {
            let mut row = Record::new();
            row.insert(ORIGINAL_ID_FIELD.to_string(), old.as_18().to_string());
            row.insert(NEW_ID_FIELD.to_string(), new.as_18().to_string());
            writer.write_row(&row)?;
        }
        Ok(())
    }

    /// Look up the new id for a previously-loaded record; `None` for an
    /// unknown id (the load's "append-only... look-up returns null" map).
    pub fn get_new_id(&self, old: &str) -> Option<Id> {
        let canonical = Id::from_string(old).ok()?;
        self.id_remap.get(canonical.as_18()).cloned()
    }

    /// Append a `{Original Id, New Id: "", Error}` row per failed record.
    pub fn write_errors(
        &mut self,
        sobject: &str,
        errors: &HashMap<String, String>,
    ) -> std::io::Result<()> {
        if let Some(writer) = self.result_files.get_mut(sobject) {
            for (old_id, message) in errors {
                let mut row = Record::new();
                row.insert(ORIGINAL_ID_FIELD.to_string(), old_id.clone());
                row.insert(NEW_ID_FIELD.to_string(), String::new());
                row.insert(ERROR_FIELD.to_string(), message.clone());
                writer.write_row(&row)?;
            }
        }
        Ok(())
    }

    /// Close every opened file handle. Idempotent.
    pub fn close_files(&mut self) -> std::io::Result<()> {
        if self.files_closed {
            return Ok(());
        }
        self.files_closed = true;

        let mut first_err = None;
        for writer in self.output_files.values_mut().chain(self.result_files.values_mut()) {
            if let Err(e) = writer.close() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

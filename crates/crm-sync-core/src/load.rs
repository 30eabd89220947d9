//! The load step (§4.E): two-phase insert, then a dependent-update pass that
//! repopulates the self/dependent lookups withheld from the insert batch.

use std::collections::HashMap;

use anyhow::Result;
use tracing::{info, warn};

use crate::behavior::{FieldBehavior, OutsideLookupBehavior};
use crate::context::OperationContext;
use crate::id::Id;
use crate::record::{record_id, Record, ID_FIELD};
use crate::step::Step;

/// One object type's load: its `Step` plus the per-field outside-lookup
/// behavior and accumulated per-record errors. Derefs to `Step`.
pub struct LoadStep {
    step: Step,
    outside_lookup_behavior: FieldBehavior<OutsideLookupBehavior>,
    /// `{original id -> failure message}` (§7 kind 2/4 for load).
    pub errors: HashMap<String, String>,
    /// Self/dependent-lookup field values withheld from the insert batch,
    /// keyed by the record's original id, replayed by
    /// `execute_dependent_updates`.
    dependent_lookup_records: HashMap<Id, Record>,
}

impl std::ops::Deref for LoadStep {
    type Target = Step;
    fn deref(&self) -> &Step {
        &self.step
    }
}

impl std::ops::DerefMut for LoadStep {
    fn deref_mut(&mut self) -> &mut Step {
        &mut self.step
    }
}

impl LoadStep {
    pub fn new(sobject_name: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            step: Step::new(sobject_name, fields),
            outside_lookup_behavior: FieldBehavior::with_default(OutsideLookupBehavior::default()),
            errors: HashMap::new(),
            dependent_lookup_records: HashMap::new(),
        }
    }

    /// Overrides this step's default outside-lookup behavior; per-field
    /// overrides set afterward still win for their field.
    pub fn set_outside_lookup_behavior_default(&mut self, behavior: OutsideLookupBehavior) {
        self.outside_lookup_behavior.set_default(behavior);
    }

    pub fn get_outside_lookup_behavior_for_field(&self, field: &str) -> OutsideLookupBehavior {
        self.outside_lookup_behavior.get(field)
    }

    pub fn set_outside_lookup_behavior_for_field(
        &mut self,
        field: &str,
        behavior: OutsideLookupBehavior,
    ) {
        self.outside_lookup_behavior.set(field, behavior);
    }

    /// Phase 1: read every input row, clean it per §4.E step 2, and submit
    /// the batch via `bulk.insert`.
    pub async fn execute(&mut self, ctx: &mut OperationContext) -> Result<()> {
        info!(sobject = %self.step.sobject_name, "starting load step");

        let mut batch = Vec::new();
        let mut original_ids = Vec::new();

        while let Some(raw_row) = ctx.read_input_row(&self.step.sobject_name)? {
            let mapped = ctx.transform_with_mapper(&self.step.sobject_name, &raw_row);
            let Some(original_id) = record_id(&mapped) else {
                warn!(sobject = %self.step.sobject_name, "input row missing a valid Id column; skipped");
                continue;
            };

            let mut record = Record::new();
            for field in &self.step.fields {
                if field == ID_FIELD {
                    continue;
                }
                if let Some(value) = mapped.get(field) {
                    record.insert(field.clone(), value.clone());
                }
            }

            let mut deferred = Record::new();
            for field in self.step.self_lookups.iter().chain(self.step.dependent_lookups.iter()) {
                if let Some(value) = record.shift_remove(field) {
                    deferred.insert(field.clone(), value);
                }
            }
            if !deferred.is_empty() {
                self.dependent_lookup_records.insert(original_id.clone(), deferred);
            }

            let remaining_fields: Vec<String> = record.keys().cloned().collect();
            let mut failed = false;
            for field in remaining_fields {
                if !self.step.all_lookups.contains(&field) {
                    continue;
                }
                let old_value = record.get(&field).cloned().unwrap_or_default();
                match self
                    .get_value_for_lookup(ctx, &field, &old_value, original_id.as_18())
                    .await
                {
                    Ok(new_value) => {
                        record.insert(field.clone(), new_value);
                    }
                    Err(message) => {
                        self.errors.insert(original_id.as_18().to_string(), message);
                        failed = true;
                        break;
                    }
                }
            }
            if failed {
                continue;
            }

            for value in record.values_mut() {
                *value = primitivize(value);
            }
            // Empty strings pass through as empty rather than being nulled here.
            // `Record` is a string-keyed map with no null variant, so there is no
            // representable distinction between "empty" and "null" at this point;
            // a transport that needs one has to encode it on the wire.

            batch.push(record);
            original_ids.push(original_id);
        }

        if batch.is_empty() {
            return Ok(());
        }

        let handle = ctx.get_bulk_proxy_object(&self.step.sobject_name);
        let results = handle.bulk_insert(batch).await?;

        for (old_id, result) in original_ids.into_iter().zip(results) {
            if result.success {
                if let Some(new_id) = result.id.as_deref().and_then(|s| Id::from_string(s).ok()) {
                    ctx.register_new_id(&self.step.sobject_name, &old_id, &new_id)?;
                }
            } else {
                self.errors.insert(
                    old_id.as_18().to_string(),
                    format!(
                        "Failed to load {} {}: {}",
                        self.step.sobject_name,
                        old_id.as_18(),
                        describe_bulk_failure(&result)
                    ),
                );
            }
        }

        Ok(())
    }

    /// Phase 2: remap each withheld self/dependent-lookup row's own id and
    /// field values now that every record of this type (and every earlier
    /// type) has a new id, then submit via `bulk.update`.
    pub async fn execute_dependent_updates(&mut self, ctx: &mut OperationContext) -> Result<()> {
        if self.dependent_lookup_records.is_empty() {
            return Ok(());
        }
        info!(sobject = %self.step.sobject_name, "resolving dependent updates");

        let entries: Vec<(Id, Record)> = self.dependent_lookup_records.drain().collect();
        let mut batch = Vec::new();
        let mut old_ids = Vec::new();

        for (old_id, deferred_fields) in entries {
            // Phase 1's insert failed for this record; nothing to update.
            let Some(new_id) = ctx.get_new_id(old_id.as_18()) else {
                continue;
            };

            let mut update_row = Record::new();
            update_row.insert(ID_FIELD.to_string(), new_id.as_18().to_string());

            let mut failed = false;
            for (field, old_value) in &deferred_fields {
                match self
                    .get_value_for_lookup(ctx, field, old_value, old_id.as_18())
                    .await
                {
                    Ok(new_value) => {
                        update_row.insert(field.clone(), new_value);
                    }
                    Err(message) => {
                        self.errors.insert(
                            old_id.as_18().to_string(),
                            format!(
                                "Failed to execute dependent updates for {} {}: {}",
                                self.step.sobject_name,
                                old_id.as_18(),
                                message
                            ),
                        );
                        failed = true;
                        break;
                    }
                }
            }
            if failed {
                continue;
            }

            batch.push(update_row);
            old_ids.push(old_id);
        }

        if batch.is_empty() {
            return Ok(());
        }

        let handle = ctx.get_bulk_proxy_object(&self.step.sobject_name);
        let results = handle.bulk_update(batch).await?;

        for (old_id, result) in old_ids.into_iter().zip(results) {
            if !result.success {
                self.errors.insert(
                    old_id.as_18().to_string(),
                    format!(
                        "Failed to execute dependent updates for {} {}: {}",
                        self.step.sobject_name,
                        old_id.as_18(),
                        describe_bulk_failure(&result)
                    ),
                );
            }
        }

        Ok(())
    }

    /// `get_value_for_lookup` (§4.E): an empty value passes through empty;
    /// an already-remapped id returns its new canonical form; otherwise the
    /// field's outside-lookup behavior decides whether to pass the old
    /// value through, drop it, or raise.
    async fn get_value_for_lookup(
        &mut self,
        ctx: &mut OperationContext,
        field: &str,
        old_value: &str,
        record_id: &str,
    ) -> std::result::Result<String, String> {
        if old_value.is_empty() {
            return Ok(String::new());
        }
        if let Some(new_id) = ctx.get_new_id(old_value) {
            return Ok(new_id.as_18().to_string());
        }
        match self.get_outside_lookup_behavior_for_field(field) {
            OutsideLookupBehavior::Include => Ok(old_value.to_string()),
            OutsideLookupBehavior::DropField => Ok(String::new()),
            OutsideLookupBehavior::Error => Err(format!(
                "{} {} has an outside reference in field {} ({}), which is not allowed by the extraction configuration.",
                self.step.sobject_name, record_id, field, old_value
            )),
        }
    }
}

/// Canonical boolean strings pass through unchanged; everything else
/// (numeric, date, dateTime, id strings) is already in its wire form and is
/// returned as-is.
fn primitivize(value: &str) -> String {
    match value {
        "True" | "TRUE" => "true".to_string(),
        "False" | "FALSE" => "false".to_string(),
        other => other.to_string(),
    }
}

fn describe_bulk_failure(result: &crate::transport::BulkResult) -> String {
    match result.errors.first() {
        Some(e) => format!("{}: {} ({})", e.status_code, e.message, e.fields.join(", ")),
        None => "no error detail returned".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describe::{DescribeResult, FieldDescriptor, FieldType};
    use crate::testing::{MockTransport, VecRowReader};
    use crate::transport::{BulkRecordError, BulkResult};
    use std::sync::Arc;

    fn descriptor(name: &str, field_type: FieldType, reference_to: &[&str]) -> FieldDescriptor {
        FieldDescriptor {
            name: name.to_string(),
            field_type,
            reference_to: reference_to.iter().map(|s| s.to_string()).collect(),
            soap_type: String::new(),
        }
    }

    fn row(pairs: &[(&str, &str)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn self_lookup_cycle_resolves_in_two_phases() {
        let transport = Arc::new(MockTransport::new());
        transport.set_describe(
            "Account",
            DescribeResult {
                fields: vec![
                    descriptor("Id", FieldType::Scalar, &[]),
                    descriptor("ParentId", FieldType::Reference, &["Account"]),
                ],
            },
        );
        let a_old = "001000000000000";
        let b_old = "001000000000001";
        transport.push_bulk_insert_result(
            "Account",
            vec![
                BulkResult { success: true, id: Some("001000000000002".to_string()), errors: vec![] },
                BulkResult { success: true, id: Some("001000000000003".to_string()), errors: vec![] },
            ],
        );
        transport.push_bulk_update_result(
            "Account",
            vec![
                BulkResult { success: true, id: None, errors: vec![] },
                BulkResult { success: true, id: None, errors: vec![] },
            ],
        );

        let mut ctx = OperationContext::new(transport.clone());
        ctx.register_sobject("Account");
        ctx.set_input_file(
            "Account",
            Box::new(VecRowReader::new(vec![
                row(&[("Id", a_old), ("ParentId", b_old)]),
                row(&[("Id", b_old), ("ParentId", a_old)]),
            ])),
        );

        let mut step = LoadStep::new("Account", vec!["Id".into(), "ParentId".into()]);
        step.scan_fields(&mut ctx).await.unwrap();
        assert!(step.self_lookups.contains("ParentId"));

        step.execute(&mut ctx).await.unwrap();
        assert!(step.errors.is_empty());

        let inserts = transport.recorded_bulk_inserts();
        assert_eq!(inserts.len(), 1);
        let (_, inserted_rows) = &inserts[0];
        assert_eq!(inserted_rows.len(), 2);
        for inserted in inserted_rows {
            assert!(!inserted.contains_key("ParentId"));
        }

        let new_a = ctx.get_new_id(a_old).unwrap();
        let new_b = ctx.get_new_id(b_old).unwrap();
        assert_eq!(new_a, "001000000000002");
        assert_eq!(new_b, "001000000000003");

        step.execute_dependent_updates(&mut ctx).await.unwrap();
        assert!(step.errors.is_empty());

        let updates = transport.recorded_bulk_updates();
        assert_eq!(updates.len(), 1);
        let (_, update_rows) = &updates[0];
        assert_eq!(update_rows.len(), 2);

        let row_for = |id: &Id| {
            update_rows
                .iter()
                .find(|r| r.get(ID_FIELD).map(|s| s.as_str()) == Some(id.as_18()))
                .unwrap()
        };
        assert_eq!(row_for(&new_a).get("ParentId"), Some(&new_b.as_18().to_string()));
        assert_eq!(row_for(&new_b).get("ParentId"), Some(&new_a.as_18().to_string()));
    }

    #[tokio::test]
    async fn insert_failure_is_recorded_and_skips_dependent_update() {
        let transport = Arc::new(MockTransport::new());
        transport.set_describe(
            "Account",
            DescribeResult { fields: vec![descriptor("Id", FieldType::Scalar, &[])] },
        );
        transport.push_bulk_insert_result(
            "Account",
            vec![BulkResult {
                success: false,
                id: None,
                errors: vec![BulkRecordError {
                    status_code: "DUPLICATE_VALUE".to_string(),
                    message: "duplicate external id".to_string(),
                    fields: vec!["External_Id__c".to_string()],
                }],
            }],
        );

        let mut ctx = OperationContext::new(transport.clone());
        ctx.register_sobject("Account");
        ctx.set_input_file(
            "Account",
            Box::new(VecRowReader::new(vec![row(&[("Id", "001000000000000")])])),
        );

        let mut step = LoadStep::new("Account", vec!["Id".into()]);
        step.scan_fields(&mut ctx).await.unwrap();
        step.execute(&mut ctx).await.unwrap();

        assert_eq!(step.errors.len(), 1);
        let message = step.errors.get("001000000000000AAA").unwrap();
        assert!(message.contains("DUPLICATE_VALUE"));
        assert!(ctx.get_new_id("001000000000000").is_none());
    }

    #[tokio::test]
    async fn outside_lookup_error_during_load_drops_record_with_message() {
        let transport = Arc::new(MockTransport::new());
        transport.add_prefix("001", "Account");
        transport.set_describe(
            "Contact",
            DescribeResult {
                fields: vec![
                    descriptor("Id", FieldType::Scalar, &[]),
                    descriptor("AccountId", FieldType::Reference, &["Account"]),
                ],
            },
        );

        let mut ctx = OperationContext::new(transport.clone());
        ctx.register_sobject("Account");
        ctx.register_sobject("Contact");
        ctx.set_input_file(
            "Contact",
            Box::new(VecRowReader::new(vec![row(&[
                ("Id", "003000000000000"),
                ("AccountId", "001000000000099"),
            ])])),
        );

        let mut step = LoadStep::new("Contact", vec!["Id".into(), "AccountId".into()]);
        step.scan_fields(&mut ctx).await.unwrap();
        step.set_outside_lookup_behavior_for_field("AccountId", OutsideLookupBehavior::Error);
        step.execute(&mut ctx).await.unwrap();

        assert!(transport.recorded_bulk_inserts().is_empty());
        let message = step.errors.get("003000000000000AAA").unwrap();
        assert!(message.contains("outside reference"));
    }
}

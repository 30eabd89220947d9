//! The extraction step state machine (§4.D): initial pass by scope,
//! self-lookup fixed point, deferred dependency resolution.

use std::collections::HashSet;

use anyhow::Result;
use tracing::{info, warn};

use crate::behavior::{ExtractionScope, FieldBehavior, OutsideLookupBehavior, SelfLookupBehavior};
use crate::context::OperationContext;
use crate::describe::FieldType;
use crate::error::ConfigError;
use crate::id::Id;
use crate::record::{Record, ID_FIELD};
use crate::step::Step;

/// One object type's extraction: its `Step` plus scope/behavior
/// configuration. Derefs to the underlying `Step` so callers read
/// `sobject_name`, `fields`, `self_lookups`, etc. directly.
pub struct ExtractionStep {
    step: Step,
    pub scope: ExtractionScope,
    pub where_clause: Option<String>,
    self_lookup_behavior: FieldBehavior<SelfLookupBehavior>,
    outside_lookup_behavior: FieldBehavior<OutsideLookupBehavior>,
    /// Outside-reference and unresolved-dependency errors accumulated during
    /// `execute` (§7 kinds 2-3). Never a Rust `Err`; see `error` module docs.
    pub errors: Vec<String>,
    /// The id-chunk query ceiling; see the Open Question resolution in
    /// DESIGN.md. Default 4000, matching the "< 4000 characters" ceiling
    /// observed in the reference test suite.
    pub url_length_limit: usize,
}

impl std::ops::Deref for ExtractionStep {
    type Target = Step;
    fn deref(&self) -> &Step {
        &self.step
    }
}

impl std::ops::DerefMut for ExtractionStep {
    fn deref_mut(&mut self) -> &mut Step {
        &mut self.step
    }
}

impl ExtractionStep {
    pub fn new(
        sobject_name: impl Into<String>,
        fields: Vec<String>,
        scope: ExtractionScope,
        where_clause: Option<String>,
    ) -> Self {
        Self {
            step: Step::new(sobject_name, fields),
            scope,
            where_clause,
            self_lookup_behavior: FieldBehavior::with_default(SelfLookupBehavior::default()),
            outside_lookup_behavior: FieldBehavior::with_default(OutsideLookupBehavior::default()),
            errors: Vec::new(),
            url_length_limit: 4000,
        }
    }

    /// Overrides this step's default self-lookup behavior (§9: "a default
    /// plus a per-field override map"); per-field overrides set afterward
    /// still win for their field.
    pub fn set_self_lookup_behavior_default(&mut self, behavior: SelfLookupBehavior) {
        self.self_lookup_behavior.set_default(behavior);
    }

    /// Overrides this step's default outside-lookup behavior; per-field
    /// overrides set afterward still win for their field.
    pub fn set_outside_lookup_behavior_default(&mut self, behavior: OutsideLookupBehavior) {
        self.outside_lookup_behavior.set_default(behavior);
    }

    pub fn get_self_lookup_behavior_for_field(&self, field: &str) -> SelfLookupBehavior {
        self.self_lookup_behavior.get(field)
    }

    pub fn set_self_lookup_behavior_for_field(&mut self, field: &str, behavior: SelfLookupBehavior) {
        self.self_lookup_behavior.set(field, behavior);
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

    /// Run the full S0 → S1 → S2 state machine. `scan_fields` must already
    /// have populated the step's lookup-field sets (`Operation::execute`
    /// calls it immediately before this).
    pub async fn execute(&mut self, ctx: &mut OperationContext) -> Result<()> {
        info!(sobject = %self.step.sobject_name, scope = ?self.scope, "starting extraction step");

        match self.scope {
            ExtractionScope::AllRecords => {
                let soql = format!(
                    "SELECT {} FROM {}",
                    self.step.fields.join(", "),
                    self.step.sobject_name
                );
                self.perform_bulk_api_pass(ctx, &soql).await?;
            }
            ExtractionScope::Query => {
                let where_clause = self
                    .where_clause
                    .clone()
                    .ok_or(ConfigError::MissingWhereClause)?;
                let soql = format!(
                    "SELECT {} FROM {} WHERE {}",
                    self.step.fields.join(", "),
                    self.step.sobject_name,
                    where_clause
                );
                self.perform_bulk_api_pass(ctx, &soql).await?;
            }
            ExtractionScope::Descendents => {
                let fields: Vec<String> = self.step.descendent_lookups.iter().cloned().collect();
                for field in fields {
                    self.perform_lookup_pass(ctx, &field).await?;
                }
            }
            ExtractionScope::SelectedRecords => {
                // No initial pass; the caller is expected to have pre-seeded
                // `ctx`'s pending-dependency set via `add_dependency` before
                // `execute` runs (see the SELECTED_RECORDS Open Question
                // resolution in DESIGN.md).
            }
        }

        let traced_self_lookups: Vec<String> = self
            .step
            .self_lookups
            .iter()
            .filter(|f| self.get_self_lookup_behavior_for_field(f) == SelfLookupBehavior::TraceAll)
            .cloned()
            .collect();
        if !traced_self_lookups.is_empty() {
            loop {
                let before = ctx.get_extracted_ids(&self.step.sobject_name);
                for field in &traced_self_lookups {
                    self.perform_lookup_pass(ctx, field).await?;
                }
                self.resolve_registered_dependencies(ctx, false).await?;
                let after = ctx.get_extracted_ids(&self.step.sobject_name);
                if after == before {
                    break;
                }
            }
        }

        self.resolve_registered_dependencies(ctx, true).await?;

        if !self.errors.is_empty() {
            warn!(
                sobject = %self.step.sobject_name,
                count = self.errors.len(),
                "extraction step finished with errors"
            );
        }
        Ok(())
    }

    /// `resolve_registered_dependencies` (§4.D S2). The S1 fixed-point loop
    /// calls this with `record_errors = false` on every iteration, since a
    /// dependency left pending mid-loop may simply be a multi-hop chain not
    /// yet fully unwound, not a genuine failure. Only the final call, made
    /// once after the loop settles, records unresolved ids as errors.
    async fn resolve_registered_dependencies(
        &mut self,
        ctx: &mut OperationContext,
        record_errors: bool,
    ) -> Result<()> {
        let pending = ctx.get_dependencies(&self.step.sobject_name);
        if !pending.is_empty() {
            self.perform_id_field_pass(ctx, ID_FIELD, pending).await?;
        }

        if record_errors {
            let still_pending = ctx.get_dependencies(&self.step.sobject_name);
            if !still_pending.is_empty() {
                let mut ids: Vec<String> =
                    still_pending.iter().map(|id| id.as_18().to_string()).collect();
                ids.sort();
                self.errors.push(format!(
                    "Unable to resolve dependencies for sObject {}. The following Ids could not be found: {}",
                    self.step.sobject_name,
                    ids.join(", ")
                ));
            }
        }
        Ok(())
    }

    /// Resolves the target id set for `field` (self-lookup and/or
    /// descendent-lookup, possibly both for a polymorphic field) and issues
    /// a chunked id-membership query against it.
    async fn perform_lookup_pass(&mut self, ctx: &mut OperationContext, field: &str) -> Result<()> {
        let order: Vec<String> = ctx.get_sobject_list().to_vec();
        let my_index = order
            .iter()
            .position(|s| s == &self.step.sobject_name)
            .unwrap_or(order.len());

        let mut ids = HashSet::new();
        if self.step.self_lookups.contains(field) {
            ids.extend(ctx.get_sobject_ids_for_reference(&self.step.sobject_name, field));
        }
        if self.step.descendent_lookups.contains(field) {
            let field_map = ctx.get_field_map(&self.step.sobject_name).await?.clone();
            if let Some(descriptor) = field_map.get(field) {
                for target in &descriptor.reference_to {
                    if let Some(idx) = order.iter().position(|s| s == target) {
                        if idx < my_index {
                            ids.extend(ctx.get_sobject_ids_for_reference(target, field));
                        }
                    }
                }
            }
        }
        self.perform_id_field_pass(ctx, field, ids).await
    }

    /// `perform_id_field_pass` (§4.D): chunked `WHERE <field> IN (...)`
    /// queries against the synchronous transport, each row forwarded to
    /// `store_result`.
    async fn perform_id_field_pass(
        &mut self,
        ctx: &mut OperationContext,
        field: &str,
        id_set: HashSet<Id>,
    ) -> Result<()> {
        if id_set.is_empty() {
            return Ok(());
        }

        for soql in self.chunk_id_queries(field, &id_set) {
            let handle = ctx.get_proxy_object(&self.step.sobject_name);
            let result = handle.query(&soql).await?;
            for row in result.records {
                self.store_result_row(ctx, row).await?;
            }
        }
        Ok(())
    }

    fn chunk_id_queries(&self, field: &str, ids: &HashSet<Id>) -> Vec<String> {
        let prefix = format!(
            "SELECT {} FROM {} WHERE {} IN (",
            self.step.fields.join(", "),
            self.step.sobject_name,
            field
        );
        let suffix = ")";
        let base_len = prefix.len() + suffix.len();

        let mut queries = Vec::new();
        let mut chunk: Vec<String> = Vec::new();
        let mut chunk_len = base_len;

        let mut sorted_ids: Vec<&Id> = ids.iter().collect();
        sorted_ids.sort_by_key(|id| id.as_18().to_string());

        for id in sorted_ids {
            let quoted = format!("'{}'", id.as_18());
            let separator_len = if chunk.is_empty() { 0 } else { 1 };
            if !chunk.is_empty() && chunk_len + separator_len + quoted.len() > self.url_length_limit
            {
                queries.push(format!("{prefix}{}{suffix}", chunk.join(",")));
                chunk.clear();
                chunk_len = base_len;
            }
            let separator_len = if chunk.is_empty() { 0 } else { 1 };
            chunk_len += separator_len + quoted.len();
            chunk.push(quoted);
        }
        if !chunk.is_empty() {
            queries.push(format!("{prefix}{}{suffix}", chunk.join(",")));
        }
        queries
    }

    /// `perform_bulk_api_pass` (§4.D): a single asynchronous bulk query,
    /// with datetime-epoch conversion applied per field before the row
    /// reaches `store_result`.
    async fn perform_bulk_api_pass(&mut self, ctx: &mut OperationContext, soql: &str) -> Result<()> {
        let field_map = ctx.get_field_map(&self.step.sobject_name).await?.clone();
        let handle = ctx.get_bulk_proxy_object(&self.step.sobject_name);
        let rows = handle.bulk_query(soql).await?;

        for mut row in rows {
            let keys: Vec<String> = row.keys().cloned().collect();
            for key in keys {
                let Some(descriptor) = field_map.get(&key) else {
                    continue;
                };
                let Some(value) = row.get(&key) else {
                    continue;
                };
                if value.is_empty() {
                    continue;
                }

                if descriptor.is_reference() {
                    if value.parse::<i64>().is_ok() {
                        anyhow::bail!(
                            "field '{}' on {} is a reference but holds an epoch-style integer value '{}'",
                            key,
                            self.step.sobject_name,
                            value
                        );
                    }
                } else if descriptor.field_type == FieldType::DateTime {
                    if let Ok(millis) = value.parse::<i64>() {
                        let converted = epoch_millis_to_iso8601(millis);
                        row.insert(key, converted);
                    }
                }
            }
            self.store_result_row(ctx, row).await?;
        }
        Ok(())
    }

    /// Step-level `store_result` wrapper (§4.D): classifies every
    /// non-empty reference value in the row, registering dependencies for
    /// self/dependent targets and applying outside-lookup behavior for
    /// descendent targets not yet extracted or targets outside the
    /// operation entirely, before handing the row to
    /// `context.store_result`.
    async fn store_result_row(&mut self, ctx: &mut OperationContext, mut row: Record) -> Result<()> {
        let row_id = row.get(ID_FIELD).cloned().unwrap_or_default();
        let order: Vec<String> = ctx.get_sobject_list().to_vec();
        let my_index = order
            .iter()
            .position(|s| s == &self.step.sobject_name)
            .unwrap_or(order.len());

        let lookups: Vec<String> = self.step.all_lookups.iter().cloned().collect();
        for field in lookups {
            let Some(raw_value) = row.get(&field).cloned() else {
                continue;
            };
            if raw_value.is_empty() {
                continue;
            }
            let Ok(id) = Id::from_string(&raw_value) else {
                continue;
            };

            let target_type = ctx.get_sobject_name_for_id(&id).await?;
            let keep_row = match target_type {
                Some(ref t) if t == &self.step.sobject_name => {
                    if self.get_self_lookup_behavior_for_field(&field) == SelfLookupBehavior::TraceAll
                    {
                        ctx.add_dependency(&self.step.sobject_name, id);
                    }
                    true
                }
                Some(t) => match order.iter().position(|s| s == &t) {
                    Some(idx) if idx > my_index => {
                        ctx.add_dependency(&t, id);
                        true
                    }
                    Some(idx) if idx < my_index => {
                        if ctx.get_extracted_ids(&t).contains(&id) {
                            true
                        } else {
                            self.apply_outside_behavior(&field, &row_id, &raw_value, &mut row)
                        }
                    }
                    _ => self.apply_outside_behavior(&field, &row_id, &raw_value, &mut row),
                },
                None => self.apply_outside_behavior(&field, &row_id, &raw_value, &mut row),
            };
            if !keep_row {
                return Ok(());
            }
        }

        ctx.store_result(&self.step.sobject_name, row)?;
        Ok(())
    }

    /// Applies this field's effective outside-lookup behavior. Returns
    /// `false` when the row must not be emitted at all (ERROR, which also
    /// records the error message).
    fn apply_outside_behavior(
        &mut self,
        field: &str,
        row_id: &str,
        raw_value: &str,
        row: &mut Record,
    ) -> bool {
        match self.get_outside_lookup_behavior_for_field(field) {
            OutsideLookupBehavior::Include => true,
            OutsideLookupBehavior::DropField => {
                row.shift_remove(field);
                true
            }
            OutsideLookupBehavior::Error => {
                self.errors.push(format!(
                    "{} {} has an outside reference in field {} ({}), which is not allowed by the extraction configuration.",
                    self.step.sobject_name, row_id, field, raw_value
                ));
                false
            }
        }
    }
}

fn epoch_millis_to_iso8601(millis: i64) -> String {
    use chrono::{TimeZone, Utc};
    match Utc.timestamp_millis_opt(millis).single() {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.3f+0000").to_string(),
        None => millis.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describe::{DescribeResult, FieldDescriptor, FieldType as FT};
    use crate::testing::MockTransport;
    use std::sync::Arc;

    fn descriptor(name: &str, field_type: FT, reference_to: &[&str]) -> FieldDescriptor {
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

    fn account_id(n: u32) -> String {
        format!("001000000000{:03}", n)
    }

    #[tokio::test]
    async fn self_reference_chain_is_traced_to_fixed_point() {
        let transport = Arc::new(MockTransport::new());
        transport.add_prefix("001", "Account");
        transport.set_describe(
            "Account",
            DescribeResult {
                fields: vec![
                    descriptor("Name", FT::Scalar, &[]),
                    descriptor("ParentId", FT::Reference, &["Account"]),
                ],
            },
        );

        // Initial QUERY pass returns only C, whose parent is B.
        let a = account_id(1);
        let b = account_id(2);
        let c = account_id(3);
        transport.push_bulk_query_result(
            "Account",
            vec![row(&[("Id", &c), ("Name", "ACME"), ("ParentId", &b)])],
        );
        // Id-field pass resolving B returns B, whose parent is A.
        transport.push_query_result(crate::transport::QueryResult {
            records: vec![row(&[("Id", &b), ("Name", "ACME"), ("ParentId", &a)])],
        });
        // Next id-field pass resolving A returns A, a root (no parent).
        transport.push_query_result(crate::transport::QueryResult {
            records: vec![row(&[("Id", &a), ("Name", "ACME"), ("ParentId", "")])],
        });

        let mut ctx = OperationContext::new(transport);
        ctx.register_sobject("Account");

        let mut step = ExtractionStep::new(
            "Account",
            vec!["Name".into(), "ParentId".into()],
            ExtractionScope::Query,
            Some("Name='ACME'".to_string()),
        );
        step.scan_fields(&mut ctx).await.unwrap();
        step.execute(&mut ctx).await.unwrap();

        let extracted = ctx.get_extracted_ids("Account");
        assert_eq!(extracted.len(), 3);
        assert!(step.errors.is_empty());
    }

    #[tokio::test]
    async fn outside_reference_error_drops_row_and_records_message() {
        let transport = Arc::new(MockTransport::new());
        transport.add_prefix("001", "Account");
        transport.add_prefix("003", "Contact");
        transport.set_describe(
            "Contact",
            DescribeResult {
                fields: vec![
                    descriptor("Id", FT::Scalar, &[]),
                    descriptor("AccountId", FT::Reference, &["Account"]),
                ],
            },
        );
        let contact_id = "003000000000001";
        let account_id = "001000000000001";
        transport.push_bulk_query_result(
            "Contact",
            vec![row(&[("Id", contact_id), ("AccountId", account_id)])],
        );

        let mut ctx = OperationContext::new(transport);
        ctx.register_sobject("Account");
        ctx.register_sobject("Contact");

        let mut step = ExtractionStep::new(
            "Contact",
            vec!["Id".into(), "AccountId".into()],
            ExtractionScope::Descendents,
            None,
        );
        step.set_outside_lookup_behavior_for_field("AccountId", OutsideLookupBehavior::Error);
        step.scan_fields(&mut ctx).await.unwrap();
        // Descendents scope issues its initial pass via perform_lookup_pass,
        // which for an empty extracted-Account set issues no query at all;
        // drive the bulk pass directly to exercise the outside-reference path.
        let soql = "SELECT Id, AccountId FROM Contact";
        step.perform_bulk_api_pass(&mut ctx, soql).await.unwrap();

        assert_eq!(ctx.get_extracted_ids("Contact").len(), 0);
        assert_eq!(
            step.errors,
            vec![
                "Contact 003000000000001 has an outside reference in field AccountId (001000000000001), which is not allowed by the extraction configuration.".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn outside_reference_drop_field_strips_field_and_writes_row() {
        let transport = Arc::new(MockTransport::new());
        transport.add_prefix("001", "Account");
        transport.add_prefix("003", "Contact");
        transport.set_describe(
            "Contact",
            DescribeResult {
                fields: vec![
                    descriptor("Id", FT::Scalar, &[]),
                    descriptor("AccountId", FT::Reference, &["Account"]),
                ],
            },
        );
        let contact_id = "003000000000001";
        let account_id = "001000000000001";
        transport.push_bulk_query_result(
            "Contact",
            vec![row(&[("Id", contact_id), ("AccountId", account_id)])],
        );

        let mut ctx = OperationContext::new(transport);
        ctx.register_sobject("Account");
        ctx.register_sobject("Contact");

        let mut step = ExtractionStep::new(
            "Contact",
            vec!["Id".into(), "AccountId".into()],
            ExtractionScope::Descendents,
            None,
        );
        step.set_outside_lookup_behavior_for_field("AccountId", OutsideLookupBehavior::DropField);
        step.scan_fields(&mut ctx).await.unwrap();
        step.perform_bulk_api_pass(&mut ctx, "SELECT Id, AccountId FROM Contact")
            .await
            .unwrap();

        assert!(step.errors.is_empty());
        assert_eq!(ctx.get_extracted_ids("Contact").len(), 1);
    }

    #[tokio::test]
    async fn polymorphic_field_registers_dependency_only_for_dependent_target() {
        let transport = Arc::new(MockTransport::new());
        transport.add_prefix("001", "Account");
        transport.add_prefix("003", "Contact");
        transport.add_prefix("006", "Opportunity");
        transport.add_prefix("00T", "Task");
        transport.set_describe(
            "Contact",
            DescribeResult {
                fields: vec![descriptor(
                    "Lookup__c",
                    FT::Reference,
                    &["Opportunity", "Account", "Task"],
                )],
            },
        );
        let opp_id = "006000000000001";
        let acct_id = "001000000000001";
        let task_id = "00T000000000001";
        transport.push_bulk_query_result(
            "Contact",
            vec![
                row(&[("Id", "003000000000001"), ("Lookup__c", opp_id)]),
                row(&[("Id", "003000000000002"), ("Lookup__c", acct_id)]),
                row(&[("Id", "003000000000003"), ("Lookup__c", task_id)]),
            ],
        );

        let mut ctx = OperationContext::new(transport);
        ctx.register_sobject("Account");
        ctx.register_sobject("Contact");
        ctx.register_sobject("Opportunity");
        // Account already extracted for this test's acct_id.
        ctx.store_result("Account", row(&[("Id", acct_id)])).unwrap();

        let mut step = ExtractionStep::new("Contact", vec!["Lookup__c".into()], ExtractionScope::AllRecords, None);
        step.scan_fields(&mut ctx).await.unwrap();
        assert!(step.dependent_lookups.contains("Lookup__c"));
        assert!(step.descendent_lookups.contains("Lookup__c"));
        assert!(!step.self_lookups.contains("Lookup__c"));

        step.perform_bulk_api_pass(&mut ctx, "SELECT Lookup__c FROM Contact")
            .await
            .unwrap();

        assert_eq!(ctx.get_extracted_ids("Contact").len(), 3);
        let opp_deps = ctx.get_dependencies("Opportunity");
        assert_eq!(opp_deps.len(), 1);
        assert!(ctx.get_dependencies("Task").is_empty());
    }

    #[tokio::test]
    async fn dependency_resolution_failure_is_recorded_with_canonical_ids() {
        let transport = Arc::new(MockTransport::new());
        transport.add_prefix("001", "Account");
        transport.set_describe(
            "Account",
            DescribeResult { fields: vec![descriptor("Name", FT::Scalar, &[])] },
        );
        let id1 = "001000000000001"; // stays unresolved
        let id2 = "001000000000002"; // resolved by the pass
        transport.push_query_result(crate::transport::QueryResult {
            records: vec![row(&[("Id", id2), ("Name", "Found")])],
        });

        let mut ctx = OperationContext::new(transport);
        ctx.register_sobject("Account");
        ctx.add_dependency("Account", Id::from_string(id1).unwrap());
        ctx.add_dependency("Account", Id::from_string(id2).unwrap());

        let mut step = ExtractionStep::new("Account", vec!["Name".into()], ExtractionScope::SelectedRecords, None);
        step.scan_fields(&mut ctx).await.unwrap();
        step.resolve_registered_dependencies(&mut ctx, true).await.unwrap();

        assert_eq!(
            step.errors,
            vec![
                "Unable to resolve dependencies for sObject Account. The following Ids could not be found: 001000000000001AAA".to_string()
            ]
        );
    }
}

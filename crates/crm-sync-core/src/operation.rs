//! The orchestrator (§4.B `execute()` contract): drives steps in declared
//! order, aggregates errors, and guarantees `close_files` runs on every exit
//! path.

use std::sync::Arc;

use tracing::{error, info};

use crate::context::OperationContext;
use crate::error::OperationError;
use crate::extract::ExtractionStep;
use crate::load::LoadStep;
use crate::mapper::DataMapper;
use crate::transport::Transport;

/// Drives a list of `ExtractionStep`s against one tenant, in declared order.
pub struct ExtractOperation {
    context: OperationContext,
    steps: Vec<ExtractionStep>,
}

impl ExtractOperation {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            context: OperationContext::new(transport),
            steps: Vec::new(),
        }
    }

    pub fn context(&self) -> &OperationContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut OperationContext {
        &mut self.context
    }

    /// Appends `step` to the ordered step list and registers its object
    /// type with the shared context (§4.B `add_step`).
    pub fn add_step(&mut self, step: ExtractionStep) {
        self.context.register_sobject(&step.sobject_name);
        self.steps.push(step);
    }

    pub fn register_mapper(&mut self, sobject: &str, mapper: DataMapper) {
        self.context.register_mapper(sobject, mapper);
    }

    /// Runs every step's `scan_fields` then `execute` in order. Returns `0`
    /// on full success, `-1` on the first step to accumulate errors, or an
    /// `Err` for a configuration-class failure a step could not recover
    /// from at all. `close_files` runs on every exit path.
    pub async fn execute(&mut self) -> Result<i32, OperationError> {
        for step in &mut self.steps {
            if let Err(source) = step.scan_fields(&mut self.context).await {
                self.context.close_files().ok();
                return Err(OperationError::StepFailed { sobject: step.sobject_name.clone(), source });
            }

            info!(sobject = %step.sobject_name, "executing extraction step");
            if let Err(source) = step.execute(&mut self.context).await {
                self.context.close_files().ok();
                return Err(OperationError::StepFailed { sobject: step.sobject_name.clone(), source });
            }

            if !step.errors.is_empty() {
                error!(sobject = %step.sobject_name, errors = ?step.errors, "extraction step aborted the operation");
                self.context.close_files()?;
                return Ok(-1);
            }
        }

        self.context.close_files()?;
        Ok(0)
    }
}

/// Drives a list of `LoadStep`s against one tenant, in declared order.
pub struct LoadOperation {
    context: OperationContext,
    steps: Vec<LoadStep>,
}

impl LoadOperation {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            context: OperationContext::new(transport),
            steps: Vec::new(),
        }
    }

    pub fn context(&self) -> &OperationContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut OperationContext {
        &mut self.context
    }

    pub fn add_step(&mut self, step: LoadStep) {
        self.context.register_sobject(&step.sobject_name);
        self.steps.push(step);
    }

    pub fn register_mapper(&mut self, sobject: &str, mapper: DataMapper) {
        self.context.register_mapper(sobject, mapper);
    }

    /// Runs each step's insert phase, then its dependent-update phase,
    /// aborting at the first phase that accumulates errors (§4.B: "otherwise
    /// call `execute_dependent_updates`; if errors after that, abort").
    pub async fn execute(&mut self) -> Result<i32, OperationError> {
        for step in &mut self.steps {
            if let Err(source) = step.scan_fields(&mut self.context).await {
                self.context.close_files().ok();
                return Err(OperationError::StepFailed { sobject: step.sobject_name.clone(), source });
            }

            info!(sobject = %step.sobject_name, "inserting load step");
            if let Err(source) = step.execute(&mut self.context).await {
                self.context.close_files().ok();
                return Err(OperationError::StepFailed { sobject: step.sobject_name.clone(), source });
            }
            if !step.errors.is_empty() {
                error!(sobject = %step.sobject_name, errors = ?step.errors, "load step aborted before dependent updates");
                self.context.write_errors(&step.sobject_name, &step.errors)?;
                self.context.close_files()?;
                return Ok(-1);
            }

            info!(sobject = %step.sobject_name, "resolving dependent updates");
            if let Err(source) = step.execute_dependent_updates(&mut self.context).await {
                self.context.close_files().ok();
                return Err(OperationError::StepFailed { sobject: step.sobject_name.clone(), source });
            }
            if !step.errors.is_empty() {
                error!(sobject = %step.sobject_name, errors = ?step.errors, "load step's dependent updates aborted the operation");
                self.context.write_errors(&step.sobject_name, &step.errors)?;
                self.context.close_files()?;
                return Ok(-1);
            }
        }

        self.context.close_files()?;
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::ExtractionScope;
    use crate::describe::{DescribeResult, FieldDescriptor, FieldType};
    use crate::testing::{MockTransport, VecRowWriter};

    fn scalar(name: &str) -> FieldDescriptor {
        FieldDescriptor {
            name: name.to_string(),
            field_type: FieldType::Scalar,
            reference_to: Vec::new(),
            soap_type: String::new(),
        }
    }

    #[tokio::test]
    async fn full_success_runs_every_step_and_closes_files() {
        let transport = Arc::new(MockTransport::new());
        transport.set_describe("Account", DescribeResult { fields: vec![scalar("Name")] });
        transport.push_bulk_query_result(
            "Account",
            vec![[("Id".to_string(), "001000000000000".to_string()), ("Name".to_string(), "ACME".to_string())]
                .into_iter()
                .collect()],
        );

        let mut op = ExtractOperation::new(transport);
        let writer = VecRowWriter::new();
        op.context_mut().set_output_file("Account", Box::new(writer.clone()));
        op.add_step(ExtractionStep::new(
            "Account",
            vec!["Name".into()],
            ExtractionScope::AllRecords,
            None,
        ));

        let code = op.execute().await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(writer.snapshot().len(), 1);
        assert!(writer.is_closed());
    }

    #[tokio::test]
    async fn step_errors_abort_with_negative_one_and_still_close_files() {
        let transport = Arc::new(MockTransport::new());
        transport.add_prefix("001", "Account");
        transport.add_prefix("003", "Contact");
        transport.set_describe(
            "Contact",
            DescribeResult {
                fields: vec![
                    scalar("Id"),
                    FieldDescriptor {
                        name: "AccountId".to_string(),
                        field_type: FieldType::Reference,
                        reference_to: vec!["Account".to_string()],
                        soap_type: String::new(),
                    },
                ],
            },
        );
        transport.push_bulk_query_result(
            "Contact",
            vec![[
                ("Id".to_string(), "003000000000001".to_string()),
                ("AccountId".to_string(), "001000000000001".to_string()),
            ]
            .into_iter()
            .collect()],
        );

        let mut op = ExtractOperation::new(transport);
        let writer = VecRowWriter::new();
        op.context_mut().set_output_file("Contact", Box::new(writer.clone()));
        op.add_step(ExtractionStep::new("Account", vec!["Name".into()], ExtractionScope::AllRecords, None));
        let mut contact_step =
            ExtractionStep::new("Contact", vec!["Id".into(), "AccountId".into()], ExtractionScope::AllRecords, None);
        contact_step.set_outside_lookup_behavior_for_field(
            "AccountId",
            crate::behavior::OutsideLookupBehavior::Error,
        );
        op.add_step(contact_step);

        // Account's own bulk query returns nothing; only Contact's is queued
        // above, so Account's pass is a no-op and the Contact step hits the
        // outside-reference error path.
        let code = op.execute().await.unwrap();
        assert_eq!(code, -1);
        assert!(writer.is_closed());
        assert!(writer.snapshot().is_empty());
    }
}

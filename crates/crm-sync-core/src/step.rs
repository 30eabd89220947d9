//! The common shape every extraction or load step holds: one object type,
//! its field list, and the four derived lookup-field classifications
//! (§3 "Step state", §4.C).

use std::collections::HashSet;

use anyhow::Result;

use crate::context::OperationContext;
use crate::error::ConfigError;

/// One object type and the fields this step projects, plus the lookup-field
/// classification computed by `scan_fields`.
///
/// A polymorphic reference field may land in more than one of
/// `self_lookups`, `descendent_lookups`, `dependent_lookups` simultaneously.
/// Classification is per target type, not per field.
#[derive(Debug, Clone)]
pub struct Step {
    pub sobject_name: String,
    pub fields: Vec<String>,
    pub all_lookups: HashSet<String>,
    pub self_lookups: HashSet<String>,
    pub descendent_lookups: HashSet<String>,
    pub dependent_lookups: HashSet<String>,
}

impl Step {
    pub fn new(sobject_name: impl Into<String>, fields: Vec<String>) -> Self {
        Self {
            sobject_name: sobject_name.into(),
            fields,
            all_lookups: HashSet::new(),
            self_lookups: HashSet::new(),
            descendent_lookups: HashSet::new(),
            dependent_lookups: HashSet::new(),
        }
    }

    /// Classify this step's reference fields against the operation's step
    /// order: a target type earlier in `ctx.get_sobject_list()` is a
    /// descendent lookup, later is a dependent lookup, and the step's own
    /// type is a self lookup. Must be called once before `execute`.
    pub async fn scan_fields(&mut self, ctx: &mut OperationContext) -> Result<()> {
        let field_map = ctx.get_field_map(&self.sobject_name).await?;

        let order = ctx.get_sobject_list();
        let my_index = order
            .iter()
            .position(|s| s == &self.sobject_name)
            .unwrap_or(order.len());
        let earlier: HashSet<&str> = order[..my_index.min(order.len())]
            .iter()
            .map(|s| s.as_str())
            .collect();
        let later: HashSet<&str> = if my_index < order.len() {
            order[my_index + 1..].iter().map(|s| s.as_str()).collect()
        } else {
            HashSet::new()
        };

        for field in &self.fields {
            let Some(descriptor) = field_map.get(field) else {
                return Err(ConfigError::UnknownField {
                    sobject: self.sobject_name.clone(),
                    field: field.clone(),
                }
                .into());
            };
            if !descriptor.is_reference() {
                continue;
            }

            let mut any = false;
            for target in &descriptor.reference_to {
                if target == &self.sobject_name {
                    self.self_lookups.insert(field.clone());
                    any = true;
                }
                if earlier.contains(target.as_str()) {
                    self.descendent_lookups.insert(field.clone());
                    any = true;
                }
                if later.contains(target.as_str()) {
                    self.dependent_lookups.insert(field.clone());
                    any = true;
                }
            }
            if any {
                self.all_lookups.insert(field.clone());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describe::{DescribeResult, FieldDescriptor, FieldType};
    use crate::testing::MockTransport;
    use std::sync::Arc;

    fn describe_with(fields: Vec<(&str, Vec<&str>)>) -> DescribeResult {
        DescribeResult {
            fields: fields
                .into_iter()
                .map(|(name, refs)| FieldDescriptor {
                    name: name.to_string(),
                    field_type: if refs.is_empty() {
                        FieldType::Scalar
                    } else {
                        FieldType::Reference
                    },
                    reference_to: refs.into_iter().map(String::from).collect(),
                    soap_type: String::new(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn identifies_self_lookups() {
        let transport = MockTransport::new();
        transport.set_describe(
            "Account",
            describe_with(vec![("Lookup__c", vec!["Account"]), ("Other__c", vec![])]),
        );
        let mut ctx = OperationContext::new(Arc::new(transport));
        ctx.register_sobject("Account");

        let mut step = Step::new("Account", vec!["Lookup__c".into(), "Other__c".into()]);
        step.scan_fields(&mut ctx).await.unwrap();

        assert_eq!(step.self_lookups, ["Lookup__c".to_string()].into());
    }

    #[tokio::test]
    async fn identifies_dependent_lookups() {
        let transport = MockTransport::new();
        transport.set_describe(
            "Account",
            describe_with(vec![("Lookup__c", vec!["Contact"]), ("Other__c", vec![])]),
        );
        let mut ctx = OperationContext::new(Arc::new(transport));
        ctx.register_sobject("Account");
        ctx.register_sobject("Contact");

        let mut step = Step::new("Account", vec!["Lookup__c".into(), "Other__c".into()]);
        step.scan_fields(&mut ctx).await.unwrap();

        assert_eq!(step.dependent_lookups, ["Lookup__c".to_string()].into());
    }

    #[tokio::test]
    async fn identifies_descendent_lookups() {
        let transport = MockTransport::new();
        transport.set_describe(
            "Contact",
            describe_with(vec![("Lookup__c", vec!["Account"]), ("Other__c", vec![])]),
        );
        let mut ctx = OperationContext::new(Arc::new(transport));
        ctx.register_sobject("Account");
        ctx.register_sobject("Contact");

        let mut step = Step::new("Contact", vec!["Lookup__c".into(), "Other__c".into()]);
        step.scan_fields(&mut ctx).await.unwrap();

        assert_eq!(step.descendent_lookups, ["Lookup__c".to_string()].into());
    }

    #[tokio::test]
    async fn polymorphic_lookup_is_classified_per_target() {
        let transport = MockTransport::new();
        transport.set_describe(
            "Contact",
            describe_with(vec![(
                "Poly_Lookup__c",
                vec!["Opportunity", "Account", "Task"],
            )]),
        );
        let mut ctx = OperationContext::new(Arc::new(transport));
        ctx.register_sobject("Account");
        ctx.register_sobject("Contact");
        ctx.register_sobject("Opportunity");

        let mut step = Step::new("Contact", vec!["Poly_Lookup__c".into()]);
        step.scan_fields(&mut ctx).await.unwrap();

        assert!(step.dependent_lookups.contains("Poly_Lookup__c"));
        assert!(step.descendent_lookups.contains("Poly_Lookup__c"));
        assert!(!step.self_lookups.contains("Poly_Lookup__c"));
    }

    #[tokio::test]
    async fn unknown_field_is_a_config_error() {
        let transport = MockTransport::new();
        transport.set_describe("Account", describe_with(vec![("Name", vec![])]));
        let mut ctx = OperationContext::new(Arc::new(transport));
        ctx.register_sobject("Account");

        let mut step = Step::new("Account", vec!["Nonexistent__c".into()]);
        let err = step.scan_fields(&mut ctx).await.unwrap_err();

        let config_err = err.downcast_ref::<ConfigError>().expect("ConfigError");
        assert!(matches!(
            config_err,
            ConfigError::UnknownField { sobject, field }
                if sobject == "Account" && field == "Nonexistent__c"
        ));
    }
}

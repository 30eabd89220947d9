//! Describe metadata: per-object-type field descriptors and the tenant-wide
//! object-type list used to build the key-prefix table (§3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The wire primitive type of a field, as reported by describe. Only
/// `Reference` and `DateTime` drive engine behavior; everything else is
/// treated as an opaque scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Reference,
    DateTime,
    #[serde(other)]
    Scalar,
}

/// Metadata for a single field on an object type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Target object types, present only when `field_type == Reference`.
    /// A field naming more than one type here is a polymorphic reference.
    #[serde(default, rename = "referenceTo")]
    pub reference_to: Vec<String>,
    #[serde(default, rename = "soapType")]
    pub soap_type: String,
}

impl FieldDescriptor {
    pub fn is_reference(&self) -> bool {
        self.field_type == FieldType::Reference
    }

    pub fn is_polymorphic(&self) -> bool {
        self.reference_to.len() > 1
    }
}

/// `{field-name -> field-descriptor}` for one object type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescribeResult {
    pub fields: Vec<FieldDescriptor>,
}

impl DescribeResult {
    /// Build the `{field-name -> descriptor}` map the engine actually works
    /// with; called once per type and memoized by `OperationContext`.
    pub fn field_map(&self) -> HashMap<String, FieldDescriptor> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.clone()))
            .collect()
    }
}

/// One entry of the tenant-wide global describe: an object type name and its
/// three-character key prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SObjectInfo {
    pub name: String,
    #[serde(rename = "keyPrefix")]
    pub key_prefix: String,
}

/// The tenant-wide global describe, used once to build the key-prefix table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalDescribeResult {
    pub sobjects: Vec<SObjectInfo>,
}

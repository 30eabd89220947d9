//! The minimal YAML job description this CLI understands (§2 "(added) a
//! minimal job/config layer"). Deliberately thin: full schema validation and
//! credential acquisition are out of scope (§1) and live outside this crate
//! entirely; this is just enough `serde` deserialization to drive an
//! extraction or load end-to-end from a file.

use std::path::PathBuf;

use serde::Deserialize;

use crm_sync_core::behavior::{ExtractionScope, OutsideLookupBehavior, SelfLookupBehavior};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    Extract,
    Load,
}

#[derive(Debug, Deserialize)]
pub struct JobSpec {
    pub mode: JobMode,
    pub instance_url: String,
    /// Name of the environment variable holding the bearer token. Credential
    /// acquisition (OAuth / JWT) itself is out of scope (§1); this CLI only
    /// reads a token that something else already obtained.
    #[serde(default = "default_access_token_env")]
    pub access_token_env: String,
    pub steps: Vec<StepSpec>,
}

fn default_access_token_env() -> String {
    "CRM_SYNC_ACCESS_TOKEN".to_string()
}

#[derive(Debug, Deserialize)]
pub struct StepSpec {
    pub sobject: String,
    pub fields: Vec<String>,

    // Extraction-only.
    #[serde(default)]
    pub scope: Option<ExtractionScope>,
    #[serde(default, rename = "where")]
    pub where_clause: Option<String>,
    #[serde(default)]
    pub self_lookup_behavior: Option<SelfLookupBehavior>,
    /// Ids to pre-seed as pending dependencies before the operation runs.
    /// This is how a `SELECTED_RECORDS`-scoped step obtains its starting set.
    #[serde(default)]
    pub selected_ids: Vec<String>,
    #[serde(default)]
    pub output_file: Option<PathBuf>,

    // Shared.
    #[serde(default)]
    pub outside_lookup_behavior: Option<OutsideLookupBehavior>,

    // Load-only.
    #[serde(default)]
    pub input_file: Option<PathBuf>,
    #[serde(default)]
    pub result_file: Option<PathBuf>,
}

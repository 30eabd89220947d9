//! # crm-sync-cli
//!
//! A thin binary wiring a YAML job spec to [`ExtractOperation`]/
//! [`LoadOperation`]. It performs no schema validation beyond what `serde`
//! gives for free and no credential acquisition at all, both of which are
//! the domain of a fuller CLI this one is deliberately not.

mod job;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crm_sync_core::extract::ExtractionStep;
use crm_sync_core::id::Id;
use crm_sync_core::load::LoadStep;
use crm_sync_core::operation::{ExtractOperation, LoadOperation};
use crm_sync_io::{CsvRowReader, CsvRowWriter};
use crm_sync_transport::RestTransport;

use crate::job::{JobMode, JobSpec, StepSpec};

/// Run a record-graph extraction or load job against a CRM tenant.
#[derive(Parser, Debug)]
#[command(name = "crm-sync-cli")]
#[command(about = "Run a record-graph extraction or load job from a YAML job spec")]
struct Args {
    /// Path to the job YAML file describing the extraction or load.
    #[arg(short, long)]
    job: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "job failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<i32> {
    let args = Args::parse();
    let spec: JobSpec = {
        let text = std::fs::read_to_string(&args.job)
            .with_context(|| format!("reading job spec {}", args.job.display()))?;
        serde_yaml::from_str(&text).context("parsing job spec YAML")?
    };

    let token = std::env::var(&spec.access_token_env).with_context(|| {
        format!(
            "reading access token from environment variable {}",
            spec.access_token_env
        )
    })?;
    let transport = Arc::new(RestTransport::new(spec.instance_url.clone(), token)?);

    info!(mode = ?spec.mode, steps = spec.steps.len(), "starting job");

    let code = match spec.mode {
        JobMode::Extract => run_extract(transport, spec.steps).await?,
        JobMode::Load => run_load(transport, spec.steps).await?,
    };

    info!(exit_code = code, "job finished");
    Ok(code)
}

async fn run_extract(transport: Arc<RestTransport>, steps: Vec<StepSpec>) -> Result<i32> {
    let mut operation = ExtractOperation::new(transport);

    for step_spec in &steps {
        let output_file = step_spec
            .output_file
            .as_ref()
            .context("extraction step is missing an output_file")?;
        let writer = CsvRowWriter::create(output_file, step_spec.fields.clone())
            .with_context(|| format!("opening output file {}", output_file.display()))?;

        let scope = step_spec.scope.unwrap_or(crm_sync_core::behavior::ExtractionScope::AllRecords);
        let mut step = ExtractionStep::new(
            step_spec.sobject.clone(),
            step_spec.fields.clone(),
            scope,
            step_spec.where_clause.clone(),
        );
        if let Some(behavior) = step_spec.self_lookup_behavior {
            step.set_self_lookup_behavior_default(behavior);
        }
        if let Some(behavior) = step_spec.outside_lookup_behavior {
            step.set_outside_lookup_behavior_default(behavior);
        }

        operation.context_mut().set_output_file(&step_spec.sobject, Box::new(writer));
        operation.add_step(step);
    }

    for step_spec in &steps {
        for raw_id in &step_spec.selected_ids {
            let id = Id::from_string(raw_id)
                .with_context(|| format!("parsing selected_ids entry '{raw_id}' for {}", step_spec.sobject))?;
            operation.context_mut().add_dependency(&step_spec.sobject, id);
        }
    }

    Ok(operation.execute().await?)
}

async fn run_load(transport: Arc<RestTransport>, steps: Vec<StepSpec>) -> Result<i32> {
    let mut operation = LoadOperation::new(transport);

    for step_spec in &steps {
        let input_file = step_spec
            .input_file
            .as_ref()
            .context("load step is missing an input_file")?;
        let reader = CsvRowReader::open(input_file)
            .with_context(|| format!("opening input file {}", input_file.display()))?;
        operation.context_mut().set_input_file(&step_spec.sobject, Box::new(reader));

        if let Some(result_file) = &step_spec.result_file {
            let writer = CsvRowWriter::create_result(result_file)
                .with_context(|| format!("opening result file {}", result_file.display()))?;
            operation.context_mut().set_result_file(&step_spec.sobject, Box::new(writer));
        }

        let mut step = LoadStep::new(step_spec.sobject.clone(), step_spec.fields.clone());
        if let Some(behavior) = step_spec.outside_lookup_behavior {
            step.set_outside_lookup_behavior_default(behavior);
        }
        operation.add_step(step);
    }

    Ok(operation.execute().await?)
}

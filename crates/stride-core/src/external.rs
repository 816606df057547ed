//! Ports to the external program generator.
//!
//! The generator turns a consultation into a [`ProgramBundle`]. Its
//! algorithm is not part of this crate; stride only stores what it
//! produces.

use std::path::PathBuf;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use stride_db::models::Program;

use crate::error::{PlanError, PlanResult};
use crate::program::{ProgramBundle, create_program, parse_bundle_json};

/// Produces a finalized program bundle for an owner.
#[async_trait]
pub trait ProgramGenerator: Send + Sync {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Generate a bundle for `owner_id` from consultation answers.
    async fn generate(&self, owner_id: Uuid, consultation: &Value) -> anyhow::Result<ProgramBundle>;
}

/// Generator that reads a bundle prepared ahead of time from a JSON file.
#[derive(Debug, Clone)]
pub struct BundleFileGenerator {
    path: PathBuf,
}

impl BundleFileGenerator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ProgramGenerator for BundleFileGenerator {
    fn name(&self) -> &str {
        "bundle-file"
    }

    async fn generate(&self, owner_id: Uuid, _consultation: &Value) -> anyhow::Result<ProgramBundle> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read bundle file {}", self.path.display()))?;
        let bundle = parse_bundle_json(&content)
            .with_context(|| format!("invalid bundle in {}", self.path.display()))?;
        if bundle.owner_id != owner_id {
            bail!(
                "bundle in {} belongs to owner {}, not {owner_id}",
                self.path.display(),
                bundle.owner_id
            );
        }
        Ok(bundle)
    }
}

/// Ask `generator` for a bundle and store it as a new program.
///
/// Generator failures are reported as validation errors: the input could
/// not be turned into a program.
pub async fn generate_program(
    pool: &PgPool,
    generator: &dyn ProgramGenerator,
    owner_id: Uuid,
    consultation: &Value,
) -> PlanResult<Program> {
    let bundle = generator
        .generate(owner_id, consultation)
        .await
        .map_err(|e| PlanError::validation(format!("{} generator: {e:#}", generator.name())))?;
    info!(generator = generator.name(), %owner_id, "bundle generated");
    create_program(pool, &bundle).await
}

//! Finalizer that assembles tier outputs into one JSON document.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::run::{Artifact, RunContext, TierStatus};
use crate::step::{StepError, StepOutcome};

use super::Finalizer;

/// Writes `<output_dir>/<client_id>/<run_id>.json`.
///
/// Only successful tiers contribute. Each tier maps item ids to the
/// outputs the task endpoint returned.
pub struct DocumentFinalizer {
    output_dir: PathBuf,
}

impl DocumentFinalizer {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Path of the document for a run.
    pub fn document_path(&self, ctx: &RunContext) -> PathBuf {
        self.output_dir
            .join(&ctx.client_id)
            .join(format!("{}.json", ctx.run_id))
    }

    fn assemble(ctx: &RunContext, history: &[TierStatus]) -> Value {
        let tiers: Vec<Value> = history
            .iter()
            .filter(|status| status.is_success())
            .map(|status| {
                let outputs: Map<String, Value> = status
                    .outcomes
                    .iter()
                    .filter_map(|o| o.output().map(|v| (o.item_id.clone(), v.clone())))
                    .collect();
                json!({
                    "tier_id": status.tier_id,
                    "outputs": outputs,
                })
            })
            .collect();

        json!({
            "run_id": ctx.run_id,
            "client_id": ctx.client_id,
            "plan": ctx.plan,
            "tiers": tiers,
            "assembled_at": Utc::now(),
        })
    }

    /// Writes to a sibling temp file and renames it into place.
    async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&tmp, path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl Finalizer for DocumentFinalizer {
    fn name(&self) -> &str {
        "document"
    }

    async fn finalize(&self, ctx: &RunContext, history: &[TierStatus]) -> StepOutcome<Artifact> {
        let document = Self::assemble(ctx, history);
        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| StepError::permanent(format!("failed to serialize document: {}", e)))?;

        let path = self.document_path(ctx);
        Self::write_atomic(&path, &bytes).await.map_err(|e| {
            StepError::unavailable(format!("failed to write {}: {}", path.display(), e))
        })?;

        let sha256 = format!("{:x}", Sha256::digest(&bytes));
        info!(
            run_id = %ctx.run_id,
            bytes = bytes.len(),
            "Assembled final document at {}",
            path.display()
        );

        Ok(Artifact {
            artifact_ref: path.display().to_string(),
            bytes: bytes.len() as u64,
            sha256,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{ItemOutcome, ItemResult, RunSeed};
    use crate::step::FailureClass;
    use tempfile::TempDir;

    fn succeeded(id: &str, output: Value) -> ItemOutcome {
        ItemOutcome {
            item_id: id.to_string(),
            attempts: 1,
            result: ItemResult::Succeeded { output },
        }
    }

    fn failed(id: &str) -> ItemOutcome {
        ItemOutcome {
            item_id: id.to_string(),
            attempts: 3,
            result: ItemResult::Failed {
                error: StepError::transient("boom").exhausted(3),
            },
        }
    }

    #[tokio::test]
    async fn test_writes_document_with_successful_tiers() {
        let dir = TempDir::new().unwrap();
        let finalizer = DocumentFinalizer::new(dir.path());
        let ctx = RunContext::new("run-1", RunSeed::new("client-a").with_plan("essay"));

        let history = vec![
            TierStatus::from_outcomes(
                "tier1",
                1,
                vec![
                    succeeded("intro", json!({"text": "hello"})),
                    succeeded("body", json!({"text": "world"})),
                ],
                vec![],
                false,
            ),
            TierStatus::from_outcomes("tier2", 2, vec![failed("outro")], vec![], false),
        ];

        let artifact = finalizer.finalize(&ctx, &history).await.unwrap();
        let path = dir.path().join("client-a").join("run-1.json");
        assert_eq!(artifact.artifact_ref, path.display().to_string());

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(artifact.bytes, bytes.len() as u64);
        assert_eq!(artifact.sha256, format!("{:x}", Sha256::digest(&bytes)));
        assert_eq!(artifact.sha256.len(), 64);

        let doc: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["run_id"], "run-1");
        assert_eq!(doc["plan"], "essay");
        let tiers = doc["tiers"].as_array().unwrap();
        assert_eq!(tiers.len(), 1);
        assert_eq!(tiers[0]["tier_id"], "tier1");
        assert_eq!(tiers[0]["outputs"]["body"]["text"], "world");

        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_unwritable_output_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"file, not a directory").unwrap();

        let finalizer = DocumentFinalizer::new(&blocker);
        let ctx = RunContext::new("run-1", RunSeed::new("client-a"));

        let err = finalizer.finalize(&ctx, &[]).await.unwrap_err();
        assert_eq!(err.class, FailureClass::Unavailable);
    }
}

use crate::config::model::SaveBlock;
use crate::core::execution::Execution;
use crate::middleware::{Chain, Middleware, SinkError, should_deliver};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::warn;

/// On-disk archive sink: one JSON record plus a plain-text output log per
/// execution.
pub struct SaveSink {
    config: SaveBlock,
}

impl SaveSink {
    pub fn new(config: SaveBlock) -> Self {
        SaveSink { config }
    }

    fn base_path(&self, exec: &Execution) -> Result<PathBuf, SinkError> {
        let folder = self
            .config
            .folder
            .as_deref()
            .ok_or_else(|| SinkError::Save("save-folder not set".to_string()))?;
        let stamp = exec.started_at.format("%Y%m%d_%H%M%S");
        Ok(PathBuf::from(folder).join(format!(
            "{stamp}_{}_{}",
            exec.job.kind.section(),
            exec.job.name
        )))
    }

    async fn deliver(&self, exec: &Execution) -> Result<(), SinkError> {
        let base = self.base_path(exec)?;
        if let Some(parent) = base.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SinkError::Save(e.to_string()))?;
        }

        let record = serde_json::to_vec_pretty(exec).map_err(|e| SinkError::Save(e.to_string()))?;
        tokio::fs::write(base.with_extension("json"), record)
            .await
            .map_err(|e| SinkError::Save(e.to_string()))?;

        let mut log = String::new();
        log.push_str(&exec.stdout);
        if !exec.stderr.is_empty() {
            log.push_str(&exec.stderr);
        }
        tokio::fs::write(base.with_extension("log"), log)
            .await
            .map_err(|e| SinkError::Save(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Middleware for SaveSink {
    fn tag(&self) -> &'static str {
        "save"
    }

    async fn call(&self, exec: &mut Execution, chain: Chain<'_>) {
        chain.next(exec).await;
        if should_deliver(self.config.only_on_error, exec)
            && let Err(err) = self.deliver(exec).await
        {
            warn!(job = %exec.job, error = %err, "saving execution record failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::execution::Outcome;
    use crate::core::job::{JobKey, JobKind};
    use crate::middleware::Terminal;
    use chrono::Utc;
    use std::sync::Arc;

    struct NoopTerminal;

    #[async_trait]
    impl Terminal for NoopTerminal {
        async fn execute(&self, exec: &mut Execution) {
            exec.stdout.push_str("hello\n");
            exec.finish(Outcome::Ok, Utc::now());
        }
    }

    #[tokio::test]
    async fn writes_record_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SaveSink::new(SaveBlock {
            folder: Some(dir.path().display().to_string()),
            only_on_error: None,
        });

        let mut exec = Execution::begin(JobKey::new(JobKind::Local, "cleanup"), Utc::now());
        let stack: Vec<Arc<dyn Middleware>> = vec![];
        sink.call(&mut exec, Chain::new(&stack, &NoopTerminal)).await;

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|n| n.ends_with(".json") && n.contains("job-local_cleanup")));
        assert!(entries.iter().any(|n| n.ends_with(".log")));

        let json = entries.iter().find(|n| n.ends_with(".json")).unwrap();
        let record: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(json)).unwrap())
                .unwrap();
        assert_eq!(record["outcome"], "ok");
        assert_eq!(record["stdout"], "hello\n");
    }

    #[tokio::test]
    async fn only_on_error_suppresses_ok_runs() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SaveSink::new(SaveBlock {
            folder: Some(dir.path().display().to_string()),
            only_on_error: Some(true),
        });

        let mut exec = Execution::begin(JobKey::new(JobKind::Local, "quiet"), Utc::now());
        let stack: Vec<Arc<dyn Middleware>> = vec![];
        sink.call(&mut exec, Chain::new(&stack, &NoopTerminal)).await;

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

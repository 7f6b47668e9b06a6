use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{IngestError, Result};

/// Where the ingest worker reads the event stream from.
///
/// The production implementation execs into the Wazuh manager container; the
/// trait exists so the worker can be driven by a scripted source in tests.
#[async_trait]
pub trait TailSource: Send + Sync {
    /// Cheap probe: has the file been written to recently?
    /// Implementations should err on the side of `true` when unsure.
    async fn recently_modified(&self) -> Result<bool>;

    /// Read the newest `max_lines` lines of the file.
    async fn read_tail(&self, max_lines: usize) -> Result<Vec<String>>;
}

/// Tails `archives.json` inside the Wazuh manager container via
/// `docker exec` — the manager writes the file container-locally, so there
/// is no host path to watch.
pub struct ContainerTailSource {
    container: String,
    path: String,
}

impl ContainerTailSource {
    pub fn new(container: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            path: path.into(),
        }
    }

    async fn exec(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("docker")
            .arg("exec")
            .arg(&self.container)
            .args(args)
            .output()
            .await
            .map_err(|e| IngestError::Source(format!("docker exec failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(IngestError::Source(format!(
                "docker exec exited {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|_| IngestError::Source("non-UTF-8 output from container".to_string()))
    }
}

#[async_trait]
impl TailSource for ContainerTailSource {
    async fn recently_modified(&self) -> Result<bool> {
        // `find -newermt` prints the path only when the mtime is within the
        // window; empty output means nothing new since the last couple ticks.
        let out = self
            .exec(&["find", &self.path, "-newermt", "10 seconds ago"])
            .await?;
        Ok(!out.trim().is_empty())
    }

    async fn read_tail(&self, max_lines: usize) -> Result<Vec<String>> {
        let n = max_lines.to_string();
        let out = self.exec(&["tail", "-n", &n, &self.path]).await?;
        let lines: Vec<String> = out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        debug!(count = lines.len(), "read tail lines from container");
        Ok(lines)
    }
}

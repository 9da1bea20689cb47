//! The `docker` runtime executor (spec.md §4.4): builds or pulls an
//! image, runs it with `--rm`, and parses its stdout identically to
//! the shell executor.

use super::BlockExecutor;
use crate::cache::dockerfile_tag;
use async_trait::async_trait;
use lacquer_core::context::ExecutionContext;
use lacquer_core::error::{LacquerError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::info;

/// Default build timeout for a Dockerfile-built image (spec.md §4.4).
const BUILD_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Default pull timeout for a registry image reference (spec.md §4.4).
const PULL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
enum ImageSource {
    /// `image` names a Dockerfile path, or a directory containing one.
    Dockerfile(PathBuf),
    /// `image` is a plain registry reference.
    Reference(String),
}

pub struct ContainerExecutor {
    block_name: String,
    image: String,
    command: Vec<String>,
    env: HashMap<String, String>,
    mount_workspace: bool,
}

impl ContainerExecutor {
    pub fn new(
        block_name: impl Into<String>,
        image: impl Into<String>,
        command: Vec<String>,
        env: HashMap<String, String>,
        mount_workspace: bool,
    ) -> Self {
        Self {
            block_name: block_name.into(),
            image: image.into(),
            command,
            env,
            mount_workspace,
        }
    }

    fn classify(&self) -> ImageSource {
        let path = Path::new(&self.image);
        if self.image.ends_with("Dockerfile") && path.is_file() {
            return ImageSource::Dockerfile(path.to_path_buf());
        }
        let candidate = path.join("Dockerfile");
        if path.is_dir() && candidate.is_file() {
            return ImageSource::Dockerfile(candidate);
        }
        ImageSource::Reference(self.image.clone())
    }

    async fn ensure_image(&self, step_id: &str) -> Result<String> {
        match self.classify() {
            ImageSource::Dockerfile(dockerfile) => self.ensure_built(step_id, &dockerfile).await,
            ImageSource::Reference(reference) => {
                self.ensure_pulled(step_id, &reference).await?;
                Ok(reference)
            }
        }
    }

    async fn ensure_built(&self, step_id: &str, dockerfile: &Path) -> Result<String> {
        let canonical = dockerfile
            .canonicalize()
            .map_err(|e| LacquerError::BlockRegistryError {
                message: format!("cannot resolve Dockerfile {}: {e}", dockerfile.display()),
            })?;
        let contents = tokio::fs::read(&canonical)
            .await
            .map_err(|e| LacquerError::BlockRegistryError {
                message: format!("cannot read Dockerfile {}: {e}", canonical.display()),
            })?;
        let tag = dockerfile_tag(&canonical, &contents);

        if image_exists(&tag).await? {
            return Ok(tag);
        }

        info!(step_id, block = %self.block_name, tag, "building docker image");
        let context_dir = canonical.parent().unwrap_or_else(|| Path::new("."));
        let build = Command::new("docker")
            .args(["build", "-f"])
            .arg(&canonical)
            .args(["-t", &tag])
            .arg(context_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();

        let output = run_with_timeout(step_id, &self.block_name, BUILD_TIMEOUT, build).await?;
        if !output.status.success() {
            return Err(LacquerError::BlockRuntimeError {
                step_id: step_id.to_string(),
                block_name: self.block_name.clone(),
                message: format!(
                    "docker build failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                exit_code: output.status.code(),
            });
        }

        Ok(tag)
    }

    async fn ensure_pulled(&self, step_id: &str, reference: &str) -> Result<()> {
        if image_exists(reference).await? {
            return Ok(());
        }

        info!(step_id, block = %self.block_name, reference, "pulling docker image");
        let pull = Command::new("docker")
            .args(["pull", reference])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();

        let output = run_with_timeout(step_id, &self.block_name, PULL_TIMEOUT, pull).await?;
        if !output.status.success() {
            return Err(LacquerError::BlockRuntimeError {
                step_id: step_id.to_string(),
                block_name: self.block_name.clone(),
                message: format!(
                    "docker pull failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                exit_code: output.status.code(),
            });
        }
        Ok(())
    }
}

async fn image_exists(reference: &str) -> Result<bool> {
    let output = Command::new("docker")
        .args(["image", "inspect", reference])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| LacquerError::BlockRegistryError {
            message: format!("failed to invoke docker: {e}"),
        })?;
    Ok(output.success())
}

async fn run_with_timeout(
    step_id: &str,
    block_name: &str,
    timeout: Duration,
    fut: impl std::future::Future<Output = std::io::Result<std::process::Output>>,
) -> Result<std::process::Output> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| LacquerError::DeadlineExceeded {
            step_id: step_id.to_string(),
            elapsed_ms: timeout.as_millis() as u64,
        })?
        .map_err(|e| LacquerError::BlockRuntimeError {
            step_id: step_id.to_string(),
            block_name: block_name.to_string(),
            message: format!("failed to run docker: {e}"),
            exit_code: None,
        })
}

#[async_trait]
impl BlockExecutor for ContainerExecutor {
    async fn execute(
        &self,
        step_id: &str,
        ctx: &ExecutionContext,
        inputs: HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>> {
        let tag = self.ensure_image(step_id).await?;

        let inputs_json = Value::Object(inputs.into_iter().collect());

        let mut command = Command::new("docker");
        command
            .arg("run")
            .arg("--rm")
            .arg("-i")
            .arg("-e")
            .arg(format!("LACQUER_INPUTS={}", inputs_json));

        for (key, value) in &self.env {
            command.arg("-e").arg(format!("{key}={value}"));
        }

        if self.mount_workspace {
            command.arg("-v").arg(format!("{}:/workspace", ctx.cwd().display()));
        }

        command.arg(&tag);
        command.args(&self.command);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| LacquerError::BlockRuntimeError {
            step_id: step_id.to_string(),
            block_name: self.block_name.clone(),
            message: format!("failed to spawn docker run: {e}"),
            exit_code: None,
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            let _ = stdin.write_all(inputs_json.to_string().as_bytes()).await;
        }

        let wait = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            if let Some(mut out) = child.stdout.take() {
                let _ = out.read_to_end(&mut stdout).await;
            }
            if let Some(mut err) = child.stderr.take() {
                let _ = err.read_to_end(&mut stderr).await;
            }
            let status = child.wait().await;
            (status, stdout, stderr)
        };

        let (status, stdout, stderr) = tokio::select! {
            result = wait => result,
            _ = ctx.cancellation_token().cancelled() => {
                let _ = child.start_kill();
                return Err(LacquerError::BlockRuntimeError {
                    step_id: step_id.to_string(),
                    block_name: self.block_name.clone(),
                    message: "cancelled".to_string(),
                    exit_code: None,
                });
            }
        };

        let status = status.map_err(|e| LacquerError::BlockRuntimeError {
            step_id: step_id.to_string(),
            block_name: self.block_name.clone(),
            message: format!("failed to wait on container: {e}"),
            exit_code: None,
        })?;

        if !status.success() {
            return Err(super::shell::shell_failure(
                step_id,
                &self.block_name,
                status.code(),
                &stderr,
            ));
        }

        Ok(super::shell::parse_block_output(&stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_dockerfile_path() {
        let dir = tempfile::tempdir().unwrap();
        let dockerfile = dir.path().join("Dockerfile");
        std::fs::write(&dockerfile, "FROM alpine").unwrap();

        let exec = ContainerExecutor::new(
            "build",
            dockerfile.to_string_lossy().to_string(),
            vec![],
            HashMap::new(),
            false,
        );
        assert!(matches!(exec.classify(), ImageSource::Dockerfile(_)));
    }

    #[test]
    fn classifies_directory_containing_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM alpine").unwrap();

        let exec = ContainerExecutor::new(
            "build",
            dir.path().to_string_lossy().to_string(),
            vec![],
            HashMap::new(),
            false,
        );
        assert!(matches!(exec.classify(), ImageSource::Dockerfile(_)));
    }

    #[test]
    fn classifies_plain_reference() {
        let exec = ContainerExecutor::new("build", "python:3.12-slim", vec![], HashMap::new(), false);
        assert!(matches!(exec.classify(), ImageSource::Reference(r) if r == "python:3.12-slim"));
    }
}

//! The `bash` runtime executor (spec.md §4.4, §6): materializes the
//! block's inline script to a content-addressed file, runs it under
//! `bash`, and speaks the JSON-stdin/stdout contract shared with the
//! container executor.

use super::BlockExecutor;
use crate::cache::script_hash8;
use async_trait::async_trait;
use lacquer_core::context::ExecutionContext;
use lacquer_core::error::{LacquerError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Grace period between sending a termination signal and killing the
/// child outright (spec.md §5: "signalling, then killing after a grace
/// period of 5 seconds").
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

pub struct ShellExecutor {
    block_name: String,
    script: String,
    cache_dir: PathBuf,
    env: HashMap<String, String>,
}

impl ShellExecutor {
    pub fn new(
        block_name: impl Into<String>,
        script: impl Into<String>,
        cache_dir: PathBuf,
        env: HashMap<String, String>,
    ) -> Self {
        Self {
            block_name: block_name.into(),
            script: script.into(),
            cache_dir,
            env,
        }
    }

    /// Writes `block_<name>_<hash8>.sh` under the cache directory if
    /// not already present, returning its path. Content-addressed
    /// filenames mean concurrent writers converge on the same bytes, so
    /// a create-if-absent check is enough — no locking required.
    async fn materialize_script(&self) -> Result<PathBuf> {
        let hash = script_hash8(self.script.as_bytes());
        let filename = format!("block_{}_{}.sh", self.block_name, hash);
        let path = self.cache_dir.join(filename);

        if !path.exists() {
            tokio::fs::create_dir_all(&self.cache_dir)
                .await
                .map_err(|e| LacquerError::BlockRegistryError {
                    message: format!("cannot create cache dir {}: {e}", self.cache_dir.display()),
                })?;
            tokio::fs::write(&path, self.script.as_bytes())
                .await
                .map_err(|e| LacquerError::BlockRegistryError {
                    message: format!("cache write failed for {}: {e}", path.display()),
                })?;
        }

        Ok(path)
    }
}

#[async_trait]
impl BlockExecutor for ShellExecutor {
    async fn execute(
        &self,
        step_id: &str,
        ctx: &ExecutionContext,
        inputs: HashMap<String, Value>,
    ) -> Result<HashMap<String, Value>> {
        let script_path = self.materialize_script().await?;

        let inputs_json = Value::Object(inputs.clone().into_iter().collect());
        let stdin_doc = serde_json::json!({
            "inputs": inputs_json,
            "env": self.env,
        });
        let stdin_bytes = serde_json::to_vec(&stdin_doc).map_err(|e| LacquerError::BlockRuntimeError {
            step_id: step_id.to_string(),
            block_name: self.block_name.clone(),
            message: format!("failed to encode stdin document: {e}"),
            exit_code: None,
        })?;

        let mut command = Command::new("bash");
        command
            .arg(&script_path)
            .env("WORKSPACE", ctx.cwd().to_string_lossy().to_string())
            .env("LACQUER_INPUTS", inputs_json.to_string())
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(step_id, block = %self.block_name, script = %script_path.display(), "spawning shell block");
        let mut child = command.spawn().map_err(|e| LacquerError::BlockRuntimeError {
            step_id: step_id.to_string(),
            block_name: self.block_name.clone(),
            message: format!("failed to spawn bash: {e}"),
            exit_code: None,
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(&stdin_bytes).await;
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
                terminate_with_grace(&mut child).await;
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
            message: format!("failed to wait on child process: {e}"),
            exit_code: None,
        })?;

        if !status.success() {
            warn!(step_id, block = %self.block_name, code = ?status.code(), "shell block exited non-zero");
            return Err(shell_failure(step_id, &self.block_name, status.code(), &stderr));
        }

        Ok(parse_block_output(&stdout))
    }
}

/// Terminates a cancelled block process per spec.md §5: signal first,
/// then kill outright if it hasn't exited within the grace period.
#[cfg(unix)]
async fn terminate_with_grace(child: &mut tokio::process::Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(id) = child.id() {
        let _ = kill(Pid::from_raw(id as i32), Signal::SIGTERM);
    }
    let _ = tokio::time::timeout(KILL_GRACE_PERIOD, child.wait()).await;
    let _ = child.start_kill();
}

#[cfg(not(unix))]
async fn terminate_with_grace(child: &mut tokio::process::Child) {
    let _ = tokio::time::timeout(KILL_GRACE_PERIOD, child.wait()).await;
    let _ = child.start_kill();
}

pub(crate) fn shell_failure(step_id: &str, block_name: &str, exit_code: Option<i32>, stderr: &[u8]) -> LacquerError {
    let text = String::from_utf8_lossy(stderr);
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&text) {
        if let Some(Value::Object(error)) = obj.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("block reported an error")
                .to_string();
            return LacquerError::BlockRuntimeError {
                step_id: step_id.to_string(),
                block_name: block_name.to_string(),
                message,
                exit_code,
            };
        }
    }
    LacquerError::BlockRuntimeError {
        step_id: step_id.to_string(),
        block_name: block_name.to_string(),
        message: if text.trim().is_empty() {
            "process exited with a non-zero status".to_string()
        } else {
            text.trim().to_string()
        },
        exit_code,
    }
}

/// Stdout, parsed per spec.md §6: a bare JSON object is treated as
/// outputs directly; `{"outputs": <object>}` unwraps one level; any
/// other content (non-JSON, or JSON that isn't an object) becomes a
/// single string output under the key `output`.
pub(crate) fn parse_block_output(stdout: &[u8]) -> HashMap<String, Value> {
    let text = String::from_utf8_lossy(stdout);
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(mut obj)) => {
            if let Some(Value::Object(outputs)) = obj.remove("outputs") {
                object_to_map(outputs)
            } else {
                object_to_map(obj)
            }
        }
        _ => HashMap::from([("output".to_string(), Value::String(text.trim().to_string()))]),
    }
}

fn object_to_map(obj: Map<String, Value>) -> HashMap<String, Value> {
    obj.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_json_object_is_treated_as_outputs() {
        let out = parse_block_output(br#"{"sum": 3}"#);
        assert_eq!(out.get("sum"), Some(&Value::from(3)));
    }

    #[test]
    fn wrapped_outputs_object_is_unwrapped() {
        let out = parse_block_output(br#"{"outputs": {"sum": 3}}"#);
        assert_eq!(out.get("sum"), Some(&Value::from(3)));
    }

    #[test]
    fn non_json_stdout_becomes_single_string_output() {
        let out = parse_block_output(b"plain text result\n");
        assert_eq!(out.get("output"), Some(&Value::from("plain text result")));
    }

    #[test]
    fn structured_stderr_error_is_surfaced() {
        let err = shell_failure("s1", "greet", Some(1), br#"{"error":{"message":"boom"}}"#);
        match err {
            LacquerError::BlockRuntimeError { message, .. } => assert_eq!(message, "boom"),
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn free_text_stderr_is_attached_verbatim() {
        let err = shell_failure("s1", "greet", Some(1), b"no such file");
        match err {
            LacquerError::BlockRuntimeError { message, .. } => assert_eq!(message, "no such file"),
            other => panic!("unexpected error variant: {other:?}"),
        }
    }
}

//! Command executor for deploy scripts
//!
//! Every pipeline step with side effects outside this process runs as an
//! external script from the configured scripts directory.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

pub const DOWNLOAD_IMAGE: &str = "download-image.sh";
pub const DOWNLOAD_METADATA: &str = "download-metadata.sh";
pub const DEPLOY_METADATA: &str = "deploy-metadata.sh";
pub const DEPLOY_CONTAINERS: &str = "deploy-containers.sh";

/// Launch-step output meaning the service already runs at the wanted scale
pub const DESIRED_COUNT_ACHIEVED: &str = "Desired container number already achieved";

/// Captured output of a step that succeeded
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepOutput {
    pub stdout: String,

    /// Only non-empty when stderr is tolerated
    pub stderr: String,
}

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("Unable to run {step}: {source}")]
    Spawn {
        step: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stderr}")]
    Stderr { stderr: String },

    #[error("{step} exited with {status}: {stderr}")]
    Exit {
        step: String,
        status: String,
        stderr: String,
    },
}

impl ExecError {
    /// Diagnostic text the script produced, if any
    pub fn output_text(&self) -> &str {
        match self {
            ExecError::Spawn { .. } => "",
            ExecError::Stderr { stderr } => stderr,
            ExecError::Exit { stderr, .. } => stderr,
        }
    }

    pub fn is_desired_count_achieved(&self) -> bool {
        self.output_text().trim() == DESIRED_COUNT_ACHIEVED
    }
}

/// Runs a named step with positional arguments
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run_step(&self, name: &str, args: &[String]) -> Result<StepOutput, ExecError>;
}

/// Runs `<scripts_path>/<name>` as a child process.
///
/// In strict mode any stderr output fails the step. Otherwise only a non-zero
/// exit does, and stderr is handed back for logging.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    scripts_path: PathBuf,
    strict_stderr: bool,
}

impl ScriptRunner {
    pub fn new(scripts_path: impl Into<PathBuf>, strict_stderr: bool) -> Self {
        Self {
            scripts_path: scripts_path.into(),
            strict_stderr,
        }
    }

    pub fn script_path(&self, name: &str) -> PathBuf {
        self.scripts_path.join(name)
    }
}

#[async_trait]
impl CommandRunner for ScriptRunner {
    async fn run_step(&self, name: &str, args: &[String]) -> Result<StepOutput, ExecError> {
        let script = self.script_path(name);
        debug!("Running {} {:?}", script.display(), args);

        let output = Command::new(&script)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExecError::Spawn {
                step: name.to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if self.strict_stderr && !stderr.is_empty() {
            return Err(ExecError::Stderr { stderr });
        }
        if !output.status.success() {
            return Err(ExecError::Exit {
                step: name.to_string(),
                status: output.status.to_string(),
                stderr,
            });
        }
        if !stderr.is_empty() {
            warn!("{} wrote to stderr: {}", name, stderr.trim_end());
        }

        Ok(StepOutput { stdout, stderr })
    }
}

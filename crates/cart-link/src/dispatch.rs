//! Launch dispatch for decoded records

use std::future::Future;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::DispatchError;

/// Something that acts on a record's executable path
///
/// The supervisor calls this on a spawned task, once per decoded record,
/// and reports the outcome as a link event. No retries are attempted.
pub trait Dispatcher: Send + Sync + 'static {
    fn launch(&self, path: &str) -> impl Future<Output = Result<(), DispatchError>> + Send;
}

/// Starts the executable as a detached child process
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    args: Vec<String>,
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pass fixed arguments to every launched process
    pub fn with_args(args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl Dispatcher for ProcessLauncher {
    fn launch(&self, path: &str) -> impl Future<Output = Result<(), DispatchError>> + Send {
        let path = path.trim().to_string();
        let args = self.args.clone();

        async move {
            if path.is_empty() {
                return Err(DispatchError::EmptyPath);
            }
            if tokio::fs::metadata(&path).await.is_err() {
                return Err(DispatchError::NotFound(path));
            }

            let mut child = Command::new(&path)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| DispatchError::SpawnFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;

            info!("Launched {} (pid {:?})", path, child.id());

            // Reap the child in the background
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) => debug!("{} exited with {}", path, status),
                    Err(e) => warn!("Failed to wait for {}: {}", path, e),
                }
            });

            Ok(())
        }
    }
}

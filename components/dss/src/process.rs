//! Child-process spawning with log-file-bound stderr and context-managed
//! teardown.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use ephyr_log::log;
use tokio::{fs::File, process::Child};

use crate::error::SpawnError;

/// Spawns a child process whose stderr is appended to
/// `<log_dir>/<mode>-<id>` and whose stdout is piped for optional reading.
///
/// The returned [`ProcessHandle`] kills and awaits the child on [`Drop`] if
/// it is still alive, so no zombies are left behind regardless of which
/// exit path was taken.
pub async fn run(
    log_dir: &Path,
    id: &str,
    mode: &str,
    program: &Path,
    args: &[String],
) -> Result<ProcessHandle, SpawnError> {
    let log_path = log_dir.join(format!("{}-{}", mode, id));
    let log_file = File::create(&log_path).await.map_err(|e| SpawnError {
        program: program.display().to_string(),
        message: format!("failed to open log file {}: {}", log_path.display(), e),
    })?;
    let stderr = log_file.into_std().await;

    let child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SpawnError {
            program: program.display().to_string(),
            message: e.to_string(),
        })?;

    Ok(ProcessHandle {
        child: Some(child),
        log_path,
    })
}

/// Handle to a spawned child process. All I/O endpoints are released, and
/// the child killed if still alive, when this value is dropped.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Option<Child>,
    log_path: PathBuf,
}

impl ProcessHandle {
    /// The process id of the child, if it is still tracked.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    /// Path of the log file this child's stderr was redirected to.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Waits for the child to exit on its own, returning its exit status.
    ///
    /// # Errors
    ///
    /// Propagates any I/O error from `wait()`.
    pub async fn wait(&mut self) -> std::io::Result<std::process::ExitStatus> {
        match self.child.as_mut() {
            Some(c) => c.wait().await,
            None => unreachable!("wait() called after the child was taken"),
        }
    }

    /// Sends `SIGKILL` and waits for the child to actually exit.
    pub async fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                log::debug!("failed to signal child (likely already exited): {}", e);
            }
            let _ = child.wait().await;
        }
        self.child = None;
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            // `kill_on_drop(true)` already requested the kill; best-effort
            // reap it in the background so we never leave a zombie.
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
        }
    }
}

#[cfg(test)]
mod process_spec {
    use super::*;

    #[tokio::test]
    async fn spawn_failure_surfaces_as_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(
            dir.path(),
            "C1",
            "fetch",
            Path::new("/no/such/binary-dss-test"),
            &[],
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn spawned_process_can_be_waited_on() {
        let dir = tempfile::tempdir().unwrap();
        let mut handle = run(dir.path(), "C1", "fetch", Path::new("/bin/true"), &[])
            .await
            .unwrap();
        let status = handle.wait().await.unwrap();
        assert!(status.success());
    }
}

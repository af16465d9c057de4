//! Synchronous launch of the external trainer process

use crate::error::{PipelineError, Result};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::{info, warn};

/// Runs the trainer binary with a configuration path as its sole argument
#[derive(Debug, Clone)]
pub struct TrainerLauncher {
    binary: PathBuf,
}

fn relay<R: Read>(stream: R, is_stderr: bool) -> usize {
    let mut lines = 0;
    for line in BufReader::new(stream).lines().map_while(std::result::Result::ok) {
        lines += 1;
        if is_stderr {
            warn!(target: "criteo_pipeline::trainer", "{line}");
        } else {
            info!(target: "criteo_pipeline::trainer", "{line}");
        }
    }
    lines
}

impl TrainerLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into() }
    }

    /// Block until the trainer exits. Any non-zero exit is an error
    /// carrying the code (None when killed by a signal).
    pub fn run(&self, config_path: &Path) -> Result<()> {
        if !config_path.exists() {
            return Err(PipelineError::MissingInput(config_path.to_path_buf()));
        }
        let mut command = Command::new(&self.binary);
        command
            .arg(config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(binary = %self.binary.display(), config = %config_path.display(), "launching trainer");
        let start = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            PipelineError::ConfigError(format!("cannot start {}: {e}", self.binary.display()))
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let lines = std::thread::scope(|s| {
            let err_lines = s.spawn(move || stderr.map(|e| relay(e, true)).unwrap_or(0));
            let out_lines = stdout.map(|o| relay(o, false)).unwrap_or(0);
            out_lines + err_lines.join().unwrap_or(0)
        });

        let status = child.wait()?;
        if !status.success() {
            return Err(PipelineError::TrainerFailed { code: status.code() });
        }
        info!(
            lines,
            elapsed_s = start.elapsed().as_secs(),
            "trainer finished"
        );
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    fn config_file(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("run.sh");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_success() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_file(dir.path(), "echo iter 1\necho warning >&2\nexit 0\n");
        assert!(TrainerLauncher::new("sh").run(&config).is_ok());
    }

    #[test]
    fn test_nonzero_exit_carries_code() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_file(dir.path(), "echo failing\nexit 3\n");
        let err = TrainerLauncher::new("sh").run(&config).unwrap_err();
        assert!(matches!(err, PipelineError::TrainerFailed { code: Some(3) }));
    }

    #[test]
    fn test_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_file(dir.path(), "");
        let err = TrainerLauncher::new(dir.path().join("no-such-trainer")).run(&config).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigError(_)));
    }

    #[test]
    fn test_missing_config() {
        let err = TrainerLauncher::new("sh").run(Path::new("/nonexistent/config.json")).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(_)));
    }
}

mod classify;
mod config;

pub use classify::{CREDENTIAL_ERROR_MESSAGE, Failure, classify, remediation};
pub use config::{GsutilConfig, project_root};

use log::{debug, warn};
use std::{
    collections::HashMap,
    io::{self, BufReader, Read, Write},
    path::Path,
    process::{Command, ExitStatus, Stdio},
    thread,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gsutil credential error\n{remediation}")]
    Credential { remediation: String },

    #[error("error running the gsutil command {args:?} ({status}):\n{stderr}")]
    CommandFailed {
        args: Vec<String>,
        status: ExitStatus,
        stderr: String,
    },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// The two operations the release manager needs from object storage.
pub trait ObjectStore {
    /// Objects matching `url` (wildcards allowed). Any failure other than a
    /// credential failure yields an empty list, so "missing" and "could not
    /// list" look the same to callers.
    fn list(&self, url: &str) -> Result<Vec<String>, GatewayError>;

    fn copy(&self, url: &str, dest: &Path) -> Result<(), GatewayError>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for &T {
    fn list(&self, url: &str) -> Result<Vec<String>, GatewayError> {
        (**self).list(url)
    }

    fn copy(&self, url: &str, dest: &Path) -> Result<(), GatewayError> {
        (**self).copy(url, dest)
    }
}

/// [`ObjectStore`] backed by the `gsutil` command line tool.
pub struct Gsutil {
    config: GsutilConfig,
    extra_envs: HashMap<String, String>,
}

impl Gsutil {
    pub fn new(config: GsutilConfig) -> Gsutil {
        Gsutil {
            config,
            extra_envs: HashMap::new(),
        }
    }

    pub fn with_extra_envs(self, extra_envs: HashMap<String, String>) -> Gsutil {
        Gsutil { extra_envs, ..self }
    }

    pub fn config(&self) -> &GsutilConfig {
        &self.config
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut command = self.config.command();
        command.args(args);
        command.envs(&self.extra_envs);
        command.stdin(Stdio::null());
        command
    }

    fn spawn_error(&self, source: io::Error) -> GatewayError {
        GatewayError::Spawn {
            program: self.config.display(),
            source,
        }
    }

    fn credential_error(&self) -> GatewayError {
        GatewayError::Credential {
            remediation: remediation(&self.config),
        }
    }
}

impl ObjectStore for Gsutil {
    fn list(&self, url: &str) -> Result<Vec<String>, GatewayError> {
        let mut command = self.command(&["ls", url]);
        debug!("Running gsutil command: {:?}", command);
        let output = command.output().map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if classify(&stderr) == Failure::Credential {
                return Err(self.credential_error());
            }
            warn!(
                "gsutil ls {} failed ({}), treating as not found: {}",
                url,
                output.status,
                stderr.trim()
            );
            return Ok(Vec::new());
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect())
    }

    fn copy(&self, url: &str, dest: &Path) -> Result<(), GatewayError> {
        let mut command = self.command(&["cp", url]);
        command.arg(dest);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        debug!("Running gsutil command: {:?}", command);

        let (status, stderr) =
            run_cmd_and_tee_stderr(&mut command).map_err(|e| self.spawn_error(e))?;
        if status.success() {
            return Ok(());
        }
        match classify(&stderr) {
            Failure::Credential => Err(self.credential_error()),
            Failure::Other => Err(GatewayError::CommandFailed {
                args: vec![
                    "cp".to_string(),
                    url.to_string(),
                    dest.to_string_lossy().into_owned(),
                ],
                status,
                stderr,
            }),
        }
    }
}

/// Streams the child's output to ours as it arrives, keeping a copy of stderr.
fn run_cmd_and_tee_stderr(cmd: &mut Command) -> Result<(ExitStatus, String), io::Error> {
    let mut child = cmd.spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("Failed to capture stdout"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("Failed to capture stderr"))?;

    let stdout_thread = thread::spawn(move || {
        let mut reader = BufReader::new(stdout);
        let mut buffer = [0; 1024];

        while let Ok(n) = reader.read(&mut buffer) {
            if n == 0 {
                break;
            }
            let mut out = io::stdout();
            if out.write_all(&buffer[0..n]).and_then(|_| out.flush()).is_err() {
                break;
            }
        }
    });

    // gsutil reports progress on stderr
    let stderr_thread = thread::spawn(move || {
        let mut reader = BufReader::new(stderr);
        let mut buffer = [0; 1024];
        let mut captured = Vec::new();

        while let Ok(n) = reader.read(&mut buffer) {
            if n == 0 {
                break;
            }
            captured.extend_from_slice(&buffer[0..n]);
            let mut err = io::stderr();
            err.write_all(&buffer[0..n]).and_then(|_| err.flush()).ok();
        }
        captured
    });

    let status = child.wait()?;

    stdout_thread
        .join()
        .map_err(|_| io::Error::other("stdout forwarding thread panicked"))?;
    let captured = stderr_thread
        .join()
        .map_err(|_| io::Error::other("stderr forwarding thread panicked"))?;

    Ok((status, String::from_utf8_lossy(&captured).into_owned()))
}

//! Values used when the command line leaves an argument out.

use log::debug;
use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

pub fn default_target(root: &Path) -> PathBuf {
    root.join("third_party").join("branded_chrome")
}

/// The Chrome version pinned in the checkout's DEPS, via `gclient getdep`.
pub fn deps_chrome_version(root: &Path) -> Option<String> {
    let output = Command::new("gclient")
        .args(["getdep", "--var=chrome"])
        .current_dir(root)
        .stdin(Stdio::null())
        .output();
    let output = match output {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            debug!(
                "gclient getdep failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return None;
        }
        Err(err) => {
            debug!("failed to run gclient: {}", err);
            return None;
        }
    };

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!version.is_empty()).then_some(version)
}

use gsutil_run::GatewayError;
use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Unsupported platform or malformed arguments.
    #[error("{0}")]
    Configuration(String),

    #[error("Build not found at: {browsable_url}")]
    NotFound { browsable_url: String },

    #[error("gsutil credential error\n{remediation}")]
    Credential { remediation: String },

    #[error(transparent)]
    Storage(GatewayError),

    #[error("failed to {action} {}", .path.display())]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The version stamp claims a version whose binary is missing.
    #[error("{} records version {version} but {} does not exist", .stamp.display(), .binary.display())]
    Consistency {
        version: String,
        stamp: PathBuf,
        binary: PathBuf,
    },
}

impl From<GatewayError> for Error {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Credential { remediation } => Error::Credential { remediation },
            other => Error::Storage(other),
        }
    }
}

pub(crate) fn fs_err<'a>(
    action: &'static str,
    path: &'a Path,
) -> impl FnOnce(io::Error) -> Error + 'a {
    move |source| Error::Filesystem {
        action,
        path: path.to_path_buf(),
        source,
    }
}

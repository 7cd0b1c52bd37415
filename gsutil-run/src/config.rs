use dotenv::dotenv;
use std::{
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    process::Command,
};

/// Root of the checkout the tool operates in.
///
/// Reads `RELEASE_MAN_ROOT` (from the environment or a `.env` file), expanding a
/// leading `~`, and falls back to the current directory.
pub fn project_root() -> PathBuf {
    dotenv().ok();
    let root = match env::var("RELEASE_MAN_ROOT") {
        Ok(root) if !root.is_empty() => root,
        _ => return env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };

    let root = match (root.strip_prefix('~'), env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{home}{rest}"),
        _ => root.clone(),
    };
    fs::canonicalize(&root).unwrap_or_else(|_| PathBuf::from(root))
}

/// How to invoke the storage CLI. Resolved once and handed to [`crate::Gsutil`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GsutilConfig {
    program: PathBuf,
    interpreter: Option<PathBuf>,
}

impl GsutilConfig {
    /// A `.py` program is run through `$PYTHON` (default `python3`).
    pub fn new(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let interpreter = if program.extension().is_some_and(|ext| ext == "py") {
            let python = env::var_os("PYTHON")
                .filter(|python| !python.is_empty())
                .unwrap_or_else(|| OsString::from("python3"));
            Some(PathBuf::from(python))
        } else {
            None
        };
        Self {
            program,
            interpreter,
        }
    }

    pub fn with_interpreter(self, interpreter: Option<PathBuf>) -> Self {
        Self {
            interpreter,
            ..self
        }
    }

    /// `GSUTIL_PATH`, then `gsutil` on `PATH`, then the depot_tools copy under `root`.
    pub fn from_env(root: &Path) -> Self {
        dotenv().ok();
        if let Some(path) = env::var_os("GSUTIL_PATH").filter(|path| !path.is_empty()) {
            return Self::new(path);
        }
        if let Ok(path) = which::which("gsutil") {
            return Self::new(path);
        }
        Self::new(
            root.join("third_party")
                .join("depot_tools")
                .join("gsutil.py"),
        )
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn interpreter(&self) -> Option<&Path> {
        self.interpreter.as_deref()
    }

    pub fn command(&self) -> Command {
        match &self.interpreter {
            Some(interpreter) => {
                let mut command = Command::new(interpreter);
                command.arg(&self.program);
                command
            }
            None => Command::new(&self.program),
        }
    }

    /// The invocation as a user would type it.
    pub fn display(&self) -> String {
        match &self.interpreter {
            Some(interpreter) => format!(
                "{} {}",
                interpreter.display(),
                self.program.display()
            ),
            None => self.program.display().to_string(),
        }
    }
}

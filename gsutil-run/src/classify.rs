//! Turns an opaque gsutil failure into something the caller can act on.
//!
//! gsutil reports everything through stderr text, so all pattern matching on
//! that text lives here.

use crate::GsutilConfig;
use once_cell::sync::Lazy;
use regex::Regex;

pub const CREDENTIAL_ERROR_MESSAGE: &str =
    "You are attempting to access protected data with no configured credentials";

static AUTH_STATUS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(status|ServiceException:)[ =]40[13]").expect("Invalid auth status regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// 401/403 from the backend, or no credentials configured at all.
    Credential,
    Other,
}

pub fn classify(stderr: &str) -> Failure {
    if AUTH_STATUS_REGEX.is_match(stderr) || stderr.starts_with(CREDENTIAL_ERROR_MESSAGE) {
        Failure::Credential
    } else {
        Failure::Other
    }
}

pub fn remediation(config: &GsutilConfig) -> String {
    format!(
        "Follow these steps to configure your credentials and try again:\n  \
         1. Run \"{} config\" and follow its instructions.\n  \
         2. If you have a @google.com account, use that account.\n  \
         3. For the project-id, just enter 0.\n\
         If this issue persists after running config, you might have an outdated \
         .boto file; try removing it (usually located in your home directory).",
        config.display()
    )
}

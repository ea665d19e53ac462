use std::path::PathBuf;

use crate::credentials::Credentials;

/// Transport and diagnostics switches handed to the fetch client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchPolicy {
    pub allow_http: bool,
    pub skip_tls_verify: bool,
    pub verbose: bool,
}

/// Everything a single run needs, built once from the command line.
#[derive(Debug, Clone)]
pub struct Config {
    pub source: String,
    pub output: PathBuf,
    pub credentials: Credentials,
    pub prompt_credentials: bool,
    pub policy: FetchPolicy,
    /// Where the scratch directory is created. `None` means the system temp dir.
    pub scratch_parent: Option<PathBuf>,
}

impl Config {
    pub fn new(source: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Config {
            source: source.into(),
            output: output.into(),
            credentials: Credentials::default(),
            prompt_credentials: false,
            policy: FetchPolicy::default(),
            scratch_parent: None,
        }
    }
}

use std::path::PathBuf;

use clap::{CommandFactory, Parser};

use crate::config::{Config, FetchPolicy};
use crate::credentials::Credentials;

#[derive(Debug, Parser)]
#[command(
    name = "oci-fetch",
    version,
    about = "an OCI image fetcher",
    long_about = "oci-fetch will fetch an OCI image and store it on the local filesystem in a .tar.gz file",
    override_usage = "oci-fetch [OPTIONS] docker://HOST/IMAGENAME[:TAG] FILEPATH",
    after_help = "Example: oci-fetch docker://registry-1.docker.io/library/nginx:latest nginx.oci"
)]
pub struct Cli {
    /// username for pull
    #[arg(long, default_value = "")]
    pub username: String,

    /// password for pull
    #[arg(long, default_value = "")]
    pub password: String,

    /// prompt for username and password for pull
    #[arg(long)]
    pub prompt_credentials: bool,

    /// print out debugging information to stderr
    #[arg(long)]
    pub debug: bool,

    /// don't enforce encryption when fetching images
    #[arg(long)]
    pub insecure_allow_http: bool,

    /// don't perform TLS certificate verification
    #[arg(long)]
    pub insecure_skip_tls_verification: bool,

    /// Source reference and destination file
    #[arg(value_name = "ARGS", num_args = 0..)]
    pub args: Vec<String>,
}

impl Cli {
    /// Build the run configuration, or `None` unless exactly a source and a
    /// destination were given.
    pub fn into_config(self) -> Option<Config> {
        let [source, output]: [String; 2] = self.args.try_into().ok()?;
        Some(Config {
            source,
            output: PathBuf::from(output),
            credentials: Credentials::new(self.username, self.password),
            prompt_credentials: self.prompt_credentials,
            policy: FetchPolicy {
                allow_http: self.insecure_allow_http,
                skip_tls_verify: self.insecure_skip_tls_verification,
                verbose: self.debug,
            },
            scratch_parent: None,
        })
    }

    pub fn usage() -> String {
        Cli::command().render_help().to_string()
    }
}

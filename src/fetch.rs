//! Sequences reference parsing, credential prompting, the registry fetch and
//! archive production for one invocation.

use std::fs::File;
use std::io::{BufRead, Write};
use std::path::Path;

use crate::archive;
use crate::config::{Config, FetchPolicy};
use crate::credentials::{Credentials, Prompter, ReadSecret};
use crate::error::Error;
use crate::images::{ImageFetcher, RegistryFetcher};
use crate::reference::ImageReference;
use crate::session::FetchSession;

/// Run with the terminal prompter and the registry client.
pub fn run(config: &Config) -> Result<(), Error> {
    run_with(config, &mut Prompter::terminal(), RegistryFetcher::new)
}

/// Run with an explicit prompter and fetch client constructor.
///
/// The scratch directory is removed before this returns on every path that
/// gets past reference parsing.
pub fn run_with<R, W, S, F, C>(
    config: &Config,
    prompter: &mut Prompter<R, W, S>,
    connect: C,
) -> Result<(), Error>
where
    R: BufRead,
    W: Write,
    S: ReadSecret,
    F: ImageFetcher,
    C: FnOnce(Credentials, FetchPolicy) -> F,
{
    let reference = ImageReference::parse(&config.source)?;

    let session =
        FetchSession::create(config.scratch_parent.as_deref()).map_err(Error::Scratch)?;
    let result = fetch_into(config, &reference, &session, prompter, connect);

    let scratch = session.path().to_path_buf();
    if let Err(e) = session.close() {
        log::warn!("unable to remove {}: {}", scratch.display(), e);
    }
    result
}

fn fetch_into<R, W, S, F, C>(
    config: &Config,
    reference: &ImageReference,
    session: &FetchSession,
    prompter: &mut Prompter<R, W, S>,
    connect: C,
) -> Result<(), Error>
where
    R: BufRead,
    W: Write,
    S: ReadSecret,
    F: ImageFetcher,
    C: FnOnce(Credentials, FetchPolicy) -> F,
{
    let mut credentials = config.credentials.clone();
    if config.prompt_credentials {
        prompter
            .prompt_credentials(&mut credentials)
            .map_err(Error::Credentials)?;
    }

    let fetcher = connect(credentials, config.policy);
    log::debug!("fetching {} into {}", reference, session.path().display());
    fetcher.fetch(reference, session.path())?;

    write_output(session.path(), &config.output)
}

fn write_output(root: &Path, output: &Path) -> Result<(), Error> {
    let file = File::create(output).map_err(|source| Error::CreateOutput {
        path: output.to_path_buf(),
        source,
    })?;
    archive::pack_directory(root, file)?;
    log::debug!("wrote {}", output.display());
    Ok(())
}

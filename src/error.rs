use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::images::FetchError;
use crate::reference::ReferenceError;

/// Everything that can end an `oci-fetch` run.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    #[error("unable to create scratch directory: {0}")]
    Scratch(#[source] io::Error),
    #[error("unable to read credentials: {0}")]
    Credentials(#[source] io::Error),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unable to create {}: {source}", path.display())]
    CreateOutput {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

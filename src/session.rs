use std::io;
use std::path::Path;

use tempfile::TempDir;

const PREFIX: &str = "oci-fetch";

/// Scratch directory owned by one fetch. Dropping the session removes it
/// recursively; `close` does the same but reports failures.
#[derive(Debug)]
pub struct FetchSession {
    dir: TempDir,
}

impl FetchSession {
    pub fn create(parent: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(PREFIX);
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        log::debug!("created scratch directory {}", dir.path().display());
        Ok(FetchSession { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn close(self) -> io::Result<()> {
        log::debug!("removing scratch directory {}", self.dir.path().display());
        self.dir.close()
    }
}

//! Error types shared by every part of the module subsystem.
//!
//! The CLI wraps these in `anyhow` for reporting; inside the library every
//! fallible operation returns [`Result`].

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::module::elf::ElfError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing file, missing `.modinfo`, no search hit or no alias match.
    #[error("{what} not found")]
    NotFound { what: String },

    /// The module image is not a well-formed ELF object.
    #[error("malformed module image {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ElfError,
    },

    /// The cache file exists but is not a valid descriptor list.
    #[error("corrupt module cache {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A privileged kernel call rejected the request. `code` is the raw errno.
    #[error("{op} {target} rejected by kernel: {}", io::Error::from_raw_os_error(*code))]
    Os {
        op: &'static str,
        target: String,
        code: i32,
    },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A module was reached again while its own dependencies were resolving.
    #[error("dependency cycle: {}", chain.join(" -> "))]
    DependencyCycle { chain: Vec<String> },

    #[error("invalid module parameters: {0}")]
    InvalidParams(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound { what: what.into() }
    }

    /// Wrap a filesystem error, folding `ENOENT` into [`Error::NotFound`].
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref();
        if source.kind() == io::ErrorKind::NotFound {
            Error::not_found(path.display().to_string())
        } else {
            Error::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Raw errno of a rejected kernel call, if this is one.
    pub fn os_code(&self) -> Option<i32> {
        match self {
            Error::Os { code, .. } => Some(*code),
            _ => None,
        }
    }
}

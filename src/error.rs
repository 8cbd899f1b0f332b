use std::path::PathBuf;
use std::time::Duration;

use crate::binary::{Arch, Format};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("binary type is unknown")]
    UnrecognizedFormat,

    #[error("malformed {format} image: {source}")]
    Malformed {
        format: Format,
        #[source]
        source: goblin::error::Error,
    },

    #[error("malformed section {name}: {reason}")]
    MalformedSection { name: String, reason: String },

    #[error("malformed symbol table {table}: entry {index} has no name in the string table")]
    MalformedSymbolTable { table: &'static str, index: usize },

    #[error("malformed dynamic table: {reason}")]
    MalformedDynamicTable { reason: String },

    #[error("architecture {arch} is not supported for {operation}")]
    UnknownArchitecture { arch: Arch, operation: &'static str },

    #[error("symbol {0} not found")]
    SymbolNotFound(String),

    #[error("string {0:?} not found")]
    StringNotFound(String),

    #[error("gadget {0} not found")]
    GadgetNotFound(String),

    #[error("gadget index was not built for this analysis")]
    GadgetIndexUnavailable,

    #[error("assembler {program} not found in PATH")]
    AssemblerUnavailable { program: String },

    #[error("assembler {program} did not finish within {timeout:?}")]
    AssemblerTimeout { program: String, timeout: Duration },

    #[error("assembler {program} failed: {stderr}")]
    AssemblerFailed { program: String, stderr: String },

    #[error("{operation} is not supported for {format} binaries")]
    NotSupported {
        format: Format,
        operation: &'static str,
    },

    #[error("failed to build string matcher: {0}")]
    StringSearch(#[from] aho_corasick::BuildError),

    #[error("instruction decoder error: {0}")]
    Decoder(String),

    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    /// Query misses that callers are expected to branch on.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::SymbolNotFound(_) | Error::StringNotFound(_) | Error::GadgetNotFound(_)
        )
    }
}

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
#[allow(dead_code)]
pub enum Error {
    #[error("no such host: {0}")]
    HostNotFound(String),

    #[error("cyclic include: {}", .0.display())]
    CyclicInclude(PathBuf),

    #[error("cannot parse {}: {detail}", .path.display())]
    Parse { path: PathBuf, detail: String },

    #[error("cannot connect to {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no available gateway")]
    GatewayChainExhausted,

    #[error("hostname resolution failed: {0}")]
    ResolveFailure(String),

    #[error("invalid rate limit: {0:?}")]
    RateParse(String),

    #[error("invalid command line: {0}")]
    CommandParse(String),

    #[error("subprocess exited with code {exit_code}: {stderr}")]
    Subprocess { exit_code: i32, stderr: String },

    #[error("dry-run: {0}")]
    DryRun(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

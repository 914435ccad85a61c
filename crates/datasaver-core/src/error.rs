//! Core error types

use std::path::PathBuf;

use thiserror::Error;

use crate::authority::CallbackId;
use crate::policy::Uid;

/// Errors reported by a policy authority implementation
#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt policy store at {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Conflicting policy for uid {0}: allow and reject are mutually exclusive")]
    ConflictingPolicy(Uid),

    #[error("Unknown callback: {0}")]
    UnknownCallback(CallbackId),
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Authority error: {0}")]
    Authority(#[from] AuthorityError),
}

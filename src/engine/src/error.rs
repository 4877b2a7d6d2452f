// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Error kinds surfaced to the protocol layer. The storage core never
//! retries on its own; it returns the kind and lets the protocol
//! pipeline decide (the single exception being the bounded
//! xattr-preserving retry in the store pipeline).

use seqstore::{MutationError, Seqno};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq, Copy, Clone)]
pub enum ErrorKind {
    #[error("key not found")]
    NotFound,
    #[error("key already exists")]
    KeyAlreadyExists,
    #[error("item is locked")]
    Locked,
    #[error("cas mismatch")]
    CasMismatch,
    #[error("replace on absent key")]
    NotStored,
    #[error("value too big")]
    TooBig,
    #[error("out of memory")]
    OutOfMemory,
    #[error("temporary failure, retry later")]
    TemporaryFailure,
    #[error("store predicate failed")]
    PredicateFailed,
    #[error("vbucket is not owned by this node")]
    NotMyVBucket,
    #[error("stream cannot be opened at the requested position, roll back to {to_seqno}")]
    Rollback { to_seqno: Seqno },
    #[error("invalid argument")]
    InvalidArgument,
}

impl From<MutationError> for ErrorKind {
    fn from(e: MutationError) -> Self {
        match e {
            MutationError::NotFound => ErrorKind::NotFound,
            MutationError::KeyAlreadyExists => ErrorKind::KeyAlreadyExists,
            MutationError::Locked => ErrorKind::Locked,
            MutationError::CasMismatch => ErrorKind::CasMismatch,
            MutationError::NotStored => ErrorKind::NotStored,
            MutationError::PredicateFailed => ErrorKind::PredicateFailed,
            MutationError::InvalidState => ErrorKind::NotMyVBucket,
        }
    }
}

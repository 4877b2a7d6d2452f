// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Errors surfaced by the storage core. The engine layer maps these onto
//! its wire-visible error kinds.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq, Copy, Clone)]
pub enum MutationError {
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
    #[error("store predicate rejected the mutation")]
    PredicateFailed,
    #[error("vbucket is not in a state that accepts this operation")]
    InvalidState,
}

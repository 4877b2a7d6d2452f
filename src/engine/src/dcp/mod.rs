// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! DCP producer-side plumbing: per-stream buffers and the backfill task
//! that feeds them from a vbucket's sequence list.

mod backfill;
mod stream;

pub(crate) use backfill::{BackfillTask, ScanBudget};
pub use stream::{StreamHandle, StreamState};
pub(crate) use stream::ActiveStream;

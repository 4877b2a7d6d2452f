// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::{Deserialize, Serialize};

// thread counts of zero mean "derive from the CPU count", clamped to the
// per-type bounds below
const NUM_READERS: usize = 0;
const NUM_WRITERS: usize = 0;
const NUM_AUXIO: usize = 0;
const NUM_NONIO: usize = 0;

const READER_BOUNDS: (usize, usize) = (4, 16);
const WRITER_BOUNDS: (usize, usize) = (4, 16);
const AUXIO_BOUNDS: (usize, usize) = (2, 8);
const NONIO_BOUNDS: (usize, usize) = (2, 8);

// helper functions
fn num_readers() -> usize {
    NUM_READERS
}

fn num_writers() -> usize {
    NUM_WRITERS
}

fn num_auxio() -> usize {
    NUM_AUXIO
}

fn num_nonio() -> usize {
    NUM_NONIO
}

fn cores() -> usize {
    std::thread::available_parallelism()
        .map(|c| c.get())
        .unwrap_or(1)
}

fn derive(configured: usize, cores: usize, bounds: (usize, usize)) -> usize {
    if configured != 0 {
        return configured;
    }
    configured.max(cores).clamp(bounds.0, bounds.1)
}

// definitions
#[derive(Serialize, Deserialize, Debug)]
pub struct Executor {
    #[serde(default = "num_readers")]
    num_readers: usize,
    #[serde(default = "num_writers")]
    num_writers: usize,
    #[serde(default = "num_auxio")]
    num_auxio: usize,
    #[serde(default = "num_nonio")]
    num_nonio: usize,
}

// implementation
impl Executor {
    pub fn num_readers(&self) -> usize {
        derive(self.num_readers, cores(), READER_BOUNDS)
    }

    pub fn num_writers(&self) -> usize {
        derive(self.num_writers, cores(), WRITER_BOUNDS)
    }

    pub fn num_auxio(&self) -> usize {
        derive(self.num_auxio, cores() / 4, AUXIO_BOUNDS)
    }

    pub fn num_nonio(&self) -> usize {
        derive(self.num_nonio, cores() / 4, NONIO_BOUNDS)
    }
}

// trait implementations
impl Default for Executor {
    fn default() -> Self {
        Self {
            num_readers: num_readers(),
            num_writers: num_writers(),
            num_auxio: num_auxio(),
            num_nonio: num_nonio(),
        }
    }
}

// trait definitions
pub trait ExecutorConfig {
    fn executor(&self) -> &Executor;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_counts_win() {
        let e: Executor = toml::from_str("num_readers = 2").unwrap();
        assert_eq!(e.num_readers(), 2);
    }

    #[test]
    fn derived_counts_are_bounded() {
        let e = Executor::default();
        assert!(e.num_readers() >= READER_BOUNDS.0);
        assert!(e.num_readers() <= READER_BOUNDS.1);
        assert!(e.num_nonio() >= NONIO_BOUNDS.0);
        assert!(e.num_nonio() <= NONIO_BOUNDS.1);
    }
}

// Copyright 2026 Tern, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Configuration for the tern engine. Each section is a serde struct with
//! per-field defaults so that a partial config file (or none at all) yields
//! a fully usable configuration.

mod engine;
mod ephemeral;
mod executor;

pub use engine::{Engine, EngineConfig};
pub use ephemeral::{BackfillType, Ephemeral, EphemeralConfig, FullPolicy};
pub use executor::{Executor, ExecutorConfig};

use serde::{Deserialize, Serialize};
use std::io::Read;

/// Top-level configuration for a tern process. Sections may be omitted from
/// the config file and will take their defaults.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct TernConfig {
    #[serde(default)]
    engine: Engine,
    #[serde(default)]
    ephemeral: Ephemeral,
    #[serde(default)]
    executor: Executor,
}

impl TernConfig {
    /// Load the configuration from a TOML file at the given path.
    pub fn load(file: &str) -> Result<Self, std::io::Error> {
        let mut file = std::fs::File::open(file)?;
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        toml::from_str(&content).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })
    }
}

impl EngineConfig for TernConfig {
    fn engine(&self) -> &Engine {
        &self.engine
    }
}

impl EphemeralConfig for TernConfig {
    fn ephemeral(&self) -> &Ephemeral {
        &self.ephemeral
    }
}

impl ExecutorConfig for TernConfig {
    fn executor(&self) -> &Executor {
        &self.executor
    }
}

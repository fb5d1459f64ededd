// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod loader;
mod schema;
mod shared;

pub use loader::load;
pub use schema::{
    Config, EngineConfig, PersistenceConfig, Provider, SamplingParams, SandboxConfig,
    ServerConfig, SlotConfig, CHIEF_SLOT, SESSION_SLOT,
};
pub use shared::SharedConfig;

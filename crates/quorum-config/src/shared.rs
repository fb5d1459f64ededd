// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, RwLock};

use crate::Config;

/// Process-wide configuration handle with atomic hot reload.
///
/// Readers take a cheap snapshot (`Arc` clone); a reload swaps the whole
/// record in one write.  In-flight sessions keep the snapshot they started
/// with — a reload never mutates a `Config` that is already shared out.
#[derive(Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Current configuration snapshot.
    pub fn snapshot(&self) -> Arc<Config> {
        self.inner.read().expect("config lock poisoned").clone()
    }

    /// Validate and atomically install a replacement configuration.
    /// Returns validation warnings on success; the old snapshot stays in
    /// place on error.
    pub fn replace(&self, config: Config) -> anyhow::Result<Vec<String>> {
        let warnings = config.validate()?;
        *self.inner.write().expect("config lock poisoned") = Arc::new(config);
        Ok(warnings)
    }
}

impl std::fmt::Debug for SharedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConfig").finish_non_exhaustive()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

//! Jacket configuration loading.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::Limits;

/// Tuning knobs for an open jacket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JacketConfig {
    pub limits: Limits,
    /// Tag deltas are flushed to the state index after this many entries
    /// during a rebuild.
    pub rebuild_flush_entries: usize,
    /// Window size for tag queries whose caller passes `max == 0`.
    pub default_tag_page: usize,
}

impl Default for JacketConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            rebuild_flush_entries: 250,
            default_tag_page: 25,
        }
    }
}

impl JacketConfig {
    /// Load from a JSON file, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!("config parse failed, using defaults: {err}");
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("config load failed, using defaults: {err}");
                Self::default()
            }
        }
    }
}

//! Configuration for sinkscan.
//!
//! Stores settings in ~/.config/sinkscan/config.json. Environment variables
//! take precedence over the file so CI and one-off runs never need to touch
//! the config on disk.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::util;

/// Default chat-completions endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.fireworks.ai/inference/v1/chat/completions";

/// Default model identifier sent with every completion request.
pub const DEFAULT_MODEL: &str = "accounts/fireworks/models/deepseek-r1";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Bearer token for the completion endpoint.
    pub api_key: Option<String>,
    /// Chat-completions endpoint URL override.
    pub api_base: Option<String>,
    /// Model identifier override.
    pub model: Option<String>,
}

impl Config {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("sinkscan"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default.
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        eprintln!(
                            "  Warning: Config file was corrupted ({}). A backup was saved and defaults were loaded.",
                            err
                        );
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(self)?;
        util::write_atomic(&dir.join("config.json"), &content)
    }

    /// Get the API key. The SINKSCAN_API_KEY environment variable takes
    /// precedence over the config file.
    pub fn api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var("SINKSCAN_API_KEY") {
            if !key.is_empty() {
                return Some(key);
            }
        }
        self.api_key.clone()
    }

    /// Resolved completion endpoint URL.
    pub fn api_base(&self) -> String {
        if let Ok(base) = std::env::var("SINKSCAN_API_BASE") {
            if !base.is_empty() {
                return base;
            }
        }
        self.api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
    }

    /// Resolved model identifier.
    pub fn model(&self) -> String {
        if let Ok(model) = std::env::var("SINKSCAN_MODEL") {
            if !model.is_empty() {
                return model;
            }
        }
        self.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }
}

fn preserve_corrupt_config(path: &std::path::Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#![forbid(unsafe_code)]

//! Engine configuration.
//!
//! Defaults match the documented dispatch contract: frames are recorded once
//! recursion passes 150 nested dispatches, and a loop is declared when a frame
//! repeats or more than 100 frames accumulate.
//!
//! # Sources
//!
//! 1. [`EngineConfig::default()`]
//! 2. Builder methods (`with_*`)
//! 3. [`EngineConfig::from_env()`]: `FLUXBIND_TRACE`,
//!    `FLUXBIND_RECURSION_THRESHOLD`, `FLUXBIND_MAX_FRAMES`
//! 4. With the `config` feature: [`EngineConfig::from_toml_str`] and
//!    [`EngineConfig::from_json_str`]

use std::env;

/// Default nested-dispatch depth after which frames are recorded.
pub const DEFAULT_RECURSION_THRESHOLD: usize = 150;

/// Default number of recorded frames that triggers a loop report.
pub const DEFAULT_MAX_RECORDED_FRAMES: usize = 100;

/// Default bound on the diagnostics log.
pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 256;

/// Tunables for a binding engine.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct EngineConfig {
    /// Depth after which dispatch frames are recorded.
    pub recursion_threshold: usize,
    /// Recorded frames allowed before a loop is declared.
    pub max_recorded_frames: usize,
    /// Emit a `trace!` event before each dispatch phase.
    pub trace_events: bool,
    /// Diagnostics kept before the oldest is dropped.
    pub diagnostics_capacity: usize,
    /// Priority for bindings that do not specify one.
    pub default_priority: i32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recursion_threshold: DEFAULT_RECURSION_THRESHOLD,
            max_recorded_frames: DEFAULT_MAX_RECORDED_FRAMES,
            trace_events: false,
            diagnostics_capacity: DEFAULT_DIAGNOSTICS_CAPACITY,
            default_priority: 0,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_recursion_threshold(mut self, depth: usize) -> Self {
        self.recursion_threshold = depth.max(1);
        self
    }

    #[must_use]
    pub fn with_max_recorded_frames(mut self, frames: usize) -> Self {
        self.max_recorded_frames = frames.max(1);
        self
    }

    #[must_use]
    pub fn with_trace_events(mut self, enabled: bool) -> Self {
        self.trace_events = enabled;
        self
    }

    #[must_use]
    pub fn with_diagnostics_capacity(mut self, capacity: usize) -> Self {
        self.diagnostics_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_default_priority(mut self, priority: i32) -> Self {
        self.default_priority = priority;
        self
    }

    /// Defaults overlaid with environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let trace = env::var("FLUXBIND_TRACE").ok();
        let threshold = env::var("FLUXBIND_RECURSION_THRESHOLD").ok();
        let frames = env::var("FLUXBIND_MAX_FRAMES").ok();
        Self::default().overlay(trace.as_deref(), threshold.as_deref(), frames.as_deref())
    }

    fn overlay(mut self, trace: Option<&str>, threshold: Option<&str>, frames: Option<&str>) -> Self {
        if let Some(raw) = trace {
            self.trace_events = parse_bool(raw).unwrap_or(self.trace_events);
        }
        if let Some(depth) = threshold.and_then(|raw| raw.trim().parse::<usize>().ok()) {
            self = self.with_recursion_threshold(depth);
        }
        if let Some(n) = frames.and_then(|raw| raw.trim().parse::<usize>().ok()) {
            self = self.with_max_recorded_frames(n);
        }
        self
    }

    /// Parse a TOML document; missing keys keep their defaults.
    #[cfg(feature = "config")]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse a JSON document; missing keys keep their defaults.
    #[cfg(feature = "config")]
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Error loading an [`EngineConfig`].
#[cfg(feature = "config")]
#[derive(Debug, Clone)]
pub enum ConfigError {
    Parse(String),
}

#[cfg(feature = "config")]
impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "config parse error: {msg}"),
        }
    }
}

#[cfg(feature = "config")]
impl std::error::Error for ConfigError {}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_dispatch_contract() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.recursion_threshold, 150);
        assert_eq!(cfg.max_recorded_frames, 100);
        assert!(!cfg.trace_events);
    }

    #[test]
    fn builder_clamps_to_one() {
        let cfg = EngineConfig::new()
            .with_recursion_threshold(0)
            .with_max_recorded_frames(0);
        assert_eq!(cfg.recursion_threshold, 1);
        assert_eq!(cfg.max_recorded_frames, 1);
    }

    #[test]
    fn overlay_reads_values() {
        let cfg = EngineConfig::default().overlay(Some("yes"), Some(" 40 "), Some("abc"));
        assert!(cfg.trace_events);
        assert_eq!(cfg.recursion_threshold, 40);
        assert_eq!(cfg.max_recorded_frames, 100);
    }

    #[test]
    fn overlay_ignores_garbage_bool() {
        let cfg = EngineConfig::default().overlay(Some("maybe"), None, None);
        assert!(!cfg.trace_events);
    }

    #[cfg(feature = "config")]
    #[test]
    fn toml_partial_document() {
        let cfg = EngineConfig::from_toml_str("recursion_threshold = 20\ntrace_events = true\n")
            .unwrap();
        assert_eq!(cfg.recursion_threshold, 20);
        assert!(cfg.trace_events);
        assert_eq!(cfg.max_recorded_frames, 100);
    }

    #[cfg(feature = "config")]
    #[test]
    fn json_rejects_wrong_types() {
        assert!(EngineConfig::from_json_str(r#"{"recursion_threshold": "deep"}"#).is_err());
    }
}

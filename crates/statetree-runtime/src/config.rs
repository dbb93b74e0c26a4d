#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! Supports environment variable overrides via the `STATETREE_*` prefix:
//!
//! ```text
//! STATETREE_MERGE_POLICY   shallow-assign | deep-merge-with-delete (aliases: shallow, deep)
//! STATETREE_TRACE          1/true/log to route debug taps through tracing
//! ```
//!
//! Unparseable values are ignored with a warning; the field keeps its
//! default.

use std::env;
use std::fmt;
use std::str::FromStr;

use statetree_core::MergePolicyKind;

use crate::debug::DebugSink;

pub const ENV_MERGE_POLICY: &str = "STATETREE_MERGE_POLICY";
pub const ENV_TRACE: &str = "STATETREE_TRACE";

/// Where debug taps send their events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceMode {
    /// Drop every event.
    #[default]
    Off,
    /// Emit `debug.state_change` through `tracing`.
    Log,
}

impl TraceMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Log => "log",
        }
    }
}

impl fmt::Display for TraceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "1" || s.eq_ignore_ascii_case("true") || s.eq_ignore_ascii_case("log") {
            Ok(Self::Log)
        } else if s.is_empty()
            || s == "0"
            || s.eq_ignore_ascii_case("false")
            || s.eq_ignore_ascii_case("off")
        {
            Ok(Self::Off)
        } else {
            Err(format!("unknown trace mode \"{s}\""))
        }
    }
}

/// Settings applied to composites and debug taps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeConfig {
    pub merge_policy: MergePolicyKind,
    pub trace: TraceMode,
}

impl RuntimeConfig {
    /// Defaults overridden by `STATETREE_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) against an arbitrary lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(val) = lookup(ENV_MERGE_POLICY) {
            match val.parse::<MergePolicyKind>() {
                Ok(kind) => config.merge_policy = kind,
                Err(err) => tracing::warn!(
                    message = "config.invalid",
                    var = ENV_MERGE_POLICY,
                    error = %err
                ),
            }
        }
        if let Some(val) = lookup(ENV_TRACE) {
            match val.parse::<TraceMode>() {
                Ok(mode) => config.trace = mode,
                Err(err) => tracing::warn!(message = "config.invalid", var = ENV_TRACE, error = %err),
            }
        }
        config
    }

    #[must_use]
    pub fn with_merge_policy(mut self, kind: MergePolicyKind) -> Self {
        self.merge_policy = kind;
        self
    }

    #[must_use]
    pub fn with_trace(mut self, trace: TraceMode) -> Self {
        self.trace = trace;
        self
    }

    /// The debug sink matching [`trace`](Self::trace).
    #[must_use]
    pub fn debug_sink(&self) -> DebugSink {
        match self.trace {
            TraceMode::Off => DebugSink::silent(),
            TraceMode::Log => DebugSink::verbose(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = RuntimeConfig::from_lookup(|_| None);
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.merge_policy, MergePolicyKind::ShallowAssign);
        assert_eq!(config.trace, TraceMode::Off);
    }

    #[test]
    fn reads_both_variables() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            (ENV_MERGE_POLICY, "deep"),
            (ENV_TRACE, "TRUE"),
        ]));
        assert_eq!(config.merge_policy, MergePolicyKind::DeepMergeWithDelete);
        assert_eq!(config.trace, TraceMode::Log);
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            (ENV_MERGE_POLICY, "sideways"),
            (ENV_TRACE, "maybe"),
        ]));
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn trace_mode_parse() {
        assert_eq!("1".parse::<TraceMode>(), Ok(TraceMode::Log));
        assert_eq!("off".parse::<TraceMode>(), Ok(TraceMode::Off));
        assert!("verbose!".parse::<TraceMode>().is_err());
    }

    #[test]
    fn builders_override() {
        let config = RuntimeConfig::default()
            .with_merge_policy(MergePolicyKind::DeepMergeWithDelete)
            .with_trace(TraceMode::Log);
        assert_eq!(config.merge_policy.as_str(), "deep-merge-with-delete");
        assert_eq!(config.trace.to_string(), "log");
    }
}

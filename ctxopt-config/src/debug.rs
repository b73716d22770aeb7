use serde::{Deserialize, Serialize};

/// Verbosity used when `RUST_LOG` is not set.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl TraceLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DebugConfig {
    #[serde(default)]
    pub trace_level: TraceLevel,

    /// Tracing targets the level applies to. Empty means the ctxopt crates.
    #[serde(default)]
    pub trace_targets: Vec<String>,
}

impl DebugConfig {
    /// `EnvFilter` directive string for this config.
    pub fn filter_directive(&self) -> String {
        let targets = if self.trace_targets.is_empty() {
            vec![
                "ctxopt".to_string(),
                "ctxopt_core".to_string(),
                "ctxopt_commons".to_string(),
            ]
        } else {
            self.trace_targets.clone()
        };

        targets
            .iter()
            .map(|target| format!("{}={}", target, self.trace_level.as_str()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_filter_for_default_targets() {
        let config = DebugConfig {
            trace_level: TraceLevel::Debug,
            trace_targets: Vec::new(),
        };
        assert_eq!(
            config.filter_directive(),
            "ctxopt=debug,ctxopt_core=debug,ctxopt_commons=debug"
        );
    }
}

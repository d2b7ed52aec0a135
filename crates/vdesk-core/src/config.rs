//! Configuration types for the desktop provider, the model bridge, and the
//! service-level policies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Parameters for provisioning one virtual desktop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesktopConfig {
    /// Operating system type requested from the provider.
    #[serde(default = "default_os_type")]
    pub os_type: String,

    /// Display width in pixels.
    #[serde(default = "default_display_width")]
    pub display_width: u32,

    /// Display height in pixels.
    #[serde(default = "default_display_height")]
    pub display_height: u32,
}

fn default_os_type() -> String {
    "ubuntu".to_string()
}

fn default_display_width() -> u32 {
    1024
}

fn default_display_height() -> u32 {
    768
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            os_type: default_os_type(),
            display_width: default_display_width(),
            display_height: default_display_height(),
        }
    }
}

/// Configuration for the Anthropic model bridge.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Model identifier sent with every request.
    pub model: String,

    /// API key. When `None`, `resolve_api_key` falls back to the
    /// `ANTHROPIC_API_KEY` environment variable.
    pub api_key: Option<String>,

    /// Base URL of the Messages API.
    pub base_url: String,

    /// Upper bound on tokens generated per turn.
    pub max_tokens: u32,

    /// Enable extended thinking on supported models.
    pub thinking_enabled: bool,

    /// Replay the model's own reasoning text when rebuilding the
    /// conversation for the next turn.
    pub replay_reasoning: bool,

    /// Deadline for one model round-trip.
    pub timeout: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-7-sonnet-20250219".to_string(),
            api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 4096,
            thinking_enabled: false,
            replay_reasoning: true,
            timeout: Duration::from_secs(120),
        }
    }
}

impl ModelConfig {
    /// The configured key, or the `ANTHROPIC_API_KEY` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
    }
}

/// What `prompt` does when the target session is already executing an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BusyPolicy {
    /// Queue behind the session gate, first come first served.
    Queue,
    /// Fail fast with `SessionUnavailable`.
    Reject,
}

/// Turn-count and wall-clock ceilings for one agent run.
#[derive(Debug, Clone, Copy)]
pub struct LoopBudget {
    pub max_turns: u32,
    pub max_duration: Duration,
}

impl Default for LoopBudget {
    fn default() -> Self {
        Self {
            max_turns: 25,
            max_duration: Duration::from_secs(300),
        }
    }
}

/// Service-level configuration shared by all sessions.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub busy_policy: BusyPolicy,
    pub budget: LoopBudget,

    /// Directory for per-session action logs. `None` disables file logging.
    pub log_dir: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            busy_policy: BusyPolicy::Queue,
            budget: LoopBudget::default(),
            log_dir: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod desktop_config {
        use super::*;

        #[test]
        fn defaults_match_provider_expectations() {
            let config = DesktopConfig::default();
            assert_eq!(config.os_type, "ubuntu");
            assert_eq!(config.display_width, 1024);
            assert_eq!(config.display_height, 768);
        }

        #[test]
        fn deserializes_from_empty_object() {
            let config: DesktopConfig = serde_json::from_str("{}").unwrap();
            assert_eq!(config.os_type, "ubuntu");
            assert_eq!(config.display_width, 1024);
        }

        #[test]
        fn deserializes_partial_override() {
            let config: DesktopConfig =
                serde_json::from_str(r#"{"displayWidth": 1920, "displayHeight": 1080}"#).unwrap();
            assert_eq!(config.display_width, 1920);
            assert_eq!(config.display_height, 1080);
            assert_eq!(config.os_type, "ubuntu");
        }
    }

    mod model_config {
        use super::*;

        #[test]
        fn default_points_at_anthropic() {
            let config = ModelConfig::default();
            assert!(config.base_url.contains("anthropic"));
            assert!(config.max_tokens > 0);
            assert!(!config.thinking_enabled);
        }

        #[test]
        fn explicit_key_wins_over_env() {
            let config = ModelConfig {
                api_key: Some("sk-test".to_string()),
                ..ModelConfig::default()
            };
            assert_eq!(config.resolve_api_key(), Some("sk-test".to_string()));
        }
    }

    mod service_config {
        use super::*;

        #[test]
        fn default_queues_behind_gate() {
            let config = ServiceConfig::default();
            assert_eq!(config.busy_policy, BusyPolicy::Queue);
            assert!(config.log_dir.is_none());
        }

        #[test]
        fn default_budget_is_bounded() {
            let budget = LoopBudget::default();
            assert!(budget.max_turns > 0);
            assert!(budget.max_duration > Duration::ZERO);
        }
    }
}

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token-budget-driven context compaction thresholds.
///
/// Construction order is built-in defaults → config file → `WUHU_COMPACTION_*`
/// env overrides (applied last); see [`CompactionConfig::apply_env_overrides`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Master switch. `WUHU_COMPACTION_ENABLED=0` disables.
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Tokens held back from the provider's context window as headroom.
    #[serde(default = "d_reserve")]
    pub reserve_tokens: u32,
    /// Minimum tokens of recent history kept verbatim after a compaction.
    #[serde(default = "d_keep_recent")]
    pub keep_recent_tokens: u32,
    /// Context window size, when not inferred from the active provider/model.
    #[serde(default)]
    pub context_window_tokens: Option<u32>,
    /// Consecutive compaction attempts allowed for a single prompt admission
    /// before giving up and admitting the prompt uncompacted.
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reserve_tokens: d_reserve(),
            keep_recent_tokens: d_keep_recent(),
            context_window_tokens: None,
            max_attempts: d_max_attempts(),
        }
    }
}

impl CompactionConfig {
    /// Apply `WUHU_COMPACTION_*` environment overrides on top of a loaded config.
    /// Matches §6: env vars are the last layer, applied after the config file.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("WUHU_COMPACTION_ENABLED") {
            self.enabled = v != "0";
        }
        if let Ok(v) = std::env::var("WUHU_COMPACTION_RESERVE_TOKENS") {
            if let Ok(n) = v.parse() {
                self.reserve_tokens = n;
            }
        }
        if let Ok(v) = std::env::var("WUHU_COMPACTION_KEEP_RECENT_TOKENS") {
            if let Ok(n) = v.parse() {
                self.keep_recent_tokens = n;
            }
        }
        if let Ok(v) = std::env::var("WUHU_COMPACTION_CONTEXT_WINDOW_TOKENS") {
            if let Ok(n) = v.parse() {
                self.context_window_tokens = Some(n);
            }
        }
        self
    }

    /// Resolve the effective context window: explicit config, else a
    /// provider-id-keyed default (OpenAI/Codex 128k, Anthropic 200k).
    pub fn context_window_for(&self, provider_id: &str) -> u32 {
        self.context_window_tokens.unwrap_or_else(|| {
            if provider_id.contains("anthropic") {
                200_000
            } else {
                128_000
            }
        })
    }
}

fn d_true() -> bool {
    true
}
fn d_reserve() -> u32 {
    16_384
}
fn d_keep_recent() -> u32 {
    20_000
}
fn d_max_attempts() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec() {
        let cfg = CompactionConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.reserve_tokens, 16_384);
        assert_eq!(cfg.keep_recent_tokens, 20_000);
        assert_eq!(cfg.max_attempts, 3);
    }

    #[test]
    fn context_window_defaults_by_provider() {
        let cfg = CompactionConfig::default();
        assert_eq!(cfg.context_window_for("anthropic"), 200_000);
        assert_eq!(cfg.context_window_for("openai-codex"), 128_000);
    }

    #[test]
    fn explicit_context_window_overrides_provider_default() {
        let mut cfg = CompactionConfig::default();
        cfg.context_window_tokens = Some(64_000);
        assert_eq!(cfg.context_window_for("anthropic"), 64_000);
    }

    #[test]
    fn env_override_disables_and_tunes() {
        std::env::set_var("WUHU_COMPACTION_ENABLED", "0");
        std::env::set_var("WUHU_COMPACTION_RESERVE_TOKENS", "999");
        let cfg = CompactionConfig::default().apply_env_overrides();
        assert!(!cfg.enabled);
        assert_eq!(cfg.reserve_tokens, 999);
        std::env::remove_var("WUHU_COMPACTION_ENABLED");
        std::env::remove_var("WUHU_COMPACTION_RESERVE_TOKENS");
    }
}

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persisted state layout
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the Entry Store keeps its SQLite database and how long a writer
/// waits on a busy lock before giving up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Root directory for the SQLite database and ancillary state.
    #[serde(default = "d_state_dir")]
    pub state_dir: String,
    /// SQLite `busy_timeout` in milliseconds.
    #[serde(default = "d_busy_timeout_ms")]
    pub busy_timeout_ms: u32,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            state_dir: d_state_dir(),
            busy_timeout_ms: d_busy_timeout_ms(),
        }
    }
}

impl StateConfig {
    /// Apply `WUHU_STATE_DIR` / `WUHU_DB_BUSY_TIMEOUT_MS` overrides.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("WUHU_STATE_DIR") {
            self.state_dir = v;
        }
        if let Ok(v) = std::env::var("WUHU_DB_BUSY_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.busy_timeout_ms = n;
            }
        }
        self
    }

    pub fn db_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.state_dir).join("wuhu.sqlite3")
    }
}

fn d_state_dir() -> String {
    "./data".into()
}
fn d_busy_timeout_ms() -> u32 {
    5000
}

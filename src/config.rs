//! Persistent application configuration model and defaults.

use std::path::PathBuf;
use std::time::Duration;

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Coordinator liveness and persistence policy.
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    /// Client adapter pacing and resource bounding.
    pub client: ClientConfig,
    #[serde(default)]
    /// State store location and timeouts.
    pub persistence: PersistenceConfig,
}

/// Coordinator process tuning.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CoordinatorConfig {
    /// A registration idle for longer than this is dropped.
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,
    /// How often idle registrations are swept.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// Save playlist/volume/repeat changes without an explicit `SAVE_STATE`.
    #[serde(default = "default_true")]
    pub autosave: bool,
    /// Minimum spacing between position saves while playing.
    #[serde(default = "default_position_save_interval_ms")]
    pub position_save_interval_ms: u64,
    /// Restore the persisted playlist when the coordinator starts.
    #[serde(default = "default_true")]
    pub restore_on_start: bool,
}

/// Client adapter tuning.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ClientConfig {
    /// `REPORT_TIME` coalescing window; only the latest sample is sent.
    #[serde(default = "default_report_time_coalesce_ms")]
    pub report_time_coalesce_ms: u64,
    /// Debounce window for `REQUEST_SPECIFIC_ENTRIES`.
    #[serde(default = "default_entry_request_debounce_ms")]
    pub entry_request_debounce_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Handles further than this many playlist rows from the current entry are released.
    #[serde(default = "default_handle_keep_radius")]
    pub handle_keep_radius: usize,
    /// Send `REQUEST_OWNERSHIP` when a user gesture unlocks audio.
    #[serde(default = "default_true")]
    pub claim_ownership_on_gesture: bool,
    #[serde(default = "default_idle_loop_sleep_ms")]
    pub idle_loop_sleep_ms: u64,
}

/// State store configuration.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PersistenceConfig {
    /// Overrides the default database path under the user data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            liveness_timeout_ms: default_liveness_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            autosave: true,
            position_save_interval_ms: default_position_save_interval_ms(),
            restore_on_start: true,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            report_time_coalesce_ms: default_report_time_coalesce_ms(),
            entry_request_debounce_ms: default_entry_request_debounce_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            handle_keep_radius: default_handle_keep_radius(),
            claim_ownership_on_gesture: true,
            idle_loop_sleep_ms: default_idle_loop_sleep_ms(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            load_timeout_ms: default_load_timeout_ms(),
        }
    }
}

impl CoordinatorConfig {
    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn position_save_interval(&self) -> Duration {
        Duration::from_millis(self.position_save_interval_ms)
    }
}

impl ClientConfig {
    pub fn report_time_coalesce(&self) -> Duration {
        Duration::from_millis(self.report_time_coalesce_ms)
    }

    pub fn entry_request_debounce(&self) -> Duration {
        Duration::from_millis(self.entry_request_debounce_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn idle_loop_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_loop_sleep_ms)
    }
}

impl PersistenceConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

/// Clamps user-provided values into ranges the runtime can honor.
pub fn sanitize_config(config: Config) -> Config {
    let liveness_timeout_ms = config.coordinator.liveness_timeout_ms.clamp(500, 600_000);
    let sweep_interval_ms = config
        .coordinator
        .sweep_interval_ms
        .clamp(50, liveness_timeout_ms);
    // Heartbeats must arrive well inside the liveness window.
    let heartbeat_interval_ms = config
        .client
        .heartbeat_interval_ms
        .clamp(50, (liveness_timeout_ms / 2).max(50));

    Config {
        coordinator: CoordinatorConfig {
            liveness_timeout_ms,
            sweep_interval_ms,
            autosave: config.coordinator.autosave,
            position_save_interval_ms: config.coordinator.position_save_interval_ms.max(250),
            restore_on_start: config.coordinator.restore_on_start,
        },
        client: ClientConfig {
            report_time_coalesce_ms: config.client.report_time_coalesce_ms.clamp(1, 1_000),
            entry_request_debounce_ms: config.client.entry_request_debounce_ms.min(2_000),
            heartbeat_interval_ms,
            handle_keep_radius: config.client.handle_keep_radius.max(1),
            claim_ownership_on_gesture: config.client.claim_ownership_on_gesture,
            idle_loop_sleep_ms: config.client.idle_loop_sleep_ms.clamp(1, 250),
        },
        persistence: PersistenceConfig {
            database_path: config.persistence.database_path,
            load_timeout_ms: config.persistence.load_timeout_ms.clamp(50, 30_000),
        },
    }
}

fn default_true() -> bool {
    true
}

fn default_liveness_timeout_ms() -> u64 {
    5_000
}

fn default_sweep_interval_ms() -> u64 {
    500
}

fn default_position_save_interval_ms() -> u64 {
    5_000
}

fn default_report_time_coalesce_ms() -> u64 {
    10
}

fn default_entry_request_debounce_ms() -> u64 {
    100
}

fn default_heartbeat_interval_ms() -> u64 {
    1_000
}

fn default_handle_keep_radius() -> usize {
    2
}

fn default_idle_loop_sleep_ms() -> u64 {
    5
}

fn default_load_timeout_ms() -> u64 {
    2_000
}

#[cfg(test)]
mod tests {
    use super::{sanitize_config, ClientConfig, Config, CoordinatorConfig, PersistenceConfig};

    #[test]
    fn test_default_config_has_expected_values() {
        let config = Config::default();

        assert_eq!(config.coordinator.liveness_timeout_ms, 5_000);
        assert_eq!(config.coordinator.sweep_interval_ms, 500);
        assert!(config.coordinator.autosave);
        assert_eq!(config.coordinator.position_save_interval_ms, 5_000);
        assert!(config.coordinator.restore_on_start);
        assert_eq!(config.client.report_time_coalesce_ms, 10);
        assert_eq!(config.client.entry_request_debounce_ms, 100);
        assert_eq!(config.client.heartbeat_interval_ms, 1_000);
        assert_eq!(config.client.handle_keep_radius, 2);
        assert!(config.client.claim_ownership_on_gesture);
        assert!(config.persistence.database_path.is_none());
        assert_eq!(config.persistence.load_timeout_ms, 2_000);
    }

    #[test]
    fn test_partial_config_fills_missing_sections_with_defaults() {
        let partial_toml = r#"
[client]
report_time_coalesce_ms = 25
"#;

        let parsed: Config = toml::from_str(partial_toml).expect("config should parse");
        assert_eq!(parsed.client.report_time_coalesce_ms, 25);
        assert_eq!(parsed.client.entry_request_debounce_ms, 100);
        assert_eq!(parsed.coordinator, CoordinatorConfig::default());
        assert_eq!(parsed.persistence, PersistenceConfig::default());
    }

    #[test]
    fn test_default_config_serializes_and_parses_back() {
        let serialized = toml::to_string(&Config::default()).expect("default config should serialize");
        let parsed: Config = toml::from_str(&serialized).expect("serialized config should parse");
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_sanitize_config_keeps_heartbeat_inside_liveness_window() {
        let config = Config {
            coordinator: CoordinatorConfig {
                liveness_timeout_ms: 1_000,
                sweep_interval_ms: 5_000,
                ..CoordinatorConfig::default()
            },
            client: ClientConfig {
                heartbeat_interval_ms: 10_000,
                report_time_coalesce_ms: 0,
                handle_keep_radius: 0,
                ..ClientConfig::default()
            },
            persistence: PersistenceConfig::default(),
        };

        let sanitized = sanitize_config(config);
        assert_eq!(sanitized.coordinator.sweep_interval_ms, 1_000);
        assert_eq!(sanitized.client.heartbeat_interval_ms, 500);
        assert_eq!(sanitized.client.report_time_coalesce_ms, 1);
        assert_eq!(sanitized.client.handle_keep_radius, 1);
    }
}

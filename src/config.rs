//! Server configuration module
//!
//! Parses the timer service settings and the statement-timeout server
//! settings from YAML files.
//!
//! Uses serde_yaml for automatic parsing - just define the struct and serde handles
//! all the parsing, validation, and type conversion!

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Upper bound on the initial heap allocation (timers, sentinel excluded)
pub const TIMER_CAPACITY_MAX: usize = 1 << 20;

/// Smallest stack the timer thread may be started with
pub const TIMER_STACK_MIN: usize = 16 * 1024;

/// Timer service settings
///
/// The heap is allocated once at init. Growth happens under the service
/// lock, so size `capacity` generously instead of relying on `growth_step`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Number of timers the heap holds without growing
    #[serde(default = "default_timer_capacity")]
    pub capacity: usize,

    /// Slots added when the heap is full (0 = refuse the arm instead)
    #[serde(default)]
    pub growth_step: usize,

    /// Name of the timer thread
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// Stack size of the timer thread in bytes (platform default if unset)
    #[serde(default)]
    pub stack_size: Option<usize>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            capacity: default_timer_capacity(),
            growth_step: 0,
            thread_name: default_thread_name(),
            stack_size: None,
        }
    }
}

impl TimerConfig {
    fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.capacity <= TIMER_CAPACITY_MAX,
            "timer capacity too large: {} (max {})",
            self.capacity,
            TIMER_CAPACITY_MAX
        );
        anyhow::ensure!(!self.thread_name.is_empty(), "thread_name cannot be empty");
        anyhow::ensure!(
            !self.thread_name.contains('\0'),
            "thread_name cannot contain NUL bytes"
        );
        if let Some(stack_size) = self.stack_size {
            anyhow::ensure!(
                stack_size >= TIMER_STACK_MIN,
                "stack_size too small: {} (min {})",
                stack_size,
                TIMER_STACK_MIN
            );
        }
        Ok(())
    }
}

/// Statement-timeout server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    // ============================================
    // Listener
    // ============================================
    /// Address the server binds to
    pub bind_ip: String,

    #[serde(default = "default_port")]
    pub port: u16,

    // ============================================
    // Timeouts
    // ============================================
    /// Default per-statement time limit in milliseconds (0 = unlimited)
    #[serde(default)]
    pub max_statement_time_ms: u64,

    /// Interval of the housekeeping status log in seconds (0 = disabled)
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,

    // ============================================
    // Timer service
    // ============================================
    #[serde(default)]
    pub timer: TimerConfig,
}

// ============================================
// Default value functions
// These are called by serde when a field is missing
// ============================================

fn default_timer_capacity() -> usize {
    1024
}

fn default_thread_name() -> String {
    "thr_timer".to_string()
}

fn default_port() -> u16 {
    4406
}

fn default_status_interval_secs() -> u64 {
    60
}

impl ServerConfig {
    /// Load configuration from a YAML file
    ///
    /// # Example
    /// ```no_run
    /// use thrtimer::config::ServerConfig;
    ///
    /// let config = ServerConfig::from_file("conf/query_server.yaml")
    ///     .expect("Failed to load config");
    /// println!("max_statement_time: {}ms", config.max_statement_time_ms);
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ServerConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML in {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a YAML string
    ///
    /// Useful for testing
    pub fn from_str(contents: &str) -> Result<Self> {
        let config: ServerConfig = serde_yaml::from_str(contents)
            .context("Failed to parse YAML")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.bind_ip.is_empty(), "bind_ip cannot be empty");

        // statement limits are armed in microseconds
        anyhow::ensure!(
            self.max_statement_time_ms <= u64::MAX / 1000,
            "max_statement_time_ms out of range: {}",
            self.max_statement_time_ms
        );

        self.timer.validate().context("Invalid timer settings")?;

        Ok(())
    }

    /// Save configuration to a YAML file
    ///
    /// Useful for generating config templates
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(&self)
            .context("Failed to serialize config to YAML")?;

        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write config to {}", path.as_ref().display()))?;

        Ok(())
    }

    /// `host:port` string for the listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_ip, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> &'static str {
        r#"
bind_ip: "127.0.0.1"
"#
    }

    #[test]
    fn test_minimal_config() {
        let config = ServerConfig::from_str(minimal_config()).unwrap();
        assert_eq!(config.bind_ip, "127.0.0.1");
        assert_eq!(config.bind_addr(), "127.0.0.1:4406");
    }

    #[test]
    fn test_default_values() {
        let config = ServerConfig::from_str(minimal_config()).unwrap();

        assert_eq!(config.port, 4406);
        assert_eq!(config.max_statement_time_ms, 0);
        assert_eq!(config.status_interval_secs, 60);
        assert_eq!(config.timer, TimerConfig::default());
        assert_eq!(config.timer.capacity, 1024);
        assert_eq!(config.timer.growth_step, 0);
        assert_eq!(config.timer.thread_name, "thr_timer");
        assert_eq!(config.timer.stack_size, None);
    }

    #[test]
    fn test_timer_section() {
        let config_str = r#"
bind_ip: "0.0.0.0"
port: 5000
max_statement_time_ms: 2500
status_interval_secs: 0
timer:
  capacity: 64
  growth_step: 16
  thread_name: "stmt_timer"
  stack_size: 131072
"#;

        let config = ServerConfig::from_str(config_str).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.max_statement_time_ms, 2500);
        assert_eq!(config.status_interval_secs, 0);
        assert_eq!(config.timer.capacity, 64);
        assert_eq!(config.timer.growth_step, 16);
        assert_eq!(config.timer.thread_name, "stmt_timer");
        assert_eq!(config.timer.stack_size, Some(131072));
    }

    #[test]
    fn test_partial_timer_section_keeps_defaults() {
        let config_str = r#"
bind_ip: "127.0.0.1"
timer:
  capacity: 8
"#;
        let config = ServerConfig::from_str(config_str).unwrap();
        assert_eq!(config.timer.capacity, 8);
        assert_eq!(config.timer.thread_name, "thr_timer");
    }

    #[test]
    fn test_missing_required_field() {
        let result = ServerConfig::from_str("port: 5000\n");
        assert!(result.is_err());

        let err_msg = format!("{:?}", result.unwrap_err());
        assert!(err_msg.contains("bind_ip") || err_msg.contains("missing field"));
    }

    #[test]
    fn test_invalid_yaml() {
        let result = ServerConfig::from_str("bind_ip: [this is not valid yaml\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_wrong_type() {
        let config_str = r#"
bind_ip: "127.0.0.1"
port: "not_a_number"
"#;
        assert!(ServerConfig::from_str(config_str).is_err());
    }

    #[test]
    fn test_validation_empty_bind_ip() {
        let result = ServerConfig::from_str("bind_ip: \"\"\n");
        let err_msg = format!("{}", result.unwrap_err());
        assert!(err_msg.contains("bind_ip"));
    }

    #[test]
    fn test_capacity_too_large() {
        let config_str = format!(
            "bind_ip: \"127.0.0.1\"\ntimer:\n  capacity: {}\n",
            TIMER_CAPACITY_MAX + 1
        );
        let err = ServerConfig::from_str(&config_str).unwrap_err();
        assert!(format!("{:#}", err).contains("timer capacity too large"));
    }

    #[test]
    fn test_stack_size_too_small() {
        let config_str = r#"
bind_ip: "127.0.0.1"
timer:
  stack_size: 1024
"#;
        let err = ServerConfig::from_str(config_str).unwrap_err();
        assert!(format!("{:#}", err).contains("stack_size too small"));
    }

    #[test]
    fn test_empty_thread_name() {
        let config_str = r#"
bind_ip: "127.0.0.1"
timer:
  thread_name: ""
"#;
        let err = ServerConfig::from_str(config_str).unwrap_err();
        assert!(format!("{:#}", err).contains("thread_name cannot be empty"));
    }

    #[test]
    fn test_save_and_load() {
        let config = ServerConfig::from_str(minimal_config()).unwrap();

        let temp_file = std::env::temp_dir().join("test_save_query_server.yaml");

        config.save(&temp_file).unwrap();
        let loaded = ServerConfig::from_file(&temp_file).unwrap();

        assert_eq!(config.bind_ip, loaded.bind_ip);
        assert_eq!(config.port, loaded.port);
        assert_eq!(config.timer, loaded.timer);

        std::fs::remove_file(temp_file).ok();
    }
}

//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use warden_core::BackoffSchedule;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory holding the persisted records
    pub store_path: PathBuf,

    /// Unix socket path for the host link / bench IPC
    pub ipc_socket_path: PathBuf,

    /// PIN retry backoff schedule
    #[serde(default)]
    pub backoff: BackoffSchedule,

    /// Orchestrator timeouts and poll budgets
    #[serde(default)]
    pub timings: Timings,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_path: Self::default_store_path(),
            ipc_socket_path: Self::default_ipc_path(),
            backoff: BackoffSchedule::default(),
            timings: Timings::default(),
        }
    }
}

/// A bounded poll: `attempts` checks separated by `delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub attempts: u32,
    #[serde(with = "duration_ms")]
    pub delay: Duration,
}

impl PollPolicy {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

/// Every wait the orchestrator performs.
///
/// Durations are serialized as milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Minimum wait of a single button press poll
    #[serde(with = "duration_ms")]
    pub press_poll: Duration,

    /// Wait for the keyfob task to hand over session data
    #[serde(with = "duration_ms")]
    pub session_handoff: Duration,

    /// Bound on keyfob waits started by a host command
    #[serde(with = "duration_ms")]
    pub host_keyfob_wait: Duration,

    /// Proximity handshake budget
    pub alive_check: PollPolicy,

    /// Penalty after a failed keyfob authentication
    #[serde(with = "duration_ms")]
    pub access_denial_penalty: Duration,

    /// Delay after a failed proximity handshake
    #[serde(with = "duration_ms")]
    pub proximity_error_delay: Duration,

    /// Longest an unlocked session may last
    #[serde(with = "duration_ms")]
    pub max_session: Duration,

    /// Broadcast seed advance period
    #[serde(with = "duration_ms")]
    pub seed_advance_period: Duration,

    /// Consecutive out-of-range samples that end an unlocked session
    pub out_of_range_threshold: u32,

    /// Wait for a host request on each supervisory iteration
    #[serde(with = "duration_ms")]
    pub host_poll: Duration,

    /// Wait for the host to acknowledge standby
    pub standby_ack: PollPolicy,

    /// Wait for the host to power itself off
    pub power_off_ack: PollPolicy,

    /// Wait for PIN digits
    #[serde(with = "duration_ms")]
    pub pin_entry: Duration,

    /// Time the motion warning stays on screen before reboot
    #[serde(with = "duration_ms")]
    pub motion_warning: Duration,

    /// Wait for the keyfob task to acknowledge a stop request
    #[serde(with = "duration_ms")]
    pub stop_ack: Duration,

    /// Retry delay after a failed clock read
    #[serde(with = "duration_ms")]
    pub clock_retry: Duration,

    /// Clock re-sample period while a lockout runs
    #[serde(with = "duration_ms")]
    pub lockout_resample: Duration,

    /// Slice used when interleaving motion checks with a keyfob wait
    #[serde(with = "duration_ms")]
    pub motion_slice: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            press_poll: Duration::from_millis(50),
            session_handoff: Duration::from_secs(2),
            host_keyfob_wait: Duration::from_secs(30),
            alive_check: PollPolicy::new(20, Duration::from_millis(500)),
            access_denial_penalty: Duration::from_secs(10),
            proximity_error_delay: Duration::from_secs(10),
            max_session: Duration::from_secs(24 * 60 * 60),
            seed_advance_period: Duration::from_secs(60),
            out_of_range_threshold: 3,
            host_poll: Duration::from_millis(200),
            standby_ack: PollPolicy::new(10, Duration::from_millis(500)),
            power_off_ack: PollPolicy::new(20, Duration::from_millis(500)),
            pin_entry: Duration::from_secs(60),
            motion_warning: Duration::from_secs(3),
            stop_ack: Duration::from_secs(2),
            clock_retry: Duration::from_secs(1),
            lockout_resample: Duration::from_secs(5),
            motion_slice: Duration::from_millis(100),
        }
    }
}

impl Timings {
    /// Longest a host command may take to answer: a keyfob wait, the
    /// session handoff, the proximity handshake, PIN entry and a host
    /// power-off poll
    pub fn host_reply_budget(&self) -> Duration {
        self.host_keyfob_wait
            + self.session_handoff
            + self.alive_check.delay * self.alive_check.attempts
            + self.pin_entry
            + self.power_off_ack.delay * self.power_off_ack.attempts
    }
}

impl DaemonConfig {
    fn default_ipc_path() -> PathBuf {
        // Use XDG_RUNTIME_DIR if available, fallback to /tmp
        std::env::var_os("XDG_RUNTIME_DIR")
            .map(|dir| PathBuf::from(dir).join("warden.sock"))
            .unwrap_or_else(|| PathBuf::from("/tmp/warden.sock"))
    }

    fn default_store_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("warden")
            .join("records")
    }

    /// Default location of the config file
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("warden")
            .join("daemon.json")
    }

    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create directories if they don't exist
    pub fn ensure_directories(&self) -> crate::Result<()> {
        std::fs::create_dir_all(&self.store_path)?;
        if let Some(parent) = self.ipc_socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Reject budgets that would make a bounded wait meaningless
    pub fn validate(&self) -> crate::Result<()> {
        let t = &self.timings;
        if t.alive_check.attempts == 0 || t.power_off_ack.attempts == 0 {
            return Err(crate::DaemonError::Config(
                "poll budgets need at least one attempt".to_string(),
            ));
        }
        if t.out_of_range_threshold == 0 {
            return Err(crate::DaemonError::Config(
                "out_of_range_threshold must be at least 1".to_string(),
            ));
        }
        if t.seed_advance_period.is_zero() || t.lockout_resample.is_zero() {
            return Err(crate::DaemonError::Config(
                "periods must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serde helper for durations as integer milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

//! Peripheral collaborators
//!
//! The orchestrator drives the board through these traits. Each returns a
//! `DaemonError` only for a genuine hardware or driver fault; ordinary
//! negatives (keyfob out of range, host still powered) are plain values.

use std::sync::Arc;

use async_trait::async_trait;

use warden_core::{BleRange, BleSeed};

use crate::error::Result;

/// Host power and I/O control
#[async_trait]
pub trait HostPower: Send + Sync {
    /// Apply host power
    async fn power_on(&self) -> Result<()>;

    /// Cut host power immediately
    async fn force_power_off(&self) -> Result<()>;

    /// Short pulse on the host power button line
    async fn pulse_power_button(&self) -> Result<()>;

    /// Long hold on the host power button line (forced shutdown)
    async fn signal_forced_shutdown(&self) -> Result<()>;

    /// Ask the host to enter standby
    async fn request_standby(&self) -> Result<()>;

    /// Deassert host power enable, asking the host to shut down
    async fn request_power_down(&self) -> Result<()>;

    /// Whether the host is drawing power
    async fn is_powered(&self) -> Result<bool>;

    /// Whether the host reports standby
    async fn is_standby(&self) -> Result<bool>;

    /// Enable or disable the host I/O surface (USB, host link data lines)
    async fn set_io_enabled(&self, enabled: bool) -> Result<()>;
}

/// BLE proximity sensing
#[async_trait]
pub trait Proximity: Send + Sync {
    /// Arm the proximity hardware for the given range class
    async fn arm(&self, range: BleRange) -> Result<()>;

    /// Start broadcasting a payload derived from `seed`
    async fn start_broadcast(&self, seed: &BleSeed) -> Result<()>;

    /// Replace the broadcast seed
    async fn update_seed(&self, seed: &BleSeed) -> Result<()>;

    /// Whether the keyfob has locked onto the current broadcast
    async fn is_locked(&self) -> Result<bool>;

    /// Sample whether the keyfob is within range
    async fn in_range(&self) -> Result<bool>;
}

/// Sensor fusion mode of the inertial sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorMode {
    Off,
    Fusion,
    MotionDetect,
}

/// Motion detection hardware
#[async_trait]
pub trait MotionSensor: Send + Sync {
    /// Leave the current mode and enable motion detection.
    /// Returns the mode that was active before.
    async fn enable_motion_detection(&self) -> Result<SensorMode>;

    /// Disable motion detection and restore `previous`
    async fn disable_motion_detection(&self, previous: SensorMode) -> Result<()>;
}

/// Real-time clock (seconds)
#[async_trait]
pub trait Rtc: Send + Sync {
    async fn now(&self) -> Result<u32>;

    async fn set(&self, seconds: u32) -> Result<()>;
}

/// Root of trust key material
#[async_trait]
pub trait RootOfTrust: Send + Sync {
    /// Secure-erase the current root of trust and generate a fresh one
    async fn regenerate(&self) -> Result<()>;
}

/// Screens the orchestrator can show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screen {
    Locked,
    PressButton,
    PresentKeyfob,
    CheckingProximity,
    AccessDenied,
    ProximityError,
    EnterPin,
    WrongPin,
    PleaseWait { seconds: u64 },
    Unlocked,
    ProximityLock,
    MotionDetected,
    Enrolling,
    Fatal,
}

/// On-device display
#[async_trait]
pub trait Display: Send + Sync {
    async fn show(&self, screen: Screen) -> Result<()>;
}

/// Every peripheral the orchestrator uses
#[derive(Clone)]
pub struct Peripherals {
    pub host: Arc<dyn HostPower>,
    pub proximity: Arc<dyn Proximity>,
    pub motion: Arc<dyn MotionSensor>,
    pub rtc: Arc<dyn Rtc>,
    pub root_of_trust: Arc<dyn RootOfTrust>,
    pub display: Arc<dyn Display>,
}

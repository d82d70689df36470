//! Bench simulator
//!
//! A complete device for bench runs and tests: a simulated board behind
//! every peripheral trait, scripted keyfob and PIN-entry tasks, and
//! [`assemble`], which wires them to an orchestrator.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use warden_core::{
    BleRange, BleSeed, DeviceRecord, KeyfobSerial, KeyfobSession, Privilege, SecurityState,
    SeedIncrement, PIN_LENGTH,
};

use crate::bundle::{ButtonHandle, KeyfobHandles, MotionHandles, PinHandles, PressKind, ResourceBundle};
use crate::config::DaemonConfig;
use crate::error::{DaemonError, Result};
use crate::host_link::HostLink;
use crate::orchestrator::Orchestrator;
use crate::pin::{hash_pin, parse_digits, PinResponse};
use crate::platform::{
    Display, HostPower, MotionSensor, Peripherals, Proximity, RootOfTrust, Rtc, Screen, SensorMode,
};
use crate::retry_store::RetryStore;
use crate::signal::{event, keyfob_request, pin_request};
use crate::storage::{Records, Storage};

/// How long the simulated keyfob task looks for a fob before giving up
pub const DETECT_WINDOW: Duration = Duration::from_secs(10);

/// Something the host power controller did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    PowerOn,
    ForcePowerOff,
    PowerButtonPulse,
    ForcedShutdown,
    StandbyRequested,
    PowerDownRequested,
    IoEnabled(bool),
}

#[derive(Debug)]
struct HostSim {
    powered: bool,
    standby: bool,
    io_enabled: bool,
    compliant: bool,
}

#[derive(Debug)]
struct ClockSim {
    anchor: Instant,
    anchor_seconds: u32,
}

/// Simulated board. The RTC runs on the tokio clock.
pub struct SimBoard {
    host: Mutex<HostSim>,
    host_events: Mutex<Vec<HostEvent>>,
    in_range: AtomicBool,
    range: Mutex<Option<BleRange>>,
    seeds: Mutex<Vec<[u8; 16]>>,
    sensor_mode: Mutex<SensorMode>,
    clock: Mutex<ClockSim>,
    clock_read_faults: AtomicU32,
    clock_write_fault: AtomicBool,
    screens: Mutex<Vec<Screen>>,
    display_fault: AtomicBool,
    rot_generation: AtomicU32,
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimBoard {
    pub fn new() -> Self {
        Self {
            host: Mutex::new(HostSim {
                powered: false,
                standby: false,
                io_enabled: false,
                compliant: true,
            }),
            host_events: Mutex::new(Vec::new()),
            in_range: AtomicBool::new(true),
            range: Mutex::new(None),
            seeds: Mutex::new(Vec::new()),
            sensor_mode: Mutex::new(SensorMode::Fusion),
            clock: Mutex::new(ClockSim {
                anchor: Instant::now(),
                anchor_seconds: 0,
            }),
            clock_read_faults: AtomicU32::new(0),
            clock_write_fault: AtomicBool::new(false),
            screens: Mutex::new(Vec::new()),
            display_fault: AtomicBool::new(false),
            rot_generation: AtomicU32::new(0),
        }
    }

    /// Whether the host honours standby and power-down requests
    pub fn set_host_compliant(&self, compliant: bool) {
        guard(&self.host).compliant = compliant;
    }

    pub fn set_in_range(&self, in_range: bool) {
        self.in_range.store(in_range, Ordering::SeqCst);
    }

    pub fn set_clock(&self, seconds: u32) {
        *guard(&self.clock) = ClockSim {
            anchor: Instant::now(),
            anchor_seconds: seconds,
        };
    }

    /// Fail the next `count` clock reads
    pub fn fail_clock_reads(&self, count: u32) {
        self.clock_read_faults.store(count, Ordering::SeqCst);
    }

    pub fn fail_clock_writes(&self, fail: bool) {
        self.clock_write_fault.store(fail, Ordering::SeqCst);
    }

    pub fn fail_display(&self, fail: bool) {
        self.display_fault.store(fail, Ordering::SeqCst);
    }

    pub fn host_powered(&self) -> bool {
        guard(&self.host).powered
    }

    pub fn host_standby(&self) -> bool {
        guard(&self.host).standby
    }

    pub fn host_io_enabled(&self) -> bool {
        guard(&self.host).io_enabled
    }

    pub fn host_events(&self) -> Vec<HostEvent> {
        guard(&self.host_events).clone()
    }

    pub fn screens(&self) -> Vec<Screen> {
        guard(&self.screens).clone()
    }

    pub fn last_screen(&self) -> Option<Screen> {
        guard(&self.screens).last().cloned()
    }

    /// Every seed broadcast so far, oldest first
    pub fn broadcast_seeds(&self) -> Vec<[u8; 16]> {
        guard(&self.seeds).clone()
    }

    pub fn armed_range(&self) -> Option<BleRange> {
        *guard(&self.range)
    }

    pub fn sensor_mode(&self) -> SensorMode {
        *guard(&self.sensor_mode)
    }

    pub fn rot_generation(&self) -> u32 {
        self.rot_generation.load(Ordering::SeqCst)
    }

    fn record(&self, event: HostEvent) {
        debug!("Host event: {:?}", event);
        guard(&self.host_events).push(event);
    }

    fn clock_seconds(&self) -> u32 {
        let clock = guard(&self.clock);
        let elapsed = u32::try_from(clock.anchor.elapsed().as_secs()).unwrap_or(u32::MAX);
        clock.anchor_seconds.saturating_add(elapsed)
    }
}

#[async_trait]
impl HostPower for SimBoard {
    async fn power_on(&self) -> Result<()> {
        {
            let mut host = guard(&self.host);
            host.powered = true;
            host.standby = false;
        }
        self.record(HostEvent::PowerOn);
        Ok(())
    }

    async fn force_power_off(&self) -> Result<()> {
        {
            let mut host = guard(&self.host);
            host.powered = false;
            host.standby = false;
        }
        self.record(HostEvent::ForcePowerOff);
        Ok(())
    }

    async fn pulse_power_button(&self) -> Result<()> {
        {
            let mut host = guard(&self.host);
            if host.standby {
                host.standby = false;
            }
        }
        self.record(HostEvent::PowerButtonPulse);
        Ok(())
    }

    async fn signal_forced_shutdown(&self) -> Result<()> {
        guard(&self.host).powered = false;
        self.record(HostEvent::ForcedShutdown);
        Ok(())
    }

    async fn request_standby(&self) -> Result<()> {
        {
            let mut host = guard(&self.host);
            if host.compliant && host.powered {
                host.standby = true;
            }
        }
        self.record(HostEvent::StandbyRequested);
        Ok(())
    }

    async fn request_power_down(&self) -> Result<()> {
        {
            let mut host = guard(&self.host);
            if host.compliant {
                host.powered = false;
            }
        }
        self.record(HostEvent::PowerDownRequested);
        Ok(())
    }

    async fn is_powered(&self) -> Result<bool> {
        Ok(guard(&self.host).powered)
    }

    async fn is_standby(&self) -> Result<bool> {
        Ok(guard(&self.host).standby)
    }

    async fn set_io_enabled(&self, enabled: bool) -> Result<()> {
        guard(&self.host).io_enabled = enabled;
        self.record(HostEvent::IoEnabled(enabled));
        Ok(())
    }
}

#[async_trait]
impl Proximity for SimBoard {
    async fn arm(&self, range: BleRange) -> Result<()> {
        *guard(&self.range) = Some(range);
        Ok(())
    }

    async fn start_broadcast(&self, seed: &BleSeed) -> Result<()> {
        guard(&self.seeds).push(*seed.as_bytes());
        Ok(())
    }

    async fn update_seed(&self, seed: &BleSeed) -> Result<()> {
        guard(&self.seeds).push(*seed.as_bytes());
        Ok(())
    }

    async fn is_locked(&self) -> Result<bool> {
        Ok(self.in_range.load(Ordering::SeqCst) && !guard(&self.seeds).is_empty())
    }

    async fn in_range(&self) -> Result<bool> {
        Ok(self.in_range.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl MotionSensor for SimBoard {
    async fn enable_motion_detection(&self) -> Result<SensorMode> {
        let mut mode = guard(&self.sensor_mode);
        let previous = *mode;
        *mode = SensorMode::MotionDetect;
        Ok(previous)
    }

    async fn disable_motion_detection(&self, previous: SensorMode) -> Result<()> {
        *guard(&self.sensor_mode) = previous;
        Ok(())
    }
}

#[async_trait]
impl Rtc for SimBoard {
    async fn now(&self) -> Result<u32> {
        let pending = self.clock_read_faults.load(Ordering::SeqCst);
        if pending > 0 {
            self.clock_read_faults.store(pending - 1, Ordering::SeqCst);
            return Err(DaemonError::Clock("simulated read fault".to_string()));
        }
        Ok(self.clock_seconds())
    }

    async fn set(&self, seconds: u32) -> Result<()> {
        if self.clock_write_fault.load(Ordering::SeqCst) {
            return Err(DaemonError::Clock("simulated write fault".to_string()));
        }
        self.set_clock(seconds);
        Ok(())
    }
}

#[async_trait]
impl RootOfTrust for SimBoard {
    async fn regenerate(&self) -> Result<()> {
        self.rot_generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Display for SimBoard {
    async fn show(&self, screen: Screen) -> Result<()> {
        if self.display_fault.load(Ordering::SeqCst) {
            return Err(DaemonError::Display(format!("cannot render {:?}", screen)));
        }
        guard(&self.screens).push(screen);
        Ok(())
    }
}

/// Build a keyfob session with fresh random seed material
pub fn fob_session(name: &str, privilege: Privilege) -> KeyfobSession {
    KeyfobSession {
        name: name.to_string(),
        seed: BleSeed::new(rand::random()),
        increment: SeedIncrement::new(rand::random()),
        privilege,
        serial: KeyfobSerial::new(rand::random()),
    }
}

/// What the next keyfob presented to the reader does
#[derive(Debug, Clone)]
pub enum FobResponse {
    /// A valid fob completes the operation
    Accept(KeyfobSession),
    /// Authentication fails
    Reject,
    /// Nothing is presented within the window
    NoFob,
    /// A non-admin fob attempts an admin operation
    NotAdmin,
    /// Association refused because the fob's table is full
    TableFull,
    /// Success and failure reported together
    Ambiguous,
}

/// Scripted keyfob task
#[derive(Clone)]
pub struct SimKeyfob {
    queue: Arc<Mutex<VecDeque<FobResponse>>>,
    presented: Arc<Notify>,
    stalled: Arc<AtomicBool>,
}

impl SimKeyfob {
    fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            presented: Arc::new(Notify::new()),
            stalled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A stalled reader swallows requests without answering
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Queue the response of the next reader operation
    pub fn present(&self, response: FobResponse) {
        guard(&self.queue).push_back(response);
        self.presented.notify_one();
    }

    fn spawn(self, handles: KeyfobHandles) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(handles).await })
    }

    async fn run(self, handles: KeyfobHandles) {
        loop {
            let requests = handles
                .requests
                .take_any(keyfob_request::ALL, None)
                .await;
            if self.stalled.load(Ordering::SeqCst) {
                debug!("Stalled reader ignored {:?}", requests);
                continue;
            }

            if requests.contains(keyfob_request::STOP_EXECUTION) {
                handles.events.set(event::STOP_SUCCESS);
            }
            if requests.contains(keyfob_request::FIRST_DETECT) {
                handles.events.set(event::FIRST_DETECT_SUCCESS);
            }
            if requests.contains(keyfob_request::GET_SERIAL) {
                debug!("Serial query ignored by simulated reader");
            }

            for (request, op) in [
                (keyfob_request::DETECT, ReaderOp::Detect),
                (keyfob_request::ASSOCIATE, ReaderOp::Associate),
                (keyfob_request::DELETE_ENTRY, ReaderOp::Delete),
            ] {
                if requests.contains(request) {
                    match self.next_fob(&handles).await {
                        Some(response) => self.complete(&handles, op, response).await,
                        None => debug!("Reader operation {:?} stopped", op),
                    }
                }
            }
        }
    }

    /// Wait for a fob, the detection window, or a stop request
    async fn next_fob(&self, handles: &KeyfobHandles) -> Option<FobResponse> {
        let deadline = Instant::now() + DETECT_WINDOW;
        loop {
            let queued = guard(&self.queue).pop_front();
            if let Some(response) = queued {
                return Some(response);
            }
            tokio::select! {
                _ = self.presented.notified() => {}
                _ = tokio::time::sleep_until(deadline) => return Some(FobResponse::NoFob),
                _ = handles.requests.wait_any(keyfob_request::STOP_EXECUTION, None) => {
                    handles.requests.clear(keyfob_request::STOP_EXECUTION);
                    handles.events.set(event::STOP_SUCCESS);
                    return None;
                }
            }
        }
    }

    async fn complete(&self, handles: &KeyfobHandles, op: ReaderOp, response: FobResponse) {
        let outcome = match (op, response) {
            (ReaderOp::Detect, FobResponse::Accept(session))
            | (ReaderOp::Associate, FobResponse::Accept(session)) => {
                if let Err(e) = handles
                    .sessions
                    .send_timeout(session, Duration::from_secs(2))
                    .await
                {
                    warn!("Session handoff failed: {}", e);
                }
                match op {
                    ReaderOp::Detect => event::AUTH_SUCCESS,
                    _ => event::ASSOCIATION_SUCCESS,
                }
            }
            (ReaderOp::Delete, FobResponse::Accept(_)) => event::DELETE_SUCCESS,
            (_, FobResponse::NoFob) => event::DETECT_TIMEOUT,
            (_, FobResponse::NotAdmin) => event::NOT_ADMIN,
            (ReaderOp::Associate, FobResponse::TableFull) => event::ENTRY_FULL,
            (ReaderOp::Detect, FobResponse::Ambiguous) => event::AUTH_SUCCESS | event::AUTH_FAILURE,
            (ReaderOp::Detect, _) => event::AUTH_FAILURE,
            (ReaderOp::Associate, _) => event::ASSOCIATION_FAILURE,
            (ReaderOp::Delete, _) => event::DELETE_FAILURE,
        };
        handles.events.set(outcome);
    }
}

#[derive(Debug, Clone, Copy)]
enum ReaderOp {
    Detect,
    Associate,
    Delete,
}

/// What the user does at the next PIN prompt
#[derive(Debug, Clone)]
pub enum PinInput {
    Digits([u8; PIN_LENGTH]),
    Cancel,
}

/// Scripted PIN-entry task
#[derive(Clone)]
pub struct SimPin {
    queue: Arc<Mutex<VecDeque<PinInput>>>,
    typed: Arc<Notify>,
}

impl SimPin {
    fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            typed: Arc::new(Notify::new()),
        }
    }

    pub fn enter(&self, input: PinInput) {
        guard(&self.queue).push_back(input);
        self.typed.notify_one();
    }

    fn spawn(self, handles: PinHandles, window: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                handles
                    .requests
                    .take_any(pin_request::ENTER_PIN, None)
                    .await;
                let response = match self.next_input(window).await {
                    Some(PinInput::Digits(digits)) => PinResponse::entered(digits),
                    Some(PinInput::Cancel) => PinResponse::cancelled(),
                    None => PinResponse::timed_out(),
                };
                if let Err(e) = handles.responses.send_timeout(response, window).await {
                    warn!("PIN handoff failed: {}", e);
                }
            }
        })
    }

    async fn next_input(&self, window: Duration) -> Option<PinInput> {
        let deadline = Instant::now() + window;
        loop {
            let queued = guard(&self.queue).pop_front();
            if let Some(input) = queued {
                return Some(input);
            }
            tokio::select! {
                _ = self.typed.notified() => {}
                _ = tokio::time::sleep_until(deadline) => return None,
            }
        }
    }
}

/// Stimulus side of an assembled bench device
pub struct Bench {
    board: Arc<SimBoard>,
    keyfob: SimKeyfob,
    pin: SimPin,
    button: ButtonHandle,
    motion: MotionHandles,
    host_link: Arc<HostLink>,
    records: Records,
    state: watch::Receiver<SecurityState>,
    tasks: Vec<JoinHandle<()>>,
}

impl Bench {
    pub fn board(&self) -> &Arc<SimBoard> {
        &self.board
    }

    pub fn keyfob(&self) -> &SimKeyfob {
        &self.keyfob
    }

    pub fn host_link(&self) -> &Arc<HostLink> {
        &self.host_link
    }

    pub fn state(&self) -> SecurityState {
        *self.state.borrow()
    }

    pub fn press(&self, kind: PressKind) {
        info!("Bench: {:?} press", kind);
        self.button.press(kind);
    }

    pub fn present(&self, response: FobResponse) {
        info!("Bench: keyfob {}", response_name(&response));
        self.keyfob.present(response);
    }

    pub fn enter_pin(&self, digits: &str) -> Result<()> {
        self.pin.enter(PinInput::Digits(parse_digits(digits)?));
        Ok(())
    }

    pub fn cancel_pin(&self) {
        self.pin.enter(PinInput::Cancel);
    }

    /// Shake the device. Returns whether the motion task was listening.
    pub fn shake(&self) -> bool {
        self.motion.report_motion()
    }

    pub fn set_in_range(&self, in_range: bool) {
        self.board.set_in_range(in_range);
    }

    /// Provision the device PIN, keeping the device serial if one exists
    pub fn provision_pin(&self, digits: &str) -> Result<()> {
        let hash = hash_pin(&parse_digits(digits)?)?;
        let device = match self.records.read::<DeviceRecord>()? {
            Some(device) => device,
            None => DeviceRecord::new(KeyfobSerial::new(rand::random())),
        };
        self.records.write(&device.with_pin_hash(hash))?;
        info!("Bench: device PIN provisioned");
        Ok(())
    }
}

impl Drop for Bench {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn response_name(response: &FobResponse) -> &'static str {
    match response {
        FobResponse::Accept(_) => "accept",
        FobResponse::Reject => "reject",
        FobResponse::NoFob => "absent",
        FobResponse::NotAdmin => "not-admin",
        FobResponse::TableFull => "table-full",
        FobResponse::Ambiguous => "ambiguous",
    }
}

/// Wire a complete simulated device around `storage`.
///
/// Must be called from within a tokio runtime: the keyfob and PIN-entry
/// tasks are spawned here.
pub fn assemble(storage: Arc<dyn Storage>, config: &DaemonConfig) -> (Orchestrator, Bench) {
    let board = Arc::new(SimBoard::new());
    let (bundle, collaborators) = ResourceBundle::bootstrap();
    let records = Records::new(storage);

    let peripherals = Peripherals {
        host: board.clone(),
        proximity: board.clone(),
        motion: board.clone(),
        rtc: board.clone(),
        root_of_trust: board.clone(),
        display: board.clone(),
    };
    let retry = RetryStore::new(
        records.clone(),
        board.clone(),
        board.clone(),
        config.backoff,
        &config.timings,
    );

    let keyfob = SimKeyfob::new();
    let pin = SimPin::new();
    let tasks = vec![
        keyfob.clone().spawn(collaborators.keyfob),
        pin.clone().spawn(collaborators.pin, config.timings.pin_entry),
    ];
    let host_link = Arc::new(HostLink::new(
        collaborators.host,
        config.timings.host_reply_budget(),
    ));

    let bench_records = records.clone();
    let orchestrator = Orchestrator::new(
        bundle,
        peripherals,
        records,
        retry,
        config.timings.clone(),
    );
    let bench = Bench {
        board,
        keyfob,
        pin,
        button: collaborators.button,
        motion: collaborators.motion,
        host_link,
        records: bench_records,
        state: orchestrator.subscribe(),
        tasks,
    };
    (orchestrator, bench)
}

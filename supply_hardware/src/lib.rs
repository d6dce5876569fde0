//! Simulated bench power supply.
//!
//! [`SimulatedSupply`] stands in for a network-attached DC supply. A polling
//! daemon reconnects when the (simulated) link comes up, advances a
//! first-order voltage response into a resistive load, and exits when another
//! supply claims the registry's instrument slot.

pub mod error;
pub mod util;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use supply_traits::{BoxError, PowerSupply, Registry, Stoppable, Token};

use crate::error::{Result, SupplyError};

type Callback = Box<dyn Fn() + Send + Sync>;

/// Commands kept by [`SimulatedSupply::command_log`]; older ones are dropped.
pub const COMMAND_LOG_CAPACITY: usize = 1024;

/// Commands the simulator has accepted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Output(bool),
    Voltage(f64),
    Current(f64),
    CurrentLimit(f64),
}

#[derive(Debug, Clone)]
pub struct SimParams {
    pub address: String,
    pub load_ohms: f64,
    /// Time constant of the output voltage.
    pub response: Duration,
    pub poll: Duration,
    pub current_limit: f64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            address: "SIM::supply".into(),
            load_ohms: 10.0,
            response: Duration::from_millis(50),
            poll: Duration::from_millis(100),
            current_limit: 30.0,
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    connected: bool,
    output_on: bool,
    target_voltage: f64,
    target_current: f64,
    voltage: f64,
    current: f64,
    current_limit: f64,
    idn: Option<String>,
    log: VecDeque<Command>,
    last_step: Option<Instant>,
}

struct Inner {
    params: SimParams,
    state: Mutex<SimState>,
    link_up: AtomicBool,
    active: AtomicBool,
    finished: AtomicBool,
    superseded: AtomicBool,
    stop_tx: xch::Sender<()>,
    on_connect: Mutex<Option<Callback>>,
    on_disconnect: Mutex<Option<Callback>>,
}

impl SimState {
    fn record(&mut self, command: Command) {
        if self.log.len() == COMMAND_LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(command);
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fire(&self, which: &Mutex<Option<Callback>>) {
        let cb = which.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(f) = cb.as_ref() {
            f();
        }
    }

    fn connect(&self) {
        {
            let mut s = self.lock();
            s.connected = true;
            s.idn = Some(format!("SIMULATED,DC-LOAD,0,{}", self.params.address));
            s.current_limit = self.params.current_limit;
            // Zero current before enabling the output.
            s.target_current = 0.0;
            s.record(Command::Current(0.0));
            s.output_on = true;
            s.record(Command::Output(true));
            s.last_step = Some(Instant::now());
        }
        tracing::info!(address = %self.params.address, "supply connected");
        self.fire(&self.on_connect);
    }

    fn disconnect(&self) {
        {
            let mut s = self.lock();
            s.connected = false;
            s.last_step = None;
        }
        tracing::warn!(address = %self.params.address, "supply disconnected");
        self.fire(&self.on_disconnect);
    }

    /// Advance the output toward its target and derive the load current.
    fn refresh(&self) {
        let mut s = self.lock();
        let now = Instant::now();
        let dt = s
            .last_step
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t));
        s.last_step = Some(now);

        let goal = if s.output_on { s.target_voltage } else { 0.0 };
        let alpha = if self.params.response.is_zero() {
            1.0
        } else {
            1.0 - (-dt.as_secs_f64() / self.params.response.as_secs_f64()).exp()
        };
        s.voltage += alpha * (goal - s.voltage);
        s.current = s.voltage / self.params.load_ohms;
        if s.current > s.current_limit {
            // Constant-current: the load voltage collapses to I_lim * R.
            s.current = s.current_limit;
            s.voltage = s.current_limit * self.params.load_ohms;
        }
    }

    fn disable_output(&self) {
        let mut s = self.lock();
        if s.connected && s.output_on {
            s.output_on = false;
            s.record(Command::Output(false));
        }
    }

    fn shut_down_if_superseded(&self, registry: &Registry, token: Token) {
        if registry.instrument.is_current(token) {
            return;
        }
        tracing::info!(address = %self.params.address, "supply superseded, shutting down");
        self.superseded.store(true, Ordering::SeqCst);
        self.disable_output();
        self.active.store(false, Ordering::SeqCst);
    }

    fn poll_once(&self, registry: &Registry, token: Token) -> bool {
        if !self.active.load(Ordering::SeqCst) {
            return false;
        }
        if !registry.instrument.is_current(token) {
            return false;
        }
        let connected = self.lock().connected;
        let link = self.link_up.load(Ordering::SeqCst);
        match (connected, link) {
            (true, true) => self.refresh(),
            (true, false) => self.disconnect(),
            (false, true) => self.connect(),
            (false, false) => {}
        }
        true
    }
}

impl Stoppable for Inner {
    fn request_stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.try_send(());
    }

    fn wait_stopped(&self, timeout: Duration) -> bool {
        util::wait_until(
            || self.finished.load(Ordering::SeqCst),
            timeout,
            Duration::from_millis(1),
        )
        .is_ok()
    }
}

/// Simulated supply. Reads return the last values the daemon observed.
pub struct SimulatedSupply {
    inner: Arc<Inner>,
    stop_rx: xch::Receiver<()>,
    daemon: Mutex<Option<JoinHandle<()>>>,
    token: Mutex<Option<(Arc<Registry>, Token)>>,
}

impl SimulatedSupply {
    pub fn new(params: SimParams) -> Self {
        let (stop_tx, stop_rx) = xch::bounded(1);
        Self {
            inner: Arc::new(Inner {
                params,
                state: Mutex::new(SimState::default()),
                link_up: AtomicBool::new(true),
                active: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                superseded: AtomicBool::new(false),
                stop_tx,
                on_connect: Mutex::new(None),
                on_disconnect: Mutex::new(None),
            }),
            stop_rx,
            daemon: Mutex::new(None),
            token: Mutex::new(None),
        }
    }

    pub fn on_connect(&self, f: impl Fn() + Send + Sync + 'static) {
        *self.inner.on_connect.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(f));
    }

    pub fn on_disconnect(&self, f: impl Fn() + Send + Sync + 'static) {
        *self
            .inner
            .on_disconnect
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Box::new(f));
    }

    /// Become the registry's active instrument and start polling. A no-op if
    /// already running; a displaced previous supply is asked to stop.
    pub fn try_connect(&self, registry: &Arc<Registry>) -> Result<()> {
        if self.inner.superseded.load(Ordering::SeqCst) {
            return Err(SupplyError::Superseded);
        }
        if self.inner.active.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let holder: Arc<dyn Stoppable> = self.inner.clone();
        let (token, previous) = registry.instrument.claim(holder);
        if let Some(prev) = previous {
            prev.request_stop();
            if !prev.wait_stopped(self.inner.params.poll * 2) {
                tracing::warn!("previous supply did not stop in time");
            }
        }

        while self.stop_rx.try_recv().is_ok() {}
        self.inner.finished.store(false, Ordering::SeqCst);
        let inner = self.inner.clone();
        let reg = registry.clone();
        let stop_rx = self.stop_rx.clone();
        let poll = self.inner.params.poll;
        let handle = std::thread::Builder::new()
            .name("supply-poll".into())
            .spawn(move || {
                while inner.poll_once(&reg, token) {
                    match stop_rx.recv_timeout(poll) {
                        Err(xch::RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(xch::RecvTimeoutError::Disconnected) => break,
                    }
                }
                inner.shut_down_if_superseded(&reg, token);
                inner.finished.store(true, Ordering::SeqCst);
                tracing::trace!("supply poll thread exiting cleanly");
            });
        let handle = match handle {
            Ok(h) => h,
            Err(e) => {
                self.inner.active.store(false, Ordering::SeqCst);
                registry.instrument.release(token);
                return Err(e.into());
            }
        };
        *self.daemon.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = Some((registry.clone(), token));
        Ok(())
    }

    /// Simulate plugging or unplugging the cable.
    pub fn set_link(&self, up: bool) {
        self.inner.link_up.store(up, Ordering::SeqCst);
    }

    /// Disable the output and stop polling.
    pub fn kill(&self) {
        self.inner.disable_output();
        self.inner.request_stop();
        let handle = self.daemon.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(h) = handle {
            if h.join().is_err() {
                tracing::warn!("supply poll thread panicked during shutdown");
            }
        }
        self.inner.finished.store(true, Ordering::SeqCst);
        if let Some((reg, token)) = self.token.lock().unwrap_or_else(|e| e.into_inner()).take() {
            reg.instrument.release(token);
        }
    }

    pub fn idn(&self) -> Option<String> {
        self.inner.lock().idn.clone()
    }

    pub fn apply_current_limit(&self, amps: f64) -> Result<()> {
        if !amps.is_finite() || amps <= 0.0 {
            return Err(SupplyError::Rejected(format!("current limit {amps}")));
        }
        let mut s = self.inner.lock();
        if !s.connected {
            return Err(SupplyError::Disconnected);
        }
        s.current_limit = amps;
        s.record(Command::CurrentLimit(amps));
        Ok(())
    }

    pub fn target_current(&self) -> f64 {
        self.inner.lock().target_current
    }

    pub fn output_enabled(&self) -> bool {
        self.inner.lock().output_on
    }

    /// True from `try_connect` until the daemon has fully shut down.
    pub fn is_polling(&self) -> bool {
        self.daemon.lock().unwrap_or_else(|e| e.into_inner()).is_some()
            && !self.inner.finished.load(Ordering::SeqCst)
    }

    /// The most recent accepted commands, oldest first.
    pub fn command_log(&self) -> Vec<Command> {
        self.inner.lock().log.iter().copied().collect()
    }

    pub fn params(&self) -> &SimParams {
        &self.inner.params
    }

    fn command_voltage(&self, volts: f64) -> Result<()> {
        if self.inner.superseded.load(Ordering::SeqCst) {
            return Err(SupplyError::Superseded);
        }
        if !volts.is_finite() || volts < 0.0 {
            return Err(SupplyError::Rejected(format!("VOLT {volts}")));
        }
        let mut s = self.inner.lock();
        if !s.connected {
            return Err(SupplyError::Disconnected);
        }
        s.target_voltage = volts;
        s.record(Command::Voltage(volts));
        Ok(())
    }
}

impl PowerSupply for SimulatedSupply {
    fn voltage(&self) -> f64 {
        self.inner.lock().voltage
    }

    fn current(&self) -> f64 {
        self.inner.lock().current
    }

    fn power(&self) -> f64 {
        let s = self.inner.lock();
        if s.connected { s.voltage * s.current } else { 0.0 }
    }

    fn target_voltage(&self) -> f64 {
        self.inner.lock().target_voltage
    }

    fn set_voltage(&self, volts: f64) -> std::result::Result<(), BoxError> {
        self.command_voltage(volts).map_err(|e| Box::new(e) as BoxError)
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }
}

impl std::fmt::Debug for SimulatedSupply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.inner.lock();
        f.debug_struct("SimulatedSupply")
            .field("address", &self.inner.params.address)
            .field("connected", &s.connected)
            .field("target_voltage", &s.target_voltage)
            .field("voltage", &s.voltage)
            .field("current", &s.current)
            .finish_non_exhaustive()
    }
}

impl Drop for SimulatedSupply {
    fn drop(&mut self) {
        self.kill();
    }
}

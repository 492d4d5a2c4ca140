//! Blocking facade over the async MAC.
//!
//! Every long running call (`join*`, `transmit_message`) drives the MAC to completion on
//! the calling thread with [`futures::executor::block_on`]. Only one such call runs at a
//! time; a second one fails immediately. Status queries read a shared [`LinkMonitor`]
//! and never wait for the running call. [`Node::reset`] and [`Node::shutdown`] abort the
//! running call, which then returns a failure to its caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::executor::block_on;
use futures::future::{AbortHandle, AbortRegistration, Abortable};
use heapless::Vec;

use crate::device::credentials_store::{CredentialsStore, DeviceIdentity};
use crate::device::radio::types::RfSettings;
use crate::device::radio::Radio;
use crate::device::radio_buffer::{RadioBuffer, MAX_PHY_PAYLOAD};
use crate::device::Device;
use crate::dispatch::Dispatcher;
use crate::mac::region::channel_plan::dynamic::DynamicChannelPlan;
use crate::mac::region::channel_plan::fixed::FixedChannelPlan;
use crate::mac::region::channel_plan::ChannelPlan;
use crate::mac::region::eu868::EU868;
use crate::mac::region::us915::US915;
use crate::mac::region::Region;
use crate::mac::scheduler::class_a::Downlink;
use crate::mac::types::{
    Configuration, Credentials, FrameCounters, JoinState, LinkMonitor, LinkStatus, RxTxWindow,
};
use crate::mac::Mac;

/// Failures of the provisioning, join and lifecycle calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// No credentials are stored.
    NotProvisioned,
    /// Provisioning input is not a 16/16/32 hex character triple.
    InvalidCredentials,
    /// The non-volatile store could not be read or written.
    Store,
    /// Every join attempt went unanswered, or the join was aborted.
    JoinFailed,
    /// Misuse: another call in progress, nothing to report for a window, bad argument.
    Unexpected,
    /// The node is shut down, see [`Node::startup`].
    Shutdown,
}

/// Outcome of [`Node::transmit_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(i8)]
pub enum ResponseCode {
    /// The uplink was sent (and acknowledged if confirmed); no payload came back.
    SuccessfulTransmission = 1,
    /// A downlink payload was handed to the message callback.
    SuccessfulReceive = 2,
    /// Radio failure, no acknowledgement after all retransmissions, or aborted.
    ErrorTransmissionFailed = -1,
    /// Not joined, another call in progress or invalid arguments.
    ErrorUnexpected = -10,
}

impl ResponseCode {
    /// Numeric value.
    pub fn code(self) -> i8 {
        self as i8
    }

    /// Did the uplink go out?
    pub fn is_success(self) -> bool {
        self.code() > 0
    }
}

/// Region independent knobs of a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Settings {
    max_join_attempts: u8,
    join_backoff_ms: u32,
    max_confirmed_transmissions: u8,
    adr_enabled: bool,
    subband: Option<u8>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_join_attempts: 8,
            join_backoff_ms: 1_000,
            max_confirmed_transmissions: 8,
            adr_enabled: true,
            subband: Some(2),
        }
    }
}

impl Settings {
    /// Join requests sent before [`Error::JoinFailed`].
    pub fn max_join_attempts(mut self, attempts: u8) -> Self {
        self.max_join_attempts = attempts.max(1);
        self
    }

    /// Base of the exponential backoff between join requests.
    pub fn join_backoff_ms(mut self, backoff_ms: u32) -> Self {
        self.join_backoff_ms = backoff_ms;
        self
    }

    /// Transmissions of a confirmed uplink, retransmissions included.
    pub fn max_confirmed_transmissions(mut self, transmissions: u8) -> Self {
        self.max_confirmed_transmissions = transmissions.max(1);
        self
    }

    /// Let the network control data rate and power.
    pub fn adr_enabled(mut self, enabled: bool) -> Self {
        self.adr_enabled = enabled;
        self
    }

    /// Sub-band (1..=8) of a fixed channel plan, `None` to use all channels.
    pub fn subband(mut self, subband: Option<u8>) -> Self {
        self.subband = subband;
        self
    }

    fn configuration(&self) -> Configuration {
        Configuration {
            adr_enabled: self.adr_enabled,
            max_join_attempts: self.max_join_attempts,
            join_backoff_ms: self.join_backoff_ms,
            max_confirmed_transmissions: self.max_confirmed_transmissions,
            ..Default::default()
        }
    }
}

struct Engine<D, R, C>
where
    D: Device,
    R: Region,
    C: ChannelPlan<R> + Default,
{
    device: D,
    mac: Mac<R, C>,
    radio_buffer: RadioBuffer,
    running: bool,
}

#[derive(Default)]
struct InFlight {
    call: u64,
    abort: Option<AbortHandle>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// EU868 end device.
pub type Eu868Node<D> = Node<D, EU868, DynamicChannelPlan<EU868>>;
/// US915 end device.
pub type Us915Node<D> = Node<D, US915, FixedChannelPlan<US915>>;

/// Class A end device with a blocking API, shareable between threads.
pub struct Node<D, R, C>
where
    D: Device,
    R: Region,
    C: ChannelPlan<R> + Default,
{
    engine: Mutex<Engine<D, R, C>>,
    // lock order: `in_flight` before `engine`, never the other way around
    in_flight: Mutex<InFlight>,
    provisioned: (Mutex<bool>, Condvar),
    adr_enabled: AtomicBool,
    status: LinkMonitor,
    dispatcher: Dispatcher,
}

impl<D, R, C> Node<D, R, C>
where
    D: Device,
    R: Region,
    C: ChannelPlan<R> + Default,
{
    /// Take ownership of `device` and restore the persisted MAC state.
    pub fn new(mut device: D, settings: Settings) -> Result<Self, Error> {
        let mut mac = Mac::new(settings.configuration());
        mac.hydrate(&mut device).map_err(|e| {
            warn!("could not restore MAC state: {:?}", e);
            Error::Store
        })?;
        if let Some(subband) = settings.subband {
            mac.set_subband(subband).map_err(|e| {
                warn!("sub-band {} rejected: {:?}", subband, e);
                Error::Unexpected
            })?;
        }
        let provisioned = CredentialsStore::new(device.non_volatile_store()).is_provisioned();
        let status = mac.link_monitor();
        Ok(Self {
            engine: Mutex::new(Engine {
                device,
                mac,
                radio_buffer: RadioBuffer::new(),
                running: true,
            }),
            in_flight: Mutex::new(InFlight::default()),
            provisioned: (Mutex::new(provisioned), Condvar::new()),
            adr_enabled: AtomicBool::new(settings.adr_enabled),
            status,
            dispatcher: Dispatcher::default(),
        })
    }

    fn engine(&self) -> MutexGuard<'_, Engine<D, R, C>> {
        lock(&self.engine)
    }

    /// Claim the MAC for a long running call. `None` when another one is in progress.
    fn begin(&self) -> Option<(MutexGuard<'_, Engine<D, R, C>>, AbortRegistration, u64)> {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.abort.is_some() {
            return None;
        }
        let engine = self.engine();
        let (handle, registration) = AbortHandle::new_pair();
        in_flight.call = in_flight.call.wrapping_add(1);
        in_flight.abort = Some(handle);
        Some((engine, registration, in_flight.call))
    }

    /// Release the claim taken by `begin`. The engine guard must be dropped before.
    fn finish(&self, call: u64) {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.call == call {
            in_flight.abort = None;
        }
    }

    fn abort_in_flight(&self) {
        if let Some(handle) = lock(&self.in_flight).abort.take() {
            info!("aborting the call in progress");
            handle.abort();
        }
    }

    fn set_provisioned(&self, provisioned: bool) {
        let (flag, condvar) = &self.provisioned;
        *lock(flag) = provisioned;
        if provisioned {
            condvar.notify_all();
        }
    }

    fn save_identity(&self, identity: &DeviceIdentity) -> Result<(), Error> {
        let mut engine = self.engine();
        CredentialsStore::new(engine.device.non_volatile_store()).save(identity).map_err(|e| {
            warn!("could not save credentials: {:?}", e);
            Error::Store
        })?;
        drop(engine);
        self.set_provisioned(true);
        Ok(())
    }

    /// Parse and persist a DevEUI / JoinEUI / AppKey triple given as hex strings.
    /// Nothing is written when any of them is malformed.
    pub fn provision(&self, dev_eui: &str, join_eui: &str, app_key: &str) -> Result<(), Error> {
        let identity = DeviceIdentity::from_hex(dev_eui, join_eui, app_key).map_err(|e| {
            warn!("invalid credentials: {:?}", e);
            Error::InvalidCredentials
        })?;
        self.save_identity(&identity)
    }

    /// Like [`provision`](Self::provision), deriving the DevEUI from the hardware id.
    pub fn provision_with_mac(&self, join_eui: &str, app_key: &str) -> Result<(), Error> {
        let hardware_id = self.engine().device.hardware_id().ok_or(Error::Unexpected)?;
        let identity = DeviceIdentity::from_hardware_id(hardware_id, join_eui, app_key)
            .map_err(|e| {
                warn!("invalid credentials: {:?}", e);
                Error::InvalidCredentials
            })?;
        self.save_identity(&identity)
    }

    /// Delete the stored credentials. The current session, if any, is kept.
    pub fn clear_credentials(&self) -> Result<(), Error> {
        let mut engine = self.engine();
        CredentialsStore::new(engine.device.non_volatile_store()).clear().map_err(|e| {
            warn!("could not clear credentials: {:?}", e);
            Error::Store
        })?;
        drop(engine);
        self.set_provisioned(false);
        Ok(())
    }

    /// Are credentials available to [`join_provisioned`](Self::join_provisioned)?
    pub fn is_provisioned(&self) -> bool {
        *lock(&self.provisioned.0)
    }

    /// Block until credentials have been provisioned.
    pub fn wait_for_provisioning(&self) {
        let (flag, condvar) = &self.provisioned;
        let mut provisioned = lock(flag);
        while !*provisioned {
            provisioned = condvar.wait(provisioned).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until credentials have been provisioned or `timeout` passed. Returns whether
    /// the node is provisioned.
    pub fn wait_for_provisioning_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &self.provisioned;
        let guard = lock(flag);
        let (provisioned, _) = condvar
            .wait_timeout_while(guard, timeout, |provisioned| !*provisioned)
            .unwrap_or_else(PoisonError::into_inner);
        *provisioned
    }

    /// Join with the stored credentials.
    pub fn join_provisioned(&self) -> Result<(), Error> {
        let (mut engine, registration, call) = self.begin().ok_or_else(|| {
            warn!("join refused, another call is in progress");
            Error::Unexpected
        })?;
        let stored = CredentialsStore::new(engine.device.non_volatile_store()).load();
        let result = match stored {
            Ok(Some(identity)) => Self::run_join(&mut engine, registration, &identity),
            Ok(None) => Err(Error::NotProvisioned),
            Err(e) => {
                warn!("could not load credentials: {:?}", e);
                Err(Error::Store)
            }
        };
        drop(engine);
        self.finish(call);
        result
    }

    /// Join with the given hex credentials without storing them.
    pub fn join(&self, dev_eui: &str, join_eui: &str, app_key: &str) -> Result<(), Error> {
        let identity = DeviceIdentity::from_hex(dev_eui, join_eui, app_key).map_err(|e| {
            warn!("invalid credentials: {:?}", e);
            Error::InvalidCredentials
        })?;
        let (mut engine, registration, call) = self.begin().ok_or_else(|| {
            warn!("join refused, another call is in progress");
            Error::Unexpected
        })?;
        self.set_provisioned(true);
        let result = Self::run_join(&mut engine, registration, &identity);
        drop(engine);
        self.finish(call);
        result
    }

    fn run_join(
        engine: &mut Engine<D, R, C>,
        registration: AbortRegistration,
        identity: &DeviceIdentity,
    ) -> Result<(), Error> {
        let Engine { device, mac, radio_buffer, running } = engine;
        if !*running {
            return Err(Error::Shutdown);
        }
        let credentials = Credentials::from(identity);
        match block_on(Abortable::new(mac.join(device, radio_buffer, &credentials), registration)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("join failed: {:?}", e);
                Err(Error::JoinFailed)
            }
            Err(_) => {
                warn!("join aborted");
                Err(Error::JoinFailed)
            }
        }
    }

    /// Register the handler for downlink payloads, replacing any previous one. It runs
    /// on the thread inside [`transmit_message`](Self::transmit_message).
    pub fn on_message(&self, callback: impl FnMut(&[u8], u8) + Send + 'static) {
        self.dispatcher.register(Box::new(callback));
    }

    /// Send `payload` on `port` (1..=223) and wait for both receive windows.
    pub fn transmit_message(&self, payload: &[u8], port: u8, confirm: bool) -> ResponseCode {
        let (mut engine, registration, call) = match self.begin() {
            Some(claim) => claim,
            None => {
                warn!("transmit refused, another call is in progress");
                return ResponseCode::ErrorUnexpected;
            }
        };
        let mut received: Option<(u8, Vec<u8, MAX_PHY_PAYLOAD>)> = None;
        let code = {
            let Engine { device, mac, radio_buffer, running } = &mut *engine;
            if !*running || !mac.is_joined() {
                warn!("transmit refused, not joined");
                ResponseCode::ErrorUnexpected
            } else {
                let send = mac.send(device, radio_buffer, payload, port, confirm);
                match block_on(Abortable::new(send, registration)) {
                    Ok(Ok(Some(Downlink { payload: Some((port, range)), .. }))) => {
                        received = Vec::from_slice(radio_buffer.slice(range))
                            .ok()
                            .map(|payload| (port, payload));
                        ResponseCode::SuccessfulReceive
                    }
                    Ok(Ok(_)) => ResponseCode::SuccessfulTransmission,
                    Ok(Err(crate::Error::Mac(
                        crate::mac::Error::NetworkNotJoined
                        | crate::mac::Error::SessionExpired
                        | crate::mac::Error::InvalidFPort(_)
                        | crate::mac::Error::PayloadTooLarge { .. },
                    ))) => ResponseCode::ErrorUnexpected,
                    Ok(Err(e)) => {
                        warn!("transmission failed: {:?}", e);
                        ResponseCode::ErrorTransmissionFailed
                    }
                    Err(_) => {
                        warn!("transmission aborted");
                        ResponseCode::ErrorTransmissionFailed
                    }
                }
            }
        };
        drop(engine);
        // still claimed: no other call, hence no other callback, can run meanwhile
        if let Some((port, payload)) = received {
            self.dispatcher.dispatch(&payload, port);
        }
        self.finish(call);
        code
    }

    /// Has a join succeeded since the last reset?
    pub fn is_joined(&self) -> bool {
        self.status.snapshot().join_state == JoinState::Joined
    }

    /// Progress of the join handshake.
    pub fn join_state(&self) -> JoinState {
        self.status.snapshot().join_state
    }

    /// Everything the status queries below report, in one consistent snapshot.
    pub fn link_status(&self) -> LinkStatus {
        self.status.snapshot()
    }

    /// RSSI of the last accepted downlink.
    pub fn rssi(&self) -> Option<i16> {
        self.status.snapshot().rssi
    }

    /// Frame counters of the current session.
    pub fn frame_counters(&self) -> Option<FrameCounters> {
        self.status.snapshot().counters
    }

    /// Part of the transmit/receive cycle the radio is in right now.
    pub fn rx_tx_window(&self) -> RxTxWindow {
        self.status.snapshot().state.window()
    }

    /// Modulation last used in `window`. [`RxTxWindow::Idle`] has none.
    pub fn rf_settings(&self, window: RxTxWindow) -> Result<RfSettings, Error> {
        self.status.snapshot().rf_settings(window).ok_or(Error::Unexpected)
    }

    /// Modulation of the last transmission.
    pub fn tx_settings(&self) -> Result<RfSettings, Error> {
        self.rf_settings(RxTxWindow::Tx)
    }

    /// Modulation of the last RX1 window.
    pub fn rx1_settings(&self) -> Result<RfSettings, Error> {
        self.rf_settings(RxTxWindow::Rx1)
    }

    /// Modulation of the last RX2 window.
    pub fn rx2_settings(&self) -> Result<RfSettings, Error> {
        self.rf_settings(RxTxWindow::Rx2)
    }

    /// Is adaptive data rate on?
    pub fn adr_enabled(&self) -> bool {
        self.adr_enabled.load(Ordering::Relaxed)
    }

    /// Switch adaptive data rate, waiting for a call in progress to end.
    pub fn set_adr_enabled(&self, enabled: bool) {
        self.engine().mac.set_adr_enabled(enabled);
        self.adr_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Restrict a fixed channel plan to `subband` (1..=8). No effect on dynamic plans.
    pub fn set_subband(&self, subband: u8) -> Result<(), Error> {
        self.engine().mac.set_subband(subband).map_err(|e| {
            warn!("sub-band {} rejected: {:?}", subband, e);
            Error::Unexpected
        })
    }

    /// Has [`shutdown`](Self::shutdown) been called without a later
    /// [`startup`](Self::startup)?
    pub fn is_running(&self) -> bool {
        self.engine().running
    }

    /// Abort the call in progress, drop the session and reset the radio. Credentials
    /// and the persisted nonces are kept.
    pub fn reset(&self) {
        self.abort_in_flight();
        let mut engine = self.engine();
        let Engine { device, mac, .. } = &mut *engine;
        mac.reset_session();
        if let Err(e) = block_on(device.radio().reset()) {
            warn!("radio reset failed: {:?}", e);
        }
        info!("node reset");
    }

    /// Abort the call in progress, drop the session and put the radio to sleep. Joins
    /// and transmissions fail until [`startup`](Self::startup).
    pub fn shutdown(&self) {
        self.abort_in_flight();
        let mut engine = self.engine();
        if !engine.running {
            return;
        }
        let Engine { device, mac, running, .. } = &mut *engine;
        mac.reset_session();
        if let Err(e) = block_on(device.radio().sleep(false)) {
            warn!("radio sleep failed: {:?}", e);
        }
        *running = false;
        info!("node shut down");
    }

    /// Bring the radio back after [`shutdown`](Self::shutdown).
    pub fn startup(&self) {
        let mut engine = self.engine();
        if engine.running {
            return;
        }
        if let Err(e) = block_on(engine.device.radio().reset()) {
            warn!("radio reset failed: {:?}", e);
        }
        engine.running = true;
        info!("node started");
    }
}

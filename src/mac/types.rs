//! Properties used in LoRaWAN MAC processing.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::device::credentials_store::DeviceIdentity;
use crate::device::radio::types::RfSettings;
use encoding::keys::{AppEui, AppKey, AppSKey, DevEui, NewSKey};
use encoding::parser::DevAddr;

pub(crate) struct RxWindows {
    pub(crate) rx1_open: u32,
    pub(crate) rx1_close: u32,
    pub(crate) rx2_open: u32,
    pub(crate) rx2_close: u32,
}

impl RxWindows {
    pub(crate) fn get_open(&self, window: &Window) -> u32 {
        match window {
            Window::_1 => self.rx1_open,
            Window::_2 => self.rx2_open,
        }
    }

    pub(crate) fn get_close(&self, window: &Window) -> u32 {
        match window {
            Window::_1 => self.rx1_close,
            Window::_2 => self.rx2_close,
        }
    }
}

/// Basic send/receive properties.
#[derive(Debug, PartialEq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Configuration {
    pub(crate) adr_enabled: bool,
    /// Aggregated duty cycle exponent from DutyCycleReq, `1 / 2^n`.
    pub(crate) max_duty_cycle: u8,
    pub(crate) tx_power: Option<u8>,
    pub(crate) tx_data_rate: Option<DR>,
    pub(crate) rx1_data_rate_offset: Option<u8>,
    pub(crate) rx_delay: Option<u8>,
    pub(crate) rx2_data_rate: Option<DR>,
    pub(crate) rx2_frequency: Option<u32>,
    pub(crate) number_of_transmissions: u8,
    pub(crate) max_confirmed_transmissions: u8,
    pub(crate) max_join_attempts: u8,
    pub(crate) join_backoff_ms: u32,
    pub(crate) join_backoff_cap_ms: u32,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            adr_enabled: true,
            max_duty_cycle: 0,
            tx_power: None,
            tx_data_rate: None,
            rx1_data_rate_offset: None,
            rx_delay: None,
            rx2_data_rate: None,
            rx2_frequency: None,
            number_of_transmissions: 1,
            max_confirmed_transmissions: 8,
            max_join_attempts: 8,
            join_backoff_ms: 1_000,
            join_backoff_cap_ms: 60_000,
        }
    }
}

impl Configuration {
    /// Forget what the network configured for the session, keeping the local policy
    /// and the persisted receive window parameters.
    pub(crate) fn reset_network_parameters(&mut self) {
        *self = Self {
            adr_enabled: self.adr_enabled,
            rx1_data_rate_offset: self.rx1_data_rate_offset,
            rx_delay: self.rx_delay,
            rx2_data_rate: self.rx2_data_rate,
            rx2_frequency: self.rx2_frequency,
            max_confirmed_transmissions: self.max_confirmed_transmissions,
            max_join_attempts: self.max_join_attempts,
            join_backoff_ms: self.join_backoff_ms,
            join_backoff_cap_ms: self.join_backoff_cap_ms,
            ..Default::default()
        };
    }
}

/// Identification properties used to enable communication with a network server.
///
/// EUIs are held in over-the-air byte order.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub(crate) join_eui: AppEui,
    pub(crate) dev_eui: DevEui,
    pub(crate) app_key: AppKey,
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("join_eui", &self.join_eui)
            .field("dev_eui", &self.dev_eui)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Credentials {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "Credentials {{ join_eui: {}, dev_eui: {}, .. }}", self.join_eui, self.dev_eui)
    }
}

fn wire_order(mut eui: [u8; 8]) -> [u8; 8] {
    eui.reverse();
    eui
}

impl From<&DeviceIdentity> for Credentials {
    fn from(identity: &DeviceIdentity) -> Self {
        Self {
            join_eui: AppEui::from(wire_order(identity.join_eui)),
            dev_eui: DevEui::from(wire_order(identity.dev_eui)),
            app_key: AppKey::from(identity.app_key),
        }
    }
}

/// Uplink and downlink frame counters of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameCounters {
    /// Counter the next uplink will carry.
    pub up: u32,
    /// Counter of the last accepted downlink, `None` before the first one.
    pub down: Option<u32>,
}

/// Properties maintained during a session with a network server.
pub struct Session {
    pub(crate) nwk_skey: NewSKey,
    pub(crate) app_skey: AppSKey,
    pub(crate) dev_addr: DevAddr<[u8; 4]>,
    pub(crate) counters: FrameCounters,
}

impl Session {
    /// Creation, counters start at zero.
    pub fn new(nwk_skey: NewSKey, app_skey: AppSKey, dev_addr: DevAddr<[u8; 4]>) -> Self {
        Self { nwk_skey, app_skey, dev_addr, counters: FrameCounters::default() }
    }

    /// Has the uplink frame count reached the limit?
    pub fn is_expired(&self) -> bool {
        self.counters.up == u32::MAX
    }
}

/// Basic send/receive properties persisted in non-volatile storage for
/// continuity across power-on cycles.
#[derive(Debug, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Storable {
    pub(crate) rx1_data_rate_offset: Option<u8>,
    pub(crate) rx_delay: Option<u8>,
    pub(crate) rx2_data_rate: Option<DR>,
    pub(crate) rx2_frequency: Option<u32>,
    pub(crate) dev_nonce: u16,
    /// Highest JoinNonce accepted so far.
    pub(crate) join_nonce: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
#[repr(u8)]
pub enum DR {
    _0 = 0,
    _1 = 1,
    _2 = 2,
    _3 = 3,
    _4 = 4,
    _5 = 5,
    _6 = 6,
    _7 = 7,
    _8 = 8,
    _9 = 9,
    _10 = 10,
    _11 = 11,
    _12 = 12,
    _13 = 13,
    _14 = 14,
    _15 = 15,
}

impl DR {
    /// Is this DR within range?
    pub fn in_range(&self, range: (DR, DR)) -> bool {
        (range.0 as u8 <= *self as u8) && (*self as u8 <= range.1 as u8)
    }
}

impl TryFrom<u8> for DR {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DR::_0),
            1 => Ok(DR::_1),
            2 => Ok(DR::_2),
            3 => Ok(DR::_3),
            4 => Ok(DR::_4),
            5 => Ok(DR::_5),
            6 => Ok(DR::_6),
            7 => Ok(DR::_7),
            8 => Ok(DR::_8),
            9 => Ok(DR::_9),
            10 => Ok(DR::_10),
            11 => Ok(DR::_11),
            12 => Ok(DR::_12),
            13 => Ok(DR::_13),
            14 => Ok(DR::_14),
            15 => Ok(DR::_15),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Frame {
    Join,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Window {
    _1,
    _2,
}

/// Which part of the transmit/receive cycle the radio is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum RxTxWindow {
    Idle,
    Tx,
    Rx1,
    Rx2,
}

/// Progress of the uplink currently being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum SessionState {
    Idle,
    AwaitingDutyWindow,
    Transmitting,
    Rx1Listening,
    Rx2Listening,
}

impl SessionState {
    /// Radio window this state belongs to.
    pub fn window(self) -> RxTxWindow {
        match self {
            SessionState::Idle | SessionState::AwaitingDutyWindow => RxTxWindow::Idle,
            SessionState::Transmitting => RxTxWindow::Tx,
            SessionState::Rx1Listening => RxTxWindow::Rx1,
            SessionState::Rx2Listening => RxTxWindow::Rx2,
        }
    }
}

/// OTAA handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum JoinState {
    Idle,
    Requesting,
    WaitingAccept,
    Joined,
    Failed,
}

/// Snapshot of the link as seen from outside the MAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkStatus {
    /// Current step of the uplink cycle.
    pub state: SessionState,
    /// Current step of the join handshake.
    pub join_state: JoinState,
    /// Modulation of the last transmission.
    pub tx: Option<RfSettings>,
    /// Modulation of the last RX1 window.
    pub rx1: Option<RfSettings>,
    /// Modulation of the last RX2 window.
    pub rx2: Option<RfSettings>,
    /// RSSI of the last accepted frame.
    pub rssi: Option<i16>,
    /// Frame counters of the active session.
    pub counters: Option<FrameCounters>,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            join_state: JoinState::Idle,
            tx: None,
            rx1: None,
            rx2: None,
            rssi: None,
            counters: None,
        }
    }
}

impl LinkStatus {
    /// Settings of `window`, `None` for [`RxTxWindow::Idle`] or a window never used.
    pub fn rf_settings(&self, window: RxTxWindow) -> Option<RfSettings> {
        match window {
            RxTxWindow::Idle => None,
            RxTxWindow::Tx => self.tx,
            RxTxWindow::Rx1 => self.rx1,
            RxTxWindow::Rx2 => self.rx2,
        }
    }
}

/// Shared view of the [`LinkStatus`], readable while the MAC is busy.
#[derive(Debug, Clone, Default)]
pub struct LinkMonitor(Arc<Mutex<LinkStatus>>);

impl LinkMonitor {
    fn lock(&self) -> MutexGuard<'_, LinkStatus> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current status.
    pub fn snapshot(&self) -> LinkStatus {
        *self.lock()
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut LinkStatus)) {
        f(&mut self.lock());
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.update(|status| status.state = state);
    }

    pub(crate) fn set_join_state(&self, join_state: JoinState) {
        self.update(|status| status.join_state = join_state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_keeps_local_policy_and_persisted_rx_parameters() {
        let mut configuration = Configuration {
            adr_enabled: false,
            max_join_attempts: 3,
            rx_delay: Some(5),
            rx2_frequency: Some(869_525_000),
            tx_data_rate: Some(DR::_3),
            number_of_transmissions: 3,
            ..Default::default()
        };
        configuration.reset_network_parameters();
        assert!(!configuration.adr_enabled);
        assert_eq!(configuration.max_join_attempts, 3);
        assert_eq!(configuration.rx_delay, Some(5));
        assert_eq!(configuration.rx2_frequency, Some(869_525_000));
        assert_eq!(configuration.tx_data_rate, None);
        assert_eq!(configuration.number_of_transmissions, 1);
    }

    #[test]
    fn monitor_is_shared_between_clones() {
        let monitor = LinkMonitor::default();
        let view = monitor.clone();
        monitor.set_state(SessionState::Rx2Listening);
        assert_eq!(view.snapshot().state.window(), RxTxWindow::Rx2);
        assert_eq!(view.snapshot().rf_settings(RxTxWindow::Idle), None);
    }
}

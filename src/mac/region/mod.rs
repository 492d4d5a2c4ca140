//! Regional parameters of the supported LoRaWAN regions.

use crate::device::radio::types::{CodingRate, Datarate};
use crate::device::Device;

use super::types::DR;
pub mod channel_plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Error {
    InvalidTxPower,
    InvalidChannelIndex,
    InvalidChannelMaskCtrl,
    InvalidFrequency,
    InvalidSubband(u8),
    DataRateNotSupported(DR),
    UnsupportedRx1DROffset(DR, u8),
    NoValidChannelFound,
    InvalidCfListType,
    CommandNotImplementedForRegion,
}

impl<D> From<Error> for crate::Error<D>
where
    D: Device,
{
    fn from(value: Error) -> Self {
        Self::Region(value)
    }
}

/// Frequency range sharing one duty-cycle budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SubBand {
    /// Inclusive lower edge in Hz.
    pub min_frequency: u32,
    /// Exclusive upper edge in Hz.
    pub max_frequency: u32,
    /// Duty cycle as a reciprocal: 100 means 1%.
    pub duty_cycle: u32,
}

/// Regional characteristics: channels, data rates, timing and duty cycle.
pub trait Region {
    /// Number of channels that are always defined (the join channels of a dynamic plan).
    fn default_channels() -> usize;
    /// Frequency of mandatory channel `index`, uplink or downlink.
    fn mandatory_frequency(index: usize, is_uplink: bool) -> u32;
    /// Uplink data rates allowed on mandatory channel `index`.
    fn mandatory_ul_data_rate_range(index: usize) -> (DR, DR);
    /// Every uplink data rate the region defines.
    fn ul_data_rate_range() -> (DR, DR);
    /// Data rate of data uplinks until the network sets one.
    fn default_data_rate() -> DR;
    /// Data rate of the join request sent on attempt `attempt` (zero based).
    fn join_data_rate(attempt: u8) -> DR;
    #[allow(missing_docs)]
    fn default_coding_rate() -> CodingRate {
        CodingRate::_4_5
    }
    /// RX2 frequency until RXParamSetupReq changes it.
    fn default_rx2_frequency() -> u32;
    /// RX2 data rate until DLSettings change it.
    fn default_rx2_data_rate() -> DR;
    /// Regulatory EIRP limit in dBm.
    fn max_eirp() -> u8;
    #[allow(missing_docs)]
    fn min_frequency() -> u32;
    #[allow(missing_docs)]
    fn max_frequency() -> u32;
    /// Modulation behind `dr`.
    fn convert_data_rate(dr: DR) -> Result<Datarate, Error>;
    /// Next data rate for adaptive data rate back off, `None` once the lowest is reached.
    fn next_adr_data_rate(current_dr: DR) -> Option<DR>;
    /// Largest RX1 data rate offset the region defines.
    fn max_rx1_dr_offset() -> u8;
    /// RX1 data rate answering an uplink sent at `ul_dr`.
    fn get_rx1_dr(ul_dr: DR, rx1_dr_offset: u8) -> Result<DR, Error>;
    /// Apply the TXPower field of a LinkADRReq. `None` means maximum power.
    fn modify_dbm(tx_power: u8, cur_dbm: Option<u8>, max_eirp: u8) -> Result<Option<u8>, Error>;
    /// Maximum application payload (FRMPayload) size at `dr`.
    fn max_app_payload(dr: DR) -> usize;
    /// Duty-cycle sub-bands. An empty slice means transmissions are not duty-cycle limited.
    fn sub_bands() -> &'static [SubBand];
    /// Index into [`Region::sub_bands`] of the band containing `frequency`.
    fn sub_band_of(frequency: u32) -> Option<usize> {
        Self::sub_bands()
            .iter()
            .position(|band| (band.min_frequency..band.max_frequency).contains(&frequency))
    }
    /// RX1 delay in ms after a data uplink.
    fn default_rx_delay() -> u32 {
        1000
    }
    /// JOIN_ACCEPT_DELAY1 in ms.
    fn default_join_accept_delay1() -> u32 {
        5000
    }
    /// JOIN_ACCEPT_DELAY2 in ms.
    fn default_join_accept_delay2() -> u32 {
        Self::default_join_accept_delay1() + 1000
    }
    /// ADR_ACK_LIMIT: uplinks without a downlink before ADRACKReq is set.
    fn default_adr_ack_limit() -> u8 {
        64
    }
    /// ADR_ACK_DELAY: uplinks between two backoff steps.
    fn default_adr_ack_delay() -> u8 {
        32
    }
}

pub mod eu868;
pub mod us915;

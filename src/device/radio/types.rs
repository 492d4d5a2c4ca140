//! Modulation and reception properties exchanged with the radio.

/// LoRa channel bandwidth.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Bandwidth {
    _125KHz,
    _250KHz,
    _500KHz,
}

impl Bandwidth {
    /// Bandwidth in Hz.
    pub fn hz(self) -> u32 {
        match self {
            Bandwidth::_125KHz => 125_000,
            Bandwidth::_250KHz => 250_000,
            Bandwidth::_500KHz => 500_000,
        }
    }
}

/// Convert the bandwidth for radio drivers built on lora-modulation.
impl From<Bandwidth> for lora_modulation::Bandwidth {
    fn from(bw: Bandwidth) -> Self {
        match bw {
            Bandwidth::_125KHz => lora_modulation::Bandwidth::_125KHz,
            Bandwidth::_250KHz => lora_modulation::Bandwidth::_250KHz,
            Bandwidth::_500KHz => lora_modulation::Bandwidth::_500KHz,
        }
    }
}

/// LoRa spreading factor.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum SpreadingFactor {
    _7,
    _8,
    _9,
    _10,
    _11,
    _12,
}

impl SpreadingFactor {
    /// Numeric spreading factor (chips per symbol as a power of two).
    pub fn factor(self) -> u8 {
        match self {
            SpreadingFactor::_7 => 7,
            SpreadingFactor::_8 => 8,
            SpreadingFactor::_9 => 9,
            SpreadingFactor::_10 => 10,
            SpreadingFactor::_11 => 11,
            SpreadingFactor::_12 => 12,
        }
    }
}

/// Convert the spreading factor for radio drivers built on lora-modulation.
impl From<SpreadingFactor> for lora_modulation::SpreadingFactor {
    fn from(sf: SpreadingFactor) -> Self {
        match sf {
            SpreadingFactor::_7 => lora_modulation::SpreadingFactor::_7,
            SpreadingFactor::_8 => lora_modulation::SpreadingFactor::_8,
            SpreadingFactor::_9 => lora_modulation::SpreadingFactor::_9,
            SpreadingFactor::_10 => lora_modulation::SpreadingFactor::_10,
            SpreadingFactor::_11 => lora_modulation::SpreadingFactor::_11,
            SpreadingFactor::_12 => lora_modulation::SpreadingFactor::_12,
        }
    }
}

/// LoRa forward error correction rate.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum CodingRate {
    _4_5,
    _4_6,
    _4_7,
    _4_8,
}

/// Convert the coding rate for radio drivers built on lora-modulation.
impl From<CodingRate> for lora_modulation::CodingRate {
    fn from(cr: CodingRate) -> Self {
        match cr {
            CodingRate::_4_5 => lora_modulation::CodingRate::_4_5,
            CodingRate::_4_6 => lora_modulation::CodingRate::_4_6,
            CodingRate::_4_7 => lora_modulation::CodingRate::_4_7,
            CodingRate::_4_8 => lora_modulation::CodingRate::_4_8,
        }
    }
}

/// Spreading factor and bandwidth pair a LoRaWAN data rate maps to.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Datarate {
    pub bandwidth: Bandwidth,
    pub spreading_factor: SpreadingFactor,
}

/// Radio settings for one transmission or reception.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct RfConfig {
    pub frequency: u32,
    pub coding_rate: CodingRate,
    pub data_rate: Datarate,
}

const PREAMBLE_SYMBOLS: u8 = 8;

impl RfConfig {
    /// Baseband parameters of this configuration as lora-modulation sees them.
    pub fn modulation_params(&self) -> lora_modulation::BaseBandModulationParams {
        lora_modulation::BaseBandModulationParams::new(
            self.data_rate.spreading_factor.into(),
            self.data_rate.bandwidth.into(),
            self.coding_rate.into(),
        )
    }

    /// Time on air in milliseconds (rounded up) of a `len` byte frame sent with
    /// explicit header, CRC on and an 8 symbol preamble.
    pub fn time_on_air_ms(&self, len: usize) -> u32 {
        let len = u8::try_from(len).unwrap_or(u8::MAX);
        self.modulation_params().time_on_air_us(Some(PREAMBLE_SYMBOLS), true, len).div_ceil(1000)
    }
}

/// Transmission settings.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct TxConfig {
    /// Transmit power in dBm.
    pub pw: u8,
    pub rf: RfConfig,
}

/// Signal quality of a received frame.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxQuality {
    rssi: i16,
    snr: i8,
}

impl RxQuality {
    /// Creation.
    pub fn new(rssi: i16, snr: i8) -> RxQuality {
        RxQuality { rssi, snr }
    }

    /// Received signal strength in dBm.
    pub fn rssi(self) -> i16 {
        self.rssi
    }

    /// Signal to noise ratio in dB.
    pub fn snr(self) -> i8 {
        self.snr
    }
}

/// Outcome of arming a receive window.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxEvent {
    /// Nothing was received before the deadline.
    Timeout,
    /// A frame of the given length now sits at the start of the receive buffer.
    Received(usize, RxQuality),
}

/// Snapshot of the modulation used in a TX or RX window, as reported to applications.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct RfSettings {
    pub spreading_factor: SpreadingFactor,
    pub bandwidth: Bandwidth,
    pub frequency: u32,
}

impl From<RfConfig> for RfSettings {
    fn from(config: RfConfig) -> Self {
        Self {
            spreading_factor: config.data_rate.spreading_factor,
            bandwidth: config.data_rate.bandwidth,
            frequency: config.frequency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(spreading_factor: SpreadingFactor, bandwidth: Bandwidth) -> RfConfig {
        RfConfig {
            frequency: 868_100_000,
            coding_rate: CodingRate::_4_5,
            data_rate: Datarate { bandwidth, spreading_factor },
        }
    }

    #[test]
    fn time_on_air_matches_reference_values() {
        // 13 byte empty uplink at SF7/125 kHz is 46.336 ms
        assert_eq!(config(SpreadingFactor::_7, Bandwidth::_125KHz).time_on_air_ms(13), 47);
        // 23 byte join request at SF12/125 kHz is 1482.752 ms
        assert_eq!(config(SpreadingFactor::_12, Bandwidth::_125KHz).time_on_air_ms(23), 1483);
        // 23 byte join request at SF7/125 kHz is 61.696 ms
        assert_eq!(config(SpreadingFactor::_7, Bandwidth::_125KHz).time_on_air_ms(23), 62);
    }

    #[test]
    fn low_data_rate_optimization_follows_symbol_length() {
        assert!(config(SpreadingFactor::_12, Bandwidth::_125KHz).modulation_params().ldro);
        assert!(!config(SpreadingFactor::_12, Bandwidth::_500KHz).modulation_params().ldro);
        // 51 bytes at SF11/125 kHz is 1314.816 ms with the optimization on
        assert_eq!(config(SpreadingFactor::_11, Bandwidth::_125KHz).time_on_air_ms(51), 1315);
    }

    #[test]
    fn wider_bandwidth_is_faster() {
        let narrow = config(SpreadingFactor::_8, Bandwidth::_125KHz).time_on_air_ms(51);
        let wide = config(SpreadingFactor::_8, Bandwidth::_500KHz).time_on_air_ms(51);
        assert!(wide * 3 < narrow);
    }

    #[test]
    fn settings_snapshot_keeps_modulation() {
        let rf = config(SpreadingFactor::_9, Bandwidth::_250KHz);
        let settings = RfSettings::from(rf);
        assert_eq!(settings.spreading_factor, SpreadingFactor::_9);
        assert_eq!(settings.bandwidth, Bandwidth::_250KHz);
        assert_eq!(settings.frequency, 868_100_000);
        assert!(matches!(
            lora_modulation::SpreadingFactor::from(settings.spreading_factor),
            lora_modulation::SpreadingFactor::_9
        ));
    }
}

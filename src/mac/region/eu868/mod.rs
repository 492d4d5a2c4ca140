//! Processing for the EU868 region, which uses a dynamic channel plan.

use super::{Error, SubBand};
use crate::device::radio::types::{Bandwidth, Datarate, SpreadingFactor};
use crate::mac::types::DR;

const JOIN_CHANNELS: [u32; 3] = [868_100_000, 868_300_000, 868_500_000];

const SUB_BANDS: [SubBand; 6] = [
    SubBand { min_frequency: 863_000_000, max_frequency: 865_000_000, duty_cycle: 1000 },
    SubBand { min_frequency: 865_000_000, max_frequency: 868_000_000, duty_cycle: 100 },
    SubBand { min_frequency: 868_000_000, max_frequency: 868_600_000, duty_cycle: 100 },
    SubBand { min_frequency: 868_700_000, max_frequency: 869_200_000, duty_cycle: 1000 },
    SubBand { min_frequency: 869_400_000, max_frequency: 869_650_000, duty_cycle: 10 },
    SubBand { min_frequency: 869_700_000, max_frequency: 870_000_000, duty_cycle: 100 },
];

/// Specific processing for the EU868 region.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EU868;

impl crate::mac::region::Region for EU868 {
    fn default_channels() -> usize {
        JOIN_CHANNELS.len()
    }
    fn mandatory_frequency(index: usize, _is_uplink: bool) -> u32 {
        JOIN_CHANNELS[index % JOIN_CHANNELS.len()]
    }
    fn mandatory_ul_data_rate_range(_index: usize) -> (DR, DR) {
        (DR::_0, DR::_5)
    }
    fn ul_data_rate_range() -> (DR, DR) {
        (DR::_0, DR::_5)
    }
    fn min_frequency() -> u32 {
        863_000_000
    }
    fn max_frequency() -> u32 {
        870_000_000
    }
    fn default_rx2_frequency() -> u32 {
        869_525_000
    }
    fn default_rx2_data_rate() -> DR {
        DR::_0
    }
    fn default_data_rate() -> DR {
        DR::_0
    }
    fn join_data_rate(attempt: u8) -> DR {
        // start fast, step down every second attempt
        DR::try_from(5u8.saturating_sub(attempt / 2)).unwrap_or(DR::_0)
    }

    fn convert_data_rate(dr: DR) -> Result<Datarate, Error> {
        let (spreading_factor, bandwidth) = match dr {
            DR::_0 => (SpreadingFactor::_12, Bandwidth::_125KHz),
            DR::_1 => (SpreadingFactor::_11, Bandwidth::_125KHz),
            DR::_2 => (SpreadingFactor::_10, Bandwidth::_125KHz),
            DR::_3 => (SpreadingFactor::_9, Bandwidth::_125KHz),
            DR::_4 => (SpreadingFactor::_8, Bandwidth::_125KHz),
            DR::_5 => (SpreadingFactor::_7, Bandwidth::_125KHz),
            DR::_6 => (SpreadingFactor::_7, Bandwidth::_250KHz),
            _ => return Err(Error::DataRateNotSupported(dr)),
        };
        Ok(Datarate { spreading_factor, bandwidth })
    }

    fn next_adr_data_rate(current_dr: DR) -> Option<DR> {
        match current_dr {
            DR::_0 => None,
            dr => DR::try_from((dr as u8 - 1).min(5)).ok(),
        }
    }

    fn max_eirp() -> u8 {
        16
    }

    fn modify_dbm(tx_power: u8, cur_dbm: Option<u8>, max_eirp: u8) -> Result<Option<u8>, Error> {
        match tx_power {
            0..=7 => max_eirp.checked_sub(tx_power * 2).map(Some).ok_or(Error::InvalidTxPower),
            15 => Ok(cur_dbm),
            _ => Err(Error::InvalidTxPower),
        }
    }

    fn max_rx1_dr_offset() -> u8 {
        5
    }

    fn get_rx1_dr(ul_dr: DR, rx1_dr_offset: u8) -> Result<DR, Error> {
        if rx1_dr_offset > 5 || !ul_dr.in_range((DR::_0, DR::_6)) {
            return Err(Error::UnsupportedRx1DROffset(ul_dr, rx1_dr_offset));
        }
        Ok(DR::try_from((ul_dr as u8).saturating_sub(rx1_dr_offset)).unwrap_or(DR::_0))
    }

    fn max_app_payload(dr: DR) -> usize {
        match dr {
            DR::_0 | DR::_1 | DR::_2 => 51,
            DR::_3 => 115,
            DR::_4 | DR::_5 | DR::_6 | DR::_7 => 222,
            _ => 0,
        }
    }

    fn sub_bands() -> &'static [SubBand] {
        &SUB_BANDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::region::Region;

    #[test]
    fn join_channels_share_the_one_percent_band() {
        for frequency in JOIN_CHANNELS {
            assert_eq!(EU868::sub_band_of(frequency), Some(2));
        }
        assert_eq!(EU868::sub_bands()[2].duty_cycle, 100);
        assert_eq!(EU868::sub_band_of(869_525_000), Some(4));
        assert_eq!(EU868::sub_band_of(869_300_000), None);
    }

    #[test]
    fn rx1_data_rate_table() {
        assert_eq!(EU868::get_rx1_dr(DR::_5, 0), Ok(DR::_5));
        assert_eq!(EU868::get_rx1_dr(DR::_5, 2), Ok(DR::_3));
        assert_eq!(EU868::get_rx1_dr(DR::_1, 3), Ok(DR::_0));
        assert!(EU868::get_rx1_dr(DR::_3, 6).is_err());
    }

    #[test]
    fn tx_power_steps_of_two_db() {
        assert_eq!(EU868::modify_dbm(0, None, 16), Ok(Some(16)));
        assert_eq!(EU868::modify_dbm(7, None, 16), Ok(Some(2)));
        assert_eq!(EU868::modify_dbm(15, Some(10), 16), Ok(Some(10)));
        assert_eq!(EU868::modify_dbm(8, None, 16), Err(Error::InvalidTxPower));
    }

    #[test]
    fn join_data_rate_steps_down() {
        assert_eq!(EU868::join_data_rate(0), DR::_5);
        assert_eq!(EU868::join_data_rate(1), DR::_5);
        assert_eq!(EU868::join_data_rate(2), DR::_4);
        assert_eq!(EU868::join_data_rate(40), DR::_0);
    }
}

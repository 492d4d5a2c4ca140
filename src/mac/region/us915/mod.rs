//! Processing for the US915 region, which uses a fixed channel plan.

use super::{Error, SubBand};
use crate::device::radio::types::{Bandwidth, Datarate, SpreadingFactor};
use crate::mac::types::DR;

/// Specific processing for the US915 region.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct US915;

impl crate::mac::region::Region for US915 {
    fn default_channels() -> usize {
        72
    }

    fn mandatory_frequency(index: usize, is_uplink: bool) -> u32 {
        if is_uplink {
            // upstream: 64 (902.3 to 914.9 [+ by 0.2]) + 8 (903.0 to 914.2 [+ by 1.6])
            if index < 64 {
                902_300_000 + 200_000 * index as u32
            } else {
                903_000_000 + 1_600_000 * (index as u32 - 64)
            }
        } else {
            // downstream: 8 (923.3 to 927.5 [+ by 0.6])
            923_300_000 + 600_000 * index as u32
        }
    }

    fn mandatory_ul_data_rate_range(index: usize) -> (DR, DR) {
        // 64 125 KHz channels using DR0 through DR3 + 8 500 KHz channels using DR4
        if index < 64 {
            (DR::_0, DR::_3)
        } else {
            (DR::_4, DR::_4)
        }
    }

    fn ul_data_rate_range() -> (DR, DR) {
        (DR::_0, DR::_4)
    }

    fn default_data_rate() -> DR {
        DR::_0
    }

    fn join_data_rate(_attempt: u8) -> DR {
        DR::_0
    }

    fn default_rx2_frequency() -> u32 {
        923_300_000
    }

    fn default_rx2_data_rate() -> DR {
        DR::_8
    }

    fn max_eirp() -> u8 {
        30
    }

    fn min_frequency() -> u32 {
        902_000_000
    }

    fn max_frequency() -> u32 {
        928_000_000
    }

    fn convert_data_rate(dr: DR) -> Result<Datarate, Error> {
        let (spreading_factor, bandwidth) = match dr {
            DR::_0 => (SpreadingFactor::_10, Bandwidth::_125KHz),
            DR::_1 => (SpreadingFactor::_9, Bandwidth::_125KHz),
            DR::_2 => (SpreadingFactor::_8, Bandwidth::_125KHz),
            DR::_3 => (SpreadingFactor::_7, Bandwidth::_125KHz),
            DR::_4 => (SpreadingFactor::_8, Bandwidth::_500KHz),
            DR::_8 => (SpreadingFactor::_12, Bandwidth::_500KHz),
            DR::_9 => (SpreadingFactor::_11, Bandwidth::_500KHz),
            DR::_10 => (SpreadingFactor::_10, Bandwidth::_500KHz),
            DR::_11 => (SpreadingFactor::_9, Bandwidth::_500KHz),
            DR::_12 => (SpreadingFactor::_8, Bandwidth::_500KHz),
            DR::_13 => (SpreadingFactor::_7, Bandwidth::_500KHz),
            _ => return Err(Error::DataRateNotSupported(dr)),
        };
        Ok(Datarate { spreading_factor, bandwidth })
    }

    fn next_adr_data_rate(current_dr: DR) -> Option<DR> {
        match current_dr {
            DR::_0 => None,
            DR::_1 => Some(DR::_0),
            DR::_2 => Some(DR::_1),
            DR::_3 => Some(DR::_2),
            DR::_4 => Some(DR::_3),
            _ => Some(DR::_0),
        }
    }

    fn max_rx1_dr_offset() -> u8 {
        3
    }

    fn get_rx1_dr(ul_dr: DR, rx1_dr_offset: u8) -> Result<DR, Error> {
        if rx1_dr_offset > 3 {
            return Err(Error::UnsupportedRx1DROffset(ul_dr, rx1_dr_offset));
        }
        let dl_dr_matrix = [
            [DR::_10, DR::_9, DR::_8, DR::_8],
            [DR::_11, DR::_10, DR::_9, DR::_8],
            [DR::_12, DR::_11, DR::_10, DR::_9],
            [DR::_13, DR::_12, DR::_11, DR::_10],
            [DR::_13, DR::_13, DR::_12, DR::_11],
        ];
        match ul_dr {
            DR::_0 | DR::_1 | DR::_2 | DR::_3 | DR::_4 => {
                Ok(dl_dr_matrix[ul_dr as usize][rx1_dr_offset as usize])
            }
            _ => Err(Error::UnsupportedRx1DROffset(ul_dr, rx1_dr_offset)),
        }
    }

    fn modify_dbm(tx_power: u8, cur_dbm: Option<u8>, max_eirp: u8) -> Result<Option<u8>, Error> {
        match tx_power {
            0..=14 => max_eirp.checked_sub(tx_power * 2).map(Some).ok_or(Error::InvalidTxPower),
            15 => Ok(cur_dbm),
            _ => Err(Error::InvalidTxPower),
        }
    }

    fn max_app_payload(dr: DR) -> usize {
        match dr {
            DR::_0 => 11,
            DR::_1 => 53,
            DR::_2 => 125,
            DR::_3 | DR::_4 => 242,
            DR::_8 => 33,
            DR::_9 => 109,
            DR::_10 | DR::_11 | DR::_12 | DR::_13 => 222,
            _ => 0,
        }
    }

    fn sub_bands() -> &'static [SubBand] {
        // no duty-cycle limit, dwell time is bounded by the airtime of DR0 instead
        &[]
    }
}

//! Channel bookkeeping shared by dynamic and fixed channel plans.

use heapless::Vec;

use encoding::maccommands::{ChannelMask, DataRateRange};
use encoding::parser::CfList;
use crate::mac::types::*;
pub mod dynamic;
pub mod fixed;

use super::{Error, Region};

pub const MAX_CHANNELS: usize = 80;

/// Uplink channel with its associated downlink (RX1) frequency.
pub trait Channel: Copy {
    fn get_ul_frequency(&self) -> u32;
    fn get_dl_frequency(&self) -> u32;
    fn get_ul_data_rate_range(&self) -> (DR, DR);
}

pub trait ChannelPlan<R>
where
    R: Region,
{
    type Channel: Channel;

    /// Enabled channels usable for `frame` at `data_rate`, with their indices.
    fn candidates(&self, frame: Frame, data_rate: DR) -> Vec<(usize, Self::Channel), MAX_CHANNELS>;
    fn handle_new_channel_req(
        &mut self,
        channel_index: u8,
        frequency: u32,
        data_rate_range: DataRateRange,
    ) -> Result<(), Error>;
    fn check_uplink_frequency_exists(&self, index: usize) -> bool;
    /// Apply one LinkADRReq mask to `new_mask` without touching the active mask.
    fn handle_channel_mask(
        &self,
        new_mask: &mut [bool; MAX_CHANNELS],
        channel_mask: ChannelMask<2>,
        channel_mask_ctrl: u8,
    ) -> Result<(), Error>;
    fn get_channel_mask(&self) -> [bool; MAX_CHANNELS];
    fn set_channel_mask(&mut self, mask: [bool; MAX_CHANNELS]) -> Result<(), Error>;
    fn handle_dl_channel_req(&mut self, channel_index: u8, frequency: u32) -> Result<(), Error>;
    fn handle_cf_list(&mut self, cf_list: CfList<'_>) -> Result<(), Error>;
    /// Re-enable the channels that are enabled after a join.
    fn reactivate_channels(&mut self);
    /// Restrict the plan to one block of 8 channels. Plans without sub-bands ignore it.
    fn set_subband(&mut self, _subband: u8) -> Result<(), Error> {
        Ok(())
    }
    fn validate_frequency(&self, frequency: u32) -> Result<(), Error> {
        if (R::min_frequency()..=R::max_frequency()).contains(&frequency) {
            Ok(())
        } else {
            Err(Error::InvalidFrequency)
        }
    }
}

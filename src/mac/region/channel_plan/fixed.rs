//! Fixed channel plan processing.

use core::marker::PhantomData;

use heapless::Vec;

use super::Error;
use encoding::maccommands::{ChannelMask, DataRateRange};
use encoding::parser::CfList;
use crate::mac::region::Region;
use crate::mac::types::*;

use super::{Channel, ChannelPlan, MAX_CHANNELS};

const NUM_OF_CHANNELS_IN_BLOCK: usize = 8;
const NUM_OF_125KHZ_CHANNELS: usize = 64;
const NUM_OF_CHANNELS: usize = 72;

/// Composition of properties and functions needed to represent a fixed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FixedChannel {
    pub(crate) ul_frequency: u32,
    pub(crate) dl_frequency: u32,
    pub(crate) ul_data_rate_range: (DR, DR),
}

impl Channel for FixedChannel {
    fn get_ul_frequency(&self) -> u32 {
        self.ul_frequency
    }

    fn get_dl_frequency(&self) -> u32 {
        self.dl_frequency
    }

    fn get_ul_data_rate_range(&self) -> (DR, DR) {
        self.ul_data_rate_range
    }
}

/// Composition of properties and functions needed to control a fixed channel plan.
pub struct FixedChannelPlan<R>
where
    R: Region,
{
    channels: [FixedChannel; NUM_OF_CHANNELS],
    mask: [bool; MAX_CHANNELS],
    subband: Option<u8>,
    region: PhantomData<R>,
}

impl<R> Default for FixedChannelPlan<R>
where
    R: Region,
{
    fn default() -> Self {
        let channels = core::array::from_fn(|index| FixedChannel {
            ul_frequency: R::mandatory_frequency(index, true),
            dl_frequency: R::mandatory_frequency(index % NUM_OF_CHANNELS_IN_BLOCK, false),
            ul_data_rate_range: R::mandatory_ul_data_rate_range(index),
        });
        let mut mask = [false; MAX_CHANNELS];
        mask[..NUM_OF_CHANNELS].fill(true);
        Self { channels, mask, subband: None, region: PhantomData }
    }
}

impl<R> FixedChannelPlan<R>
where
    R: Region,
{
    fn subband_mask(subband: u8) -> [bool; MAX_CHANNELS] {
        let block = (subband - 1) as usize;
        let mut mask = [false; MAX_CHANNELS];
        let start = block * NUM_OF_CHANNELS_IN_BLOCK;
        mask[start..start + NUM_OF_CHANNELS_IN_BLOCK].fill(true);
        mask[NUM_OF_125KHZ_CHANNELS + block] = true;
        mask
    }
}

impl<R> ChannelPlan<R> for FixedChannelPlan<R>
where
    R: Region,
{
    type Channel = FixedChannel;

    fn candidates(&self, _frame: Frame, data_rate: DR) -> Vec<(usize, FixedChannel), MAX_CHANNELS> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(index, channel)| {
                self.mask[*index] && data_rate.in_range(channel.ul_data_rate_range)
            })
            .map(|(index, channel)| (index, *channel))
            .collect()
    }

    fn handle_new_channel_req(
        &mut self,
        _channel_index: u8,
        _frequency: u32,
        _data_rate_range: DataRateRange,
    ) -> Result<(), Error> {
        Err(Error::CommandNotImplementedForRegion)
    }

    fn check_uplink_frequency_exists(&self, index: usize) -> bool {
        index < NUM_OF_CHANNELS
    }

    fn handle_channel_mask(
        &self,
        new_mask: &mut [bool; MAX_CHANNELS],
        channel_mask: ChannelMask<2>,
        channel_mask_ctrl: u8,
    ) -> Result<(), Error> {
        match channel_mask_ctrl {
            0..=4 => {
                for i in 0..16 {
                    new_mask[i + (channel_mask_ctrl as usize * 16)] =
                        channel_mask.is_enabled(i).unwrap_or(false);
                }
            }
            5 => {
                // bits 0..8 switch whole blocks of 8 channels on or off
                for block in 0..NUM_OF_CHANNELS_IN_BLOCK {
                    let enabled = channel_mask.is_enabled(block).unwrap_or(false);
                    let start = block * NUM_OF_CHANNELS_IN_BLOCK;
                    new_mask[start..start + NUM_OF_CHANNELS_IN_BLOCK].fill(enabled);
                    new_mask[NUM_OF_125KHZ_CHANNELS + block] = enabled;
                }
            }
            6 | 7 => {
                new_mask[..NUM_OF_125KHZ_CHANNELS].fill(channel_mask_ctrl == 6);
                for i in 0..NUM_OF_CHANNELS_IN_BLOCK {
                    new_mask[NUM_OF_125KHZ_CHANNELS + i] =
                        channel_mask.is_enabled(i).unwrap_or(false);
                }
            }
            _ => return Err(Error::InvalidChannelMaskCtrl),
        }
        if new_mask[..NUM_OF_CHANNELS].iter().any(|enabled| *enabled) {
            Ok(())
        } else {
            Err(Error::NoValidChannelFound)
        }
    }

    fn get_channel_mask(&self) -> [bool; MAX_CHANNELS] {
        self.mask
    }

    fn set_channel_mask(&mut self, mask: [bool; MAX_CHANNELS]) -> Result<(), Error> {
        self.mask = mask;
        Ok(())
    }

    fn handle_dl_channel_req(&mut self, _channel_index: u8, _frequency: u32) -> Result<(), Error> {
        Err(Error::CommandNotImplementedForRegion)
    }

    fn handle_cf_list(&mut self, cf_list: CfList<'_>) -> Result<(), Error> {
        if let CfList::FixedChannel(mask) = cf_list {
            for (index, enabled) in self.mask.iter_mut().enumerate().take(NUM_OF_CHANNELS) {
                *enabled = mask.is_enabled(index).unwrap_or(false);
            }
            Ok(())
        } else {
            Err(Error::InvalidCfListType)
        }
    }

    fn reactivate_channels(&mut self) {
        self.mask = match self.subband {
            Some(subband) => Self::subband_mask(subband),
            None => {
                let mut mask = [false; MAX_CHANNELS];
                mask[..NUM_OF_CHANNELS].fill(true);
                mask
            }
        };
    }

    fn set_subband(&mut self, subband: u8) -> Result<(), Error> {
        if !(1..=8).contains(&subband) {
            return Err(Error::InvalidSubband(subband));
        }
        self.subband = Some(subband);
        self.mask = Self::subband_mask(subband);
        Ok(())
    }
}

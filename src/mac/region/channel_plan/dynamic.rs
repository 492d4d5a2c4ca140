//! Dynamic channel plan processing (EU868 style: a few default channels plus up to
//! 16 network-defined ones).

use core::marker::PhantomData;

use heapless::Vec;

use encoding::maccommands::{ChannelMask, DataRateRange};
use encoding::parser::CfList;
use crate::mac::region::{Error, Region};
use crate::mac::types::*;

use super::{Channel, ChannelPlan, MAX_CHANNELS};

const NUM_CHANNELS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DynamicChannel {
    pub(crate) frequency: u32,
    pub(crate) dl_frequency: Option<u32>,
    pub(crate) data_rate_range: (DR, DR),
}

impl Channel for DynamicChannel {
    fn get_ul_frequency(&self) -> u32 {
        self.frequency
    }

    fn get_dl_frequency(&self) -> u32 {
        self.dl_frequency.unwrap_or(self.frequency)
    }

    fn get_ul_data_rate_range(&self) -> (DR, DR) {
        self.data_rate_range
    }
}

pub struct DynamicChannelPlan<R>
where
    R: Region,
{
    channels: [Option<DynamicChannel>; NUM_CHANNELS],
    mask: [bool; MAX_CHANNELS],
    region: PhantomData<R>,
}

impl<R> Default for DynamicChannelPlan<R>
where
    R: Region,
{
    fn default() -> Self {
        let mut channels = [None; NUM_CHANNELS];
        let mut mask = [false; MAX_CHANNELS];
        for (index, channel) in channels.iter_mut().enumerate().take(R::default_channels()) {
            *channel = Some(DynamicChannel {
                frequency: R::mandatory_frequency(index, true),
                dl_frequency: None,
                data_rate_range: R::mandatory_ul_data_rate_range(index),
            });
            mask[index] = true;
        }
        Self { channels, mask, region: PhantomData }
    }
}

impl<R> ChannelPlan<R> for DynamicChannelPlan<R>
where
    R: Region,
{
    type Channel = DynamicChannel;

    fn candidates(&self, frame: Frame, data_rate: DR) -> Vec<(usize, DynamicChannel), MAX_CHANNELS> {
        let usable = match frame {
            Frame::Join => R::default_channels(),
            Frame::Data => NUM_CHANNELS,
        };
        self.channels
            .iter()
            .enumerate()
            .take(usable)
            .filter_map(|(index, channel)| match channel {
                Some(ch) if self.mask[index] && data_rate.in_range(ch.data_rate_range) => {
                    Some((index, *ch))
                }
                _ => None,
            })
            .collect()
    }

    fn handle_new_channel_req(
        &mut self,
        channel_index: u8,
        frequency: u32,
        data_rate_range: DataRateRange,
    ) -> Result<(), Error> {
        let index = channel_index as usize;
        if index < R::default_channels() || index >= NUM_CHANNELS {
            return Err(Error::InvalidChannelIndex);
        }
        let range = (
            DR::try_from(data_rate_range.min_data_rate())
                .map_err(|_| Error::InvalidChannelIndex)?,
            DR::try_from(data_rate_range.max_data_rate())
                .map_err(|_| Error::InvalidChannelIndex)?,
        );
        if frequency == 0 {
            self.channels[index] = None;
            self.mask[index] = false;
        } else {
            self.channels[index] =
                Some(DynamicChannel { frequency, dl_frequency: None, data_rate_range: range });
            self.mask[index] = true;
        }
        Ok(())
    }

    fn check_uplink_frequency_exists(&self, index: usize) -> bool {
        index < NUM_CHANNELS && self.channels[index].is_some()
    }

    fn handle_channel_mask(
        &self,
        new_mask: &mut [bool; MAX_CHANNELS],
        channel_mask: ChannelMask<2>,
        channel_mask_ctrl: u8,
    ) -> Result<(), Error> {
        match channel_mask_ctrl {
            0 => {
                for (index, enabled) in new_mask.iter_mut().enumerate().take(NUM_CHANNELS) {
                    let requested = channel_mask.is_enabled(index).unwrap_or(false);
                    if requested && self.channels[index].is_none() {
                        return Err(Error::InvalidChannelIndex);
                    }
                    *enabled = requested;
                }
                if new_mask.iter().any(|enabled| *enabled) {
                    Ok(())
                } else {
                    Err(Error::NoValidChannelFound)
                }
            }
            6 => {
                for (index, enabled) in new_mask.iter_mut().enumerate().take(NUM_CHANNELS) {
                    *enabled = self.channels[index].is_some();
                }
                Ok(())
            }
            _ => Err(Error::InvalidChannelMaskCtrl),
        }
    }

    fn get_channel_mask(&self) -> [bool; MAX_CHANNELS] {
        self.mask
    }

    fn set_channel_mask(&mut self, mask: [bool; MAX_CHANNELS]) -> Result<(), Error> {
        self.mask = mask;
        Ok(())
    }

    fn handle_dl_channel_req(&mut self, channel_index: u8, frequency: u32) -> Result<(), Error> {
        match self.channels.get_mut(channel_index as usize) {
            Some(Some(channel)) => {
                channel.dl_frequency = Some(frequency);
                Ok(())
            }
            _ => Err(Error::InvalidChannelIndex),
        }
    }

    fn handle_cf_list(&mut self, cf_list: CfList<'_>) -> Result<(), Error> {
        if let CfList::DynamicChannel(frequencies) = cf_list {
            for (index, frequency) in frequencies.iter().enumerate() {
                let index = R::default_channels() + index;
                let frequency = frequency.value();
                if frequency == 0 || index >= NUM_CHANNELS {
                    continue;
                }
                self.channels[index] = Some(DynamicChannel {
                    frequency,
                    dl_frequency: None,
                    data_rate_range: R::ul_data_rate_range(),
                });
                self.mask[index] = true;
            }
            Ok(())
        } else {
            Err(Error::InvalidCfListType)
        }
    }

    fn reactivate_channels(&mut self) {
        for index in 0..NUM_CHANNELS {
            self.mask[index] = self.channels[index].is_some();
        }
    }
}

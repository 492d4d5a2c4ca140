//! Transmit/receive sequencing shared by the join procedure and class A uplinks.

pub mod class_a;
pub mod join;

use futures::{future::select, future::Either, pin_mut};
use heapless::Vec;

use super::region::channel_plan::{Channel, ChannelPlan, MAX_CHANNELS};
use super::region::Region;
use super::types::{Frame, SessionState, Window, DR};
use super::{Error, Mac};
use crate::device::radio::types::{RfConfig, RfSettings, RxEvent, RxQuality, TxConfig};
use crate::device::radio::Radio;
use crate::device::radio_buffer::RadioBuffer;
use crate::device::rng::Rng;
use crate::device::timer::Timer;
use crate::device::Device;

impl<R, C> Mac<R, C>
where
    R: Region,
    C: ChannelPlan<R> + Default,
{
    /// Pick the channel that may be used first, reserve its airtime and wait until the
    /// duty cycle allows sending `len` bytes on it.
    pub(crate) async fn acquire_channel<D: Device>(
        &mut self,
        device: &mut D,
        frame: Frame,
        data_rate: DR,
        len: usize,
    ) -> Result<(C::Channel, TxConfig), crate::Error<D>> {
        let now = device.timer().now_ms();
        let mut earliest = u64::MAX;
        let mut best: Vec<(C::Channel, TxConfig, Option<usize>), MAX_CHANNELS> = Vec::new();
        for (_, channel) in self.channel_plan.candidates(frame, data_rate) {
            let tx_config = self.create_tx_config::<D>(frame, &channel, data_rate)?;
            let band = R::sub_band_of(channel.get_ul_frequency());
            let at = self.duty_cycle.earliest_send_time(
                band,
                tx_config.rf.time_on_air_ms(len),
                now,
            )?;
            if at < earliest {
                earliest = at;
                best.clear();
            }
            if at == earliest {
                // capacity equals the candidate count
                let _ = best.push((channel, tx_config, band));
            }
        }
        if best.is_empty() {
            return Err(Error::NoValidChannelFound.into());
        }
        let pick = device
            .rng()
            .below(best.len() as u32)
            .map_err(crate::device::Error::Rng)? as usize;
        let (channel, tx_config, band) = best[pick];

        let at = self.duty_cycle.reserve(band, tx_config.rf.time_on_air_ms(len), now)?;
        if at > now {
            info!("duty cycle: deferring {:?} uplink by {} ms", frame, at - now);
        }
        self.status.set_state(SessionState::AwaitingDutyWindow);
        device.timer().at(at).map_err(crate::device::Error::Timer)?.await;
        Ok((channel, tx_config))
    }

    /// Send the content of `radio_buffer` and return the instant the transmission ended.
    pub(crate) async fn transmit<D: Device>(
        &mut self,
        device: &mut D,
        radio_buffer: &RadioBuffer,
        tx_config: TxConfig,
    ) -> Result<u64, crate::Error<D>> {
        self.status.update(|status| {
            status.state = SessionState::Transmitting;
            status.tx = Some(RfSettings::from(tx_config.rf));
        });
        trace!("tx {:?}", tx_config);
        device
            .radio()
            .tx(tx_config, radio_buffer.as_ref())
            .await
            .map_err(crate::device::Error::Radio)?;
        Ok(device.timer().now_ms())
    }

    /// Listen in `window` after a transmission that ended at `tx_end`. A received frame
    /// is left in `radio_buffer`.
    pub(crate) async fn receive<D: Device>(
        &mut self,
        device: &mut D,
        radio_buffer: &mut RadioBuffer,
        frame: Frame,
        window: Window,
        tx_end: u64,
        rf_config: RfConfig,
    ) -> Result<Option<RxQuality>, crate::Error<D>> {
        let windows = self.get_rx_windows(frame);
        let open_at = tx_end + windows.get_open(&window) as u64;
        let close_at = tx_end + windows.get_close(&window) as u64;
        self.status.update(|status| match window {
            Window::_1 => {
                status.state = SessionState::Rx1Listening;
                status.rx1 = Some(RfSettings::from(rf_config));
            }
            Window::_2 => {
                status.state = SessionState::Rx2Listening;
                status.rx2 = Some(RfSettings::from(rf_config));
            }
        });

        let open_fut = device.timer().at(open_at).map_err(crate::device::Error::Timer)?;
        let close_fut = device.timer().at(close_at).map_err(crate::device::Error::Timer)?;
        open_fut.await;

        radio_buffer.clear();
        let event = {
            let rx_fut = device.radio().rx(rf_config, close_at, radio_buffer.as_raw_slice());
            pin_mut!(rx_fut);
            pin_mut!(close_fut);
            match select(rx_fut, close_fut).await {
                Either::Left((result, _)) => result,
                Either::Right(_) => Ok(RxEvent::Timeout),
            }
        };
        match event {
            Ok(RxEvent::Received(len, quality)) => {
                radio_buffer.set_len(len)?;
                debug!("{:?} frame of {} bytes in RX{}", frame, len, window as u8 + 1);
                Ok(Some(quality))
            }
            Ok(RxEvent::Timeout) => Ok(None),
            // a failed window is treated like an empty one
            Err(e) => {
                warn!("rx error in RX{}: {:?}", window as u8 + 1, e);
                Ok(None)
            }
        }
    }

    /// Wait `delay_ms` from now.
    pub(crate) async fn delay<D: Device>(
        device: &mut D,
        delay_ms: u32,
    ) -> Result<(), crate::Error<D>> {
        let at = device.timer().now_ms() + delay_ms as u64;
        device.timer().at(at).map_err(crate::device::Error::Timer)?.await;
        Ok(())
    }
}

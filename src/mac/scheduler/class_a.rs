//! Class A uplink: transmit, then listen in RX1 and RX2.

use core::ops::Range;

use heapless::Vec;

use super::super::region::channel_plan::ChannelPlan;
use super::super::region::Region;
use super::super::types::{Frame, SessionState, Window};
use super::super::{is_sticky, Error, Mac};
use crate::device::radio::types::RxQuality;
use crate::device::radio::Radio;
use crate::device::radio_buffer::{RadioBuffer, MAX_PHY_PAYLOAD};
use crate::device::rng::Rng;
use crate::device::Device;
use encoding::creator::DataPayloadCreator;
use encoding::maccommands::SerializableMacCommand;
use encoding::parser::{parse, DataHeader, DataPayload, FCtrl, FRMPayload, PhyPayload};

const MAX_FOPTS_LEN: usize = 15;

/// Largest forward jump of the downlink counter accepted without a rejoin.
const MAX_FCNT_GAP: u32 = 16_384;

/// Delay before a retransmission is `RETRY_DELAY_MS` plus up to `RETRY_JITTER_MS`.
const RETRY_DELAY_MS: u32 = 1_000;
const RETRY_JITTER_MS: u32 = 2_000;

/// Accepted downlink. The payload range points into the radio buffer the frame was
/// received in and stays valid until that buffer is reused.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Downlink {
    /// The network acknowledged the uplink.
    pub ack: bool,
    /// The network has more data pending.
    pub f_pending: bool,
    /// Application port and decrypted payload.
    pub payload: Option<(u8, Range<usize>)>,
}

impl<R, C> Mac<R, C>
where
    R: Region,
    C: ChannelPlan<R> + Default,
{
    /// Send `data` on `fport` and listen for the answer.
    ///
    /// An unconfirmed uplink is repeated `NbTrans` times unless a downlink arrives. A
    /// confirmed uplink is retransmitted until the network acknowledges it, and fails with
    /// [`Error::NoAck`] otherwise. Every transmission carries a fresh counter.
    pub async fn send<D: Device>(
        &mut self,
        device: &mut D,
        radio_buffer: &mut RadioBuffer,
        data: &[u8],
        fport: u8,
        confirmed: bool,
    ) -> Result<Option<Downlink>, crate::Error<D>> {
        match &self.session {
            None => return Err(Error::NetworkNotJoined.into()),
            Some(session) if session.is_expired() => return Err(Error::SessionExpired.into()),
            Some(_) => (),
        }
        if !(1..=223).contains(&fport) {
            return Err(Error::InvalidFPort(fport).into());
        }
        let max = R::max_app_payload(self.tx_data_rate());
        if data.len() > max {
            return Err(Error::PayloadTooLarge { len: data.len(), max }.into());
        }

        let attempts = if confirmed {
            self.configuration.max_confirmed_transmissions
        } else {
            self.configuration.number_of_transmissions
        }
        .max(1);
        let result = self.send_attempts(device, radio_buffer, data, fport, confirmed, attempts).await;

        self.publish_counters();
        self.status.set_state(SessionState::Idle);
        if let Err(e) = device.radio().sleep(false).await {
            error!("radio sleep failed with error {:?}", e);
        }
        result
    }

    async fn send_attempts<D: Device>(
        &mut self,
        device: &mut D,
        radio_buffer: &mut RadioBuffer,
        data: &[u8],
        fport: u8,
        confirmed: bool,
        attempts: u8,
    ) -> Result<Option<Downlink>, crate::Error<D>> {
        for attempt in 0..attempts {
            if attempt > 0 {
                let jitter =
                    device.rng().below(RETRY_JITTER_MS).map_err(crate::device::Error::Rng)?;
                Self::delay(device, RETRY_DELAY_MS + jitter).await?;
            }
            let frame = self.build_uplink(data, fport, confirmed)?;
            self.publish_counters();

            let data_rate = self.tx_data_rate();
            let (channel, tx_config) =
                self.acquire_channel(device, Frame::Data, data_rate, frame.len()).await?;
            radio_buffer.clear();
            radio_buffer.extend_from_slice(&frame)?;
            debug!("uplink {} of {}, {} bytes", attempt + 1, attempts, frame.len());
            let tx_end = self.transmit(device, radio_buffer, tx_config).await?;
            self.ack_next = false;
            self.uplink_cmds.retain(is_sticky);

            for window in [Window::_1, Window::_2] {
                let rf_config =
                    self.create_rf_config::<D>(Frame::Data, window, data_rate, &channel)?;
                let quality = match self
                    .receive(device, radio_buffer, Frame::Data, window, tx_end, rf_config)
                    .await?
                {
                    Some(quality) => quality,
                    None => continue,
                };
                if let Some(downlink) = self.accept_downlink(device, radio_buffer, quality) {
                    if !confirmed || downlink.ack || downlink.payload.is_some() {
                        return Ok(Some(downlink));
                    }
                    // RX2 is skipped once RX1 delivered a frame
                    break;
                }
            }
        }
        if confirmed {
            warn!("confirmed uplink not acknowledged after {} attempts", attempts);
            return Err(Error::NoAck.into());
        }
        Ok(None)
    }

    /// Encode the next uplink, consuming one uplink counter value.
    fn build_uplink(
        &mut self,
        data: &[u8],
        fport: u8,
        confirmed: bool,
    ) -> Result<Vec<u8, MAX_PHY_PAYLOAD>, Error> {
        let adr_enabled = self.configuration.adr_enabled;
        let adr_ack_req = adr_enabled && self.adr_ack_cnt >= R::default_adr_ack_limit() as u32;
        let ack = self.ack_next;
        let session = self.session.as_mut().ok_or(Error::NetworkNotJoined)?;
        if session.is_expired() {
            return Err(Error::SessionExpired);
        }
        let fcnt = session.counters.up;
        // the counter moves on before the radio is touched and is never rolled back
        session.counters.up += 1;

        let mut fctrl = FCtrl(0x0, true);
        if adr_enabled {
            fctrl.set_adr();
        }
        if adr_ack_req {
            fctrl.set_adr_ack_req();
        }
        if ack {
            fctrl.set_ack();
        }
        let mut cmds: Vec<&dyn SerializableMacCommand, 15> = Vec::new();
        let mut fopts_len = 0;
        for cmd in self.uplink_cmds.iter() {
            if fopts_len + cmd.len() > MAX_FOPTS_LEN {
                warn!("FOpts full, command {} dropped", cmd.cid());
                break;
            }
            fopts_len += cmd.len();
            let _ = cmds.push(cmd);
        }
        let mut creator = DataPayloadCreator::new();
        creator
            .set_confirmed(confirmed)
            .set_uplink(true)
            .set_fctrl(&fctrl)
            .set_dev_addr(session.dev_addr)
            .set_fcnt(fcnt)
            .set_f_port(fport);
        let built = creator
            .build(data, &cmds, &session.nwk_skey, &session.app_skey)
            .map_err(|_| Error::PayloadTooLarge { len: data.len(), max: MAX_PHY_PAYLOAD })?;
        let frame = Vec::from_slice(built)
            .map_err(|_| Error::PayloadTooLarge { len: data.len(), max: MAX_PHY_PAYLOAD })?;
        drop(cmds);
        trace!("uplink fcnt {} adr_ack_cnt {}", fcnt, self.adr_ack_cnt);

        self.adr_ack_cnt = self.adr_ack_cnt.saturating_add(1);
        if adr_enabled {
            self.adr_backoff();
        }
        Ok(frame)
    }

    /// Without downlinks the device first raises its power, then lowers the data rate
    /// step by step every `ADR_ACK_DELAY` uplinks, and finally re-enables all channels.
    fn adr_backoff(&mut self) {
        let limit = R::default_adr_ack_limit() as u32;
        let delay = (R::default_adr_ack_delay() as u32).max(1);
        if self.adr_ack_cnt < limit + delay || (self.adr_ack_cnt - limit) % delay != 0 {
            return;
        }
        if self.configuration.tx_power.is_some() {
            self.configuration.tx_power = None;
            info!("ADR backoff: max tx power");
            return;
        }
        match R::next_adr_data_rate(self.tx_data_rate()) {
            Some(dr) => {
                info!("ADR backoff: data rate {:?}", dr);
                self.configuration.tx_data_rate = Some(dr);
            }
            None => self.channel_plan.reactivate_channels(),
        }
    }

    /// Authenticate the frame in `radio_buffer` and apply it to the session. Frames for
    /// another device, with a bad MIC or a stale counter are dropped.
    pub(crate) fn accept_downlink<D: Device>(
        &mut self,
        device: &mut D,
        radio_buffer: &mut RadioBuffer,
        quality: RxQuality,
    ) -> Option<Downlink> {
        let len = radio_buffer.as_ref().len();
        let session = self.session.as_mut()?;
        let encrypted = match parse(radio_buffer.as_mut()) {
            Ok(PhyPayload::Data(DataPayload::Encrypted(encrypted))) => encrypted,
            Ok(_) => {
                warn!("unexpected frame type dropped");
                return None;
            }
            Err(e) => {
                warn!("malformed downlink dropped: {:?}", e);
                return None;
            }
        };
        if encrypted.is_uplink() {
            warn!("uplink frame dropped");
            return None;
        }
        let (fcnt, fctrl, fopts) = {
            let fhdr = encrypted.fhdr();
            if fhdr.dev_addr() != session.dev_addr {
                debug!("downlink for {:?} ignored", fhdr.dev_addr());
                return None;
            }
            let fopts: Vec<u8, MAX_FOPTS_LEN> = Vec::from_slice(fhdr.data()).unwrap_or_default();
            (expand_fcnt(session.counters.down, fhdr.fcnt()), fhdr.fctrl(), fopts)
        };
        if !encrypted.validate_mic(session.nwk_skey.inner(), fcnt) {
            warn!("downlink with invalid MIC dropped");
            return None;
        }
        if let Some(last) = session.counters.down {
            if fcnt <= last {
                warn!("replayed downlink dropped, fcnt {} last {}", fcnt, last);
                return None;
            }
            if fcnt - last > MAX_FCNT_GAP {
                warn!("downlink fcnt {} too far ahead of {}", fcnt, last);
                return None;
            }
        }

        session.counters.down = Some(fcnt);
        let confirmed = encrypted.is_confirmed();
        let fport = encrypted.f_port();
        // FRMPayload sits between the FPort and the MIC
        let frm_start = 1 + encrypted.fhdr_length() + 1;
        let decrypted = match encrypted.decrypt(
            Some(session.nwk_skey.inner()),
            Some(session.app_skey.inner()),
            fcnt,
        ) {
            Ok(decrypted) => decrypted,
            Err(e) => {
                warn!("downlink not decrypted: {:?}", e);
                return None;
            }
        };
        self.adr_ack_cnt = 0;
        self.uplink_cmds.clear();
        self.ack_next = confirmed;
        self.status.update(|status| status.rssi = Some(quality.rssi()));
        debug!("downlink fcnt {} accepted, rssi {}", fcnt, quality.rssi());

        self.handle_downlink_macs(device, quality, &fopts);
        let payload = match decrypted.frm_payload() {
            FRMPayload::Data(_) => fport.map(|port| (port, frm_start..len - 4)),
            FRMPayload::MACCommands(cmds) => {
                self.handle_downlink_macs(device, quality, cmds.data());
                None
            }
            FRMPayload::None => None,
        };
        self.publish_counters();
        Some(Downlink { ack: fctrl.ack(), f_pending: fctrl.f_pending(), payload })
    }
}

/// Rebuild the 32 bit downlink counter from its 16 transmitted bits.
fn expand_fcnt(last: Option<u32>, fcnt: u16) -> u32 {
    match last {
        None => fcnt as u32,
        Some(last) => {
            let full = (last & 0xFFFF_0000) | fcnt as u32;
            if full < last {
                full.wrapping_add(0x1_0000)
            } else {
                full
            }
        }
    }
}

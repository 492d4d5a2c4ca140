//! LoRaWAN 1.0.x class A MAC: session state, MAC command processing and the timing
//! of the receive windows. The transmit/receive sequences live in [`scheduler`].

use core::cmp::min;

pub mod duty_cycle;
pub mod region;
pub mod scheduler;
pub mod types;

use self::duty_cycle::DutyCycle;
use self::region::{
    channel_plan::{Channel, ChannelPlan},
    Region,
};
use crate::device::{
    non_volatile_store::{NonVolatileStore, StoreKey},
    radio::types::{RfConfig, RxQuality, TxConfig},
    Device,
};
use encoding::maccommandcreator::{
    DevStatusAnsCreator, DlChannelAnsCreator, DutyCycleAnsCreator, LinkADRAnsCreator,
    NewChannelAnsCreator, RXParamSetupAnsCreator, RXTimingSetupAnsCreator,
    UplinkMacCommandCreator,
};
use encoding::maccommands::{
    DLSettings, DevStatusReqPayload, DlChannelReqPayload, DutyCycleReqPayload,
    DownlinkMacCommand, LinkADRReqPayload, LinkCheckAnsPayload, MacCommandIterator,
    NewChannelReqPayload, RXParamSetupReqPayload, RXTimingSetupReqPayload,
    TXParamSetupReqPayload,
};
use heapless::Vec;
use types::*;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Error {
    NetworkNotJoined,
    SessionExpired,
    InvalidFPort(u8),
    PayloadTooLarge { len: usize, max: usize },
    /// No valid join accept after the last join attempt.
    NoResponse,
    /// Confirmed uplink never acknowledged.
    NoAck,
    NoValidChannelFound,
    DutyCycle(duty_cycle::Error),
}

/// Answers repeated on every uplink until a downlink is received.
pub(crate) fn is_sticky(cmd: &UplinkMacCommandCreator) -> bool {
    matches!(
        cmd,
        UplinkMacCommandCreator::RXParamSetupAns(_)
            | UplinkMacCommandCreator::RXTimingSetupAns(_)
            | UplinkMacCommandCreator::DlChannelAns(_)
            | UplinkMacCommandCreator::TXParamSetupAns(_)
    )
}

fn downlink_payload_len(cid: u8) -> Option<usize> {
    let len = match cid {
        c if c == LinkCheckAnsPayload::cid() => LinkCheckAnsPayload::len(),
        c if c == LinkADRReqPayload::cid() => LinkADRReqPayload::len(),
        c if c == DutyCycleReqPayload::cid() => DutyCycleReqPayload::len(),
        c if c == RXParamSetupReqPayload::cid() => RXParamSetupReqPayload::len(),
        c if c == DevStatusReqPayload::cid() => DevStatusReqPayload::len(),
        c if c == NewChannelReqPayload::cid() => NewChannelReqPayload::len(),
        c if c == RXTimingSetupReqPayload::cid() => RXTimingSetupReqPayload::len(),
        c if c == TXParamSetupReqPayload::cid() => TXParamSetupReqPayload::len(),
        c if c == DlChannelReqPayload::cid() => DlChannelReqPayload::len(),
        // DeviceTimeAns
        0x0D => 5,
        _ => return None,
    };
    Some(len)
}

/// Longest prefix of `cmds` made of known and complete downlink MAC commands.
pub(crate) fn complete_mac_commands(cmds: &[u8]) -> &[u8] {
    let mut end = 0;
    while let Some(len) = cmds.get(end).and_then(|cid| downlink_payload_len(*cid)) {
        if end + 1 + len > cmds.len() {
            warn!("truncated MAC command {} dropped", cmds[end]);
            break;
        }
        end += 1 + len;
    }
    &cmds[..end]
}

impl<D> From<Error> for super::Error<D>
where
    D: Device,
{
    fn from(value: Error) -> Self {
        Self::Mac(value)
    }
}

impl<D> From<duty_cycle::Error> for super::Error<D>
where
    D: Device,
{
    fn from(value: duty_cycle::Error) -> Self {
        Self::Mac(Error::DutyCycle(value))
    }
}

/// Class A MAC for region `R` using channel plan `C`.
pub struct Mac<R, C>
where
    R: Region,
    C: ChannelPlan<R> + Default,
{
    pub(crate) session: Option<Session>,
    pub(crate) channel_plan: C,
    pub(crate) duty_cycle: DutyCycle<R>,
    pub(crate) uplink_cmds: Vec<UplinkMacCommandCreator, 15>,
    pub(crate) ack_next: bool,
    pub(crate) adr_ack_cnt: u32,
    pub(crate) configuration: Configuration,
    pub(crate) dev_nonce: u16,
    pub(crate) last_join_nonce: Option<u32>,
    pub(crate) subband: Option<u8>,
    pub(crate) status: LinkMonitor,
}

impl<R, C> Mac<R, C>
where
    R: Region,
    C: ChannelPlan<R> + Default,
{
    #[allow(missing_docs)]
    pub fn new(configuration: Configuration) -> Self {
        Self {
            session: None,
            channel_plan: Default::default(),
            duty_cycle: Default::default(),
            uplink_cmds: Vec::new(),
            ack_next: false,
            adr_ack_cnt: 0,
            configuration,
            dev_nonce: 0,
            last_join_nonce: None,
            subband: None,
            status: LinkMonitor::default(),
        }
    }

    /// Shared handle on the link status.
    pub fn link_monitor(&self) -> LinkMonitor {
        self.status.clone()
    }

    #[allow(missing_docs)]
    pub fn is_joined(&self) -> bool {
        match &self.session {
            Some(session) => !session.is_expired(),
            None => false,
        }
    }

    #[allow(missing_docs)]
    pub fn adr_enabled(&self) -> bool {
        self.configuration.adr_enabled
    }

    #[allow(missing_docs)]
    pub fn set_adr_enabled(&mut self, enabled: bool) {
        self.configuration.adr_enabled = enabled;
    }

    /// Restrict a fixed channel plan to `subband` (1..=8).
    pub fn set_subband(&mut self, subband: u8) -> Result<(), region::Error> {
        self.channel_plan.set_subband(subband)?;
        self.subband = Some(subband);
        Ok(())
    }

    /// Drop the session and what the network configured for it. DevNonce, the last
    /// JoinNonce and the persisted RX parameters are kept.
    pub fn reset_session(&mut self) {
        self.session = None;
        self.uplink_cmds.clear();
        self.ack_next = false;
        self.adr_ack_cnt = 0;
        self.configuration.reset_network_parameters();
        self.channel_plan = Default::default();
        if let Some(subband) = self.subband {
            if let Err(e) = self.channel_plan.set_subband(subband) {
                warn!("sub-band {} lost on reset: {:?}", subband, e);
            }
        }
        self.status.update(|status| {
            status.state = SessionState::Idle;
            status.join_state = JoinState::Idle;
            status.counters = None;
        });
    }

    /// Restore persisted MAC state (nonces, RX parameters).
    pub fn hydrate<D: Device>(&mut self, device: &mut D) -> Result<(), crate::Error<D>> {
        let storable: Option<Storable> = device
            .non_volatile_store()
            .load(StoreKey::MacState)
            .map_err(crate::device::Error::NonVolatileStore)?;
        if let Some(storable) = storable {
            trace!("hydrate {:?}", storable);
            self.dev_nonce = storable.dev_nonce;
            self.last_join_nonce = storable.join_nonce;
            self.configuration.rx1_data_rate_offset = storable.rx1_data_rate_offset;
            self.configuration.rx_delay = storable.rx_delay;
            self.configuration.rx2_data_rate = storable.rx2_data_rate;
            self.configuration.rx2_frequency = storable.rx2_frequency;
        }
        Ok(())
    }

    fn storable(&self) -> Storable {
        Storable {
            rx1_data_rate_offset: self.configuration.rx1_data_rate_offset,
            rx_delay: self.configuration.rx_delay,
            rx2_data_rate: self.configuration.rx2_data_rate,
            rx2_frequency: self.configuration.rx2_frequency,
            dev_nonce: self.dev_nonce,
            join_nonce: self.last_join_nonce,
        }
    }

    pub(crate) fn persist<D: Device>(&self, device: &mut D) {
        let storable = self.storable();
        if let Err(e) = device.non_volatile_store().save(StoreKey::MacState, &storable) {
            warn!("could not persist MAC state: {:?}", e);
        }
    }

    fn publish_counters(&self) {
        let counters = self.session.as_ref().map(|session| session.counters);
        self.status.update(|status| status.counters = counters);
    }

    fn max_eirp<D: Device>() -> u8 {
        min(R::max_eirp(), D::max_eirp())
    }

    fn tx_power<D: Device>(&self, frame: Frame) -> u8 {
        match frame {
            Frame::Join => Self::max_eirp::<D>(),
            Frame::Data => self.configuration.tx_power.unwrap_or(Self::max_eirp::<D>()),
        }
    }

    pub(crate) fn tx_data_rate(&self) -> DR {
        self.configuration.tx_data_rate.unwrap_or(R::default_data_rate())
    }

    fn rx1_data_rate(&self, tx_dr: DR) -> DR {
        let offset = self.configuration.rx1_data_rate_offset.unwrap_or(0);
        R::get_rx1_dr(tx_dr, offset).unwrap_or(tx_dr)
    }

    fn rx2_data_rate(&self, frame: Frame) -> DR {
        match frame {
            Frame::Join => R::default_rx2_data_rate(),
            Frame::Data => self.configuration.rx2_data_rate.unwrap_or(R::default_rx2_data_rate()),
        }
    }

    fn rx2_frequency(&self, frame: Frame) -> u32 {
        match frame {
            Frame::Join => R::default_rx2_frequency(),
            Frame::Data => self.configuration.rx2_frequency.unwrap_or(R::default_rx2_frequency()),
        }
    }

    /// Window offsets in ms relative to the end of the transmission.
    pub(crate) fn get_rx_windows(&self, frame: Frame) -> RxWindows {
        let (rx1_delay, rx2_delay) = match frame {
            Frame::Join => (R::default_join_accept_delay1(), R::default_join_accept_delay2()),
            Frame::Data => {
                let rx1_delay = self
                    .configuration
                    .rx_delay
                    .map(|delay| delay as u32 * 1000)
                    .unwrap_or(R::default_rx_delay());
                (rx1_delay, rx1_delay + 1000)
            }
        };
        RxWindows {
            rx1_open: rx1_delay - 150,
            rx1_close: rx2_delay - 200,
            rx2_open: rx2_delay - 150,
            rx2_close: rx2_delay + 3000,
        }
    }

    pub(crate) fn create_tx_config<D: Device>(
        &self,
        frame: Frame,
        channel: &C::Channel,
        data_rate: DR,
    ) -> Result<TxConfig, crate::Error<D>> {
        Ok(TxConfig {
            pw: self.tx_power::<D>(frame),
            rf: RfConfig {
                frequency: channel.get_ul_frequency(),
                coding_rate: R::default_coding_rate(),
                data_rate: R::convert_data_rate(data_rate)?,
            },
        })
    }

    pub(crate) fn create_rf_config<D: Device>(
        &self,
        frame: Frame,
        window: Window,
        data_rate: DR,
        channel: &C::Channel,
    ) -> Result<RfConfig, crate::Error<D>> {
        let (frequency, data_rate) = match window {
            Window::_1 => (channel.get_dl_frequency(), self.rx1_data_rate(data_rate)),
            Window::_2 => (self.rx2_frequency(frame), self.rx2_data_rate(frame)),
        };
        Ok(RfConfig {
            frequency,
            coding_rate: R::default_coding_rate(),
            data_rate: R::convert_data_rate(data_rate)?,
        })
    }

    fn validate_data_rate(dr: u8) -> bool {
        match DR::try_from(dr) {
            Ok(dr) => R::convert_data_rate(dr).is_ok(),
            Err(_) => false,
        }
    }

    fn validate_dl_settings(&self, dl_settings: &DLSettings) -> (bool, bool) {
        (
            dl_settings.rx1_dr_offset() <= R::max_rx1_dr_offset(),
            Self::validate_data_rate(dl_settings.rx2_data_rate()),
        )
    }

    pub(crate) fn handle_dl_settings(&mut self, dl_settings: &DLSettings) {
        self.configuration.rx1_data_rate_offset = Some(dl_settings.rx1_dr_offset());
        self.configuration.rx2_data_rate = DR::try_from(dl_settings.rx2_data_rate()).ok();
    }

    fn queue_answer(&mut self, answer: UplinkMacCommandCreator) {
        trace!("answer {:?}", answer);
        if let Err(answer) = self.uplink_cmds.push(answer) {
            warn!("uplink MAC command queue full, dropping {:?}", answer);
        }
    }

    /// Apply the MAC commands in `cmds` (a FOpts field or a port 0 payload) and queue the
    /// answers for the next uplink.
    pub(crate) fn handle_downlink_macs<D: Device>(
        &mut self,
        device: &mut D,
        rx_quality: RxQuality,
        cmds: &[u8],
    ) {
        let mut channel_mask = self.channel_plan.get_channel_mask();
        let mut persist_configuration = false;
        let mut cmd_iter =
            MacCommandIterator::<DownlinkMacCommand>::new(complete_mac_commands(cmds)).peekable();
        while let Some(cmd) = cmd_iter.next() {
            trace!("handling command {:?}", cmd);
            let res: Option<UplinkMacCommandCreator> = match cmd {
                DownlinkMacCommand::LinkCheckAns(payload) => {
                    device.handle_link_check(payload.gateway_count(), payload.margin());
                    None
                }
                DownlinkMacCommand::LinkADRReq(payload) => {
                    let mut ans = LinkADRAnsCreator::new();
                    let tx_power_res = R::modify_dbm(
                        payload.tx_power(),
                        self.configuration.tx_power,
                        Self::max_eirp::<D>(),
                    );
                    let data_rate_res: Result<Option<DR>, ()> = if payload.data_rate() == 0xF {
                        Ok(self.configuration.tx_data_rate)
                    } else if Self::validate_data_rate(payload.data_rate())
                        && DR::try_from(payload.data_rate())
                            .map(|dr| dr.in_range(R::ul_data_rate_range()))
                            .unwrap_or(false)
                    {
                        DR::try_from(payload.data_rate()).map(Some)
                    } else {
                        Err(())
                    };
                    let channel_mask_res = self.channel_plan.handle_channel_mask(
                        &mut channel_mask,
                        payload.channel_mask(),
                        payload.redundancy().channel_mask_control(),
                    );

                    ans.set_tx_power_ack(tx_power_res.is_ok())
                        .set_data_rate_ack(data_rate_res.is_ok())
                        .set_channel_mask_ack(channel_mask_res.is_ok());
                    // a contiguous block of LinkADRReq is applied as a whole by its last element
                    match cmd_iter.peek() {
                        Some(DownlinkMacCommand::LinkADRReq(_)) => (),
                        _ => {
                            if let (Ok(tx_power), Ok(data_rate), Ok(())) =
                                (tx_power_res, data_rate_res, channel_mask_res)
                            {
                                self.configuration.tx_power = tx_power;
                                self.configuration.tx_data_rate = data_rate;
                                self.configuration.number_of_transmissions =
                                    payload.redundancy().number_of_transmissions().max(1);
                                if let Err(e) = self.channel_plan.set_channel_mask(channel_mask) {
                                    warn!("channel mask rejected: {:?}", e);
                                }
                            }
                            channel_mask = self.channel_plan.get_channel_mask();
                        }
                    }
                    Some(UplinkMacCommandCreator::LinkADRAns(ans))
                }
                DownlinkMacCommand::DutyCycleReq(payload) => {
                    let max_duty_cycle = payload.max_duty_cycle_raw();
                    self.configuration.max_duty_cycle = max_duty_cycle;
                    self.duty_cycle.set_max_duty_cycle(max_duty_cycle);
                    Some(UplinkMacCommandCreator::DutyCycleAns(DutyCycleAnsCreator::new()))
                }
                DownlinkMacCommand::RXParamSetupReq(payload) => {
                    let mut ans = RXParamSetupAnsCreator::new();
                    let frequency = payload.frequency().value();
                    let (rx1_data_rate_offset_ack, rx2_data_rate_ack) =
                        self.validate_dl_settings(&payload.dl_settings());
                    let channel_ack = self.channel_plan.validate_frequency(frequency).is_ok();
                    if channel_ack && rx1_data_rate_offset_ack && rx2_data_rate_ack {
                        self.handle_dl_settings(&payload.dl_settings());
                        self.configuration.rx2_frequency = Some(frequency);
                        persist_configuration = true;
                    }
                    ans.set_rx1_data_rate_offset_ack(rx1_data_rate_offset_ack)
                        .set_rx2_data_rate_ack(rx2_data_rate_ack)
                        .set_channel_ack(channel_ack);
                    Some(UplinkMacCommandCreator::RXParamSetupAns(ans))
                }
                DownlinkMacCommand::DevStatusReq(_) => {
                    let mut ans = DevStatusAnsCreator::new();
                    match device.battery_level() {
                        Some(level) => ans.set_battery((level.clamp(0.0, 1.0) * 253.0) as u8 + 1),
                        None => ans.set_battery(255),
                    };
                    if let Err(e) = ans.set_margin(rx_quality.snr().clamp(-32, 31)) {
                        warn!("margin not reported: {:?}", e);
                    }
                    Some(UplinkMacCommandCreator::DevStatusAns(ans))
                }
                DownlinkMacCommand::NewChannelReq(payload) => {
                    let data_rate_range = payload.data_rate_range();
                    let frequency = payload.frequency().value();
                    let data_rate_range_ack =
                        Self::validate_data_rate(data_rate_range.min_data_rate())
                            && Self::validate_data_rate(data_rate_range.max_data_rate())
                            && data_rate_range.min_data_rate() <= data_rate_range.max_data_rate();
                    let mut channel_frequency_ack =
                        frequency == 0 || self.channel_plan.validate_frequency(frequency).is_ok();
                    if data_rate_range_ack && channel_frequency_ack {
                        channel_frequency_ack = self
                            .channel_plan
                            .handle_new_channel_req(
                                payload.channel_index(),
                                frequency,
                                data_rate_range,
                            )
                            .is_ok();
                    }
                    let mut ans = NewChannelAnsCreator::new();
                    ans.set_data_rate_range_ack(data_rate_range_ack)
                        .set_channel_frequency_ack(channel_frequency_ack);
                    Some(UplinkMacCommandCreator::NewChannelAns(ans))
                }
                DownlinkMacCommand::DlChannelReq(payload) => {
                    let mut ans = DlChannelAnsCreator::new();
                    let frequency = payload.frequency().value();
                    let uplink_frequency_exists_ack = self
                        .channel_plan
                        .check_uplink_frequency_exists(payload.channel_index() as usize);
                    let mut channel_frequency_ack =
                        self.channel_plan.validate_frequency(frequency).is_ok();
                    if channel_frequency_ack && uplink_frequency_exists_ack {
                        channel_frequency_ack = self
                            .channel_plan
                            .handle_dl_channel_req(payload.channel_index(), frequency)
                            .is_ok();
                    }
                    ans.set_uplink_frequency_exists_ack(uplink_frequency_exists_ack)
                        .set_channel_frequency_ack(channel_frequency_ack);
                    Some(UplinkMacCommandCreator::DlChannelAns(ans))
                }
                DownlinkMacCommand::RXTimingSetupReq(payload) => {
                    self.configuration.rx_delay = Some(payload.delay().max(1));
                    persist_configuration = true;
                    Some(UplinkMacCommandCreator::RXTimingSetupAns(RXTimingSetupAnsCreator::new()))
                }
                // dwell time limits do not apply to EU868 nor US915
                DownlinkMacCommand::TXParamSetupReq(_) => None,
                DownlinkMacCommand::DeviceTimeAns(_) => None,
            };
            if let Some(uplink_cmd) = res {
                self.queue_answer(uplink_cmd);
            }
        }
        if persist_configuration {
            self.persist(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::non_volatile_store::StoreKey;
    use encoding::keys::{AppSKey, NewSKey};
    use encoding::maccommands::{Frequency, SerializableMacCommand};
    use encoding::parser::{CfList, DevAddr};
    use crate::mac::region::channel_plan::dynamic::DynamicChannelPlan;
    use crate::mac::region::eu868::EU868;
    use crate::test_util::test_device;

    type EuMac = Mac<EU868, DynamicChannelPlan<EU868>>;

    fn joined_mac() -> EuMac {
        let mut mac = EuMac::new(Configuration::default());
        mac.session = Some(Session::new(
            NewSKey::from([1; 16]),
            AppSKey::from([2; 16]),
            DevAddr::from([1, 0, 0, 0]),
        ));
        mac
    }

    #[test]
    fn rx_windows_follow_rx_delay() {
        let mut mac = joined_mac();
        let windows = mac.get_rx_windows(Frame::Data);
        assert_eq!((windows.rx1_open, windows.rx2_open), (850, 1850));
        mac.configuration.rx_delay = Some(3);
        let windows = mac.get_rx_windows(Frame::Data);
        assert_eq!((windows.rx1_open, windows.rx1_close), (2850, 3800));
        let join = mac.get_rx_windows(Frame::Join);
        assert_eq!((join.rx1_open, join.rx2_open, join.rx2_close), (4850, 5850, 9000));
    }

    #[test]
    fn link_adr_block_is_applied_atomically() {
        let (mut device, _) = test_device();
        let mut mac = joined_mac();
        // 867.1 MHz in units of 100 Hz, little endian
        let (first, empty) = ([0x18, 0x4F, 0x84], [0u8; 3]);
        let frequencies = [
            Frequency::from(&first),
            Frequency::from(&empty),
            Frequency::from(&empty),
            Frequency::from(&empty),
            Frequency::from(&empty),
        ];
        mac.channel_plan.handle_cf_list(CfList::DynamicChannel(frequencies)).unwrap();
        // first element disables channel 3, second one fails on an undefined channel
        let cmds = [0x03, 0x32, 0x07, 0x00, 0x01, 0x03, 0x32, 0x0F, 0x01, 0x01];
        mac.handle_downlink_macs(&mut device, RxQuality::new(-80, 5), &cmds);
        assert_eq!(mac.uplink_cmds.len(), 2);
        assert_eq!(mac.configuration.tx_data_rate, None);
        assert!(mac.channel_plan.get_channel_mask()[3]);

        mac.uplink_cmds.clear();
        let cmds = [0x03, 0x32, 0x07, 0x00, 0x02];
        mac.handle_downlink_macs(&mut device, RxQuality::new(-80, 5), &cmds);
        assert_eq!(mac.configuration.tx_data_rate, Some(DR::_3));
        assert_eq!(mac.configuration.tx_power, Some(12));
        assert_eq!(mac.configuration.number_of_transmissions, 2);
        assert!(!mac.channel_plan.get_channel_mask()[3]);
        match &mac.uplink_cmds[0] {
            UplinkMacCommandCreator::LinkADRAns(ans) => assert_eq!(ans.build()[1], 0x07),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rx_param_setup_is_validated_and_sticky() {
        let (mut device, _) = test_device();
        let mut mac = joined_mac();
        // RX1 offset 1, RX2 DR3, 869.525 MHz
        mac.handle_downlink_macs(
            &mut device,
            RxQuality::new(-80, 5),
            &[0x05, 0x13, 0xD2, 0xAD, 0x84],
        );
        assert_eq!(mac.configuration.rx2_data_rate, Some(DR::_3));
        assert_eq!(mac.configuration.rx1_data_rate_offset, Some(1));
        assert!(is_sticky(&mac.uplink_cmds[0]));

        // 100 MHz is outside the band: nothing applied
        mac.handle_downlink_macs(
            &mut device,
            RxQuality::new(-80, 5),
            &[0x05, 0x00, 0x40, 0x42, 0x0F],
        );
        assert_eq!(mac.configuration.rx2_data_rate, Some(DR::_3));
        assert_eq!(mac.configuration.rx2_frequency, Some(869_525_000));
    }

    #[test]
    fn timing_duty_cycle_and_status_requests() {
        let (mut device, _) = test_device();
        let mut mac = joined_mac();
        mac.handle_downlink_macs(
            &mut device,
            RxQuality::new(-100, -7),
            &[0x08, 0x00, 0x04, 0x02, 0x06, 0x09, 0x00],
        );
        assert_eq!(mac.configuration.rx_delay, Some(1));
        assert_eq!(mac.configuration.max_duty_cycle, 2);
        let cids: Vec<u8, 8> = mac.uplink_cmds.iter().map(|cmd| cmd.cid()).collect();
        assert_eq!(cids.as_slice(), &[0x08, 0x04, 0x06]);
    }

    #[test]
    fn rx_parameters_are_persisted_and_survive_session_reset() {
        let (mut device, handle) = test_device();
        let mut mac = joined_mac();
        mac.handle_downlink_macs(
            &mut device,
            RxQuality::new(-80, 5),
            &[0x05, 0x13, 0xD2, 0xAD, 0x84, 0x08, 0x03],
        );
        assert!(handle.store.contains(StoreKey::MacState));

        let mut restarted = EuMac::new(Configuration::default());
        restarted.hydrate(&mut device).unwrap();
        restarted.reset_session();
        assert_eq!(restarted.configuration.rx2_frequency, Some(869_525_000));
        assert_eq!(restarted.configuration.rx2_data_rate, Some(DR::_3));
        assert_eq!(restarted.configuration.rx_delay, Some(3));
        assert_eq!(restarted.get_rx_windows(Frame::Data).rx1_open, 2850);
    }

    #[test]
    fn truncated_command_ends_the_list() {
        let (mut device, _) = test_device();
        let mut mac = joined_mac();
        // DevStatusReq followed by a LinkADRReq cut after its first byte
        mac.handle_downlink_macs(&mut device, RxQuality::new(-80, 5), &[0x06, 0x03, 0x32]);
        assert_eq!(mac.uplink_cmds.len(), 1);
        assert_eq!(mac.uplink_cmds[0].cid(), 0x06);
        assert_eq!(mac.configuration.tx_data_rate, None);
        assert_eq!(complete_mac_commands(&[0x06, 0x03, 0x32]), &[0x06]);
    }
}

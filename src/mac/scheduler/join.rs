//! Over-the-air activation.

use super::super::region::channel_plan::{Channel, ChannelPlan};
use super::super::region::Region;
use super::super::types::{Credentials, Frame, JoinState, Session, SessionState, Window};
use super::super::{Error, Mac};
use crate::device::radio::Radio;
use crate::device::radio_buffer::RadioBuffer;
use crate::device::rng::Rng;
use crate::device::radio::types::RxQuality;
use crate::device::Device;
use encoding::creator::JoinRequestCreator;
use encoding::default_crypto::DefaultFactory;
use encoding::parser::{
    parse, DecryptedJoinAcceptPayload, DevNonce, JoinAcceptPayload, PhyPayload, EUI64,
};

type JoinAccept<'a> = DecryptedJoinAcceptPayload<&'a mut [u8], DefaultFactory>;

/// JoinNonce of an accept, as the little endian 24 bit counter it is on air.
fn join_nonce(accept: &JoinAccept<'_>) -> u32 {
    let nonce = accept.app_nonce();
    let bytes = nonce.as_ref();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])
}

impl<R, C> Mac<R, C>
where
    R: Region,
    C: ChannelPlan<R> + Default,
{
    /// Run the join procedure until a valid JoinAccept is received or the configured
    /// number of attempts is used up. Any previous session is discarded first.
    pub async fn join<D: Device>(
        &mut self,
        device: &mut D,
        radio_buffer: &mut RadioBuffer,
        credentials: &Credentials,
    ) -> Result<(), crate::Error<D>> {
        self.reset_session();
        let result = self.join_attempts(device, radio_buffer, credentials).await;
        if result.is_err() {
            self.status.update(|status| {
                status.state = SessionState::Idle;
                status.join_state = JoinState::Idle;
            });
        }
        if let Err(e) = device.radio().sleep(false).await {
            error!("radio sleep failed with error {:?}", e);
        }
        result
    }

    async fn join_attempts<D: Device>(
        &mut self,
        device: &mut D,
        radio_buffer: &mut RadioBuffer,
        credentials: &Credentials,
    ) -> Result<(), crate::Error<D>> {
        let attempts = self.configuration.max_join_attempts.max(1);
        for attempt in 0..attempts {
            if attempt > 0 {
                let base = self.configuration.join_backoff_ms;
                let backoff = base
                    .checked_shl(attempt as u32 - 1)
                    .unwrap_or(u32::MAX)
                    .min(self.configuration.join_backoff_cap_ms);
                let jitter = device.rng().below(base).map_err(crate::device::Error::Rng)?;
                debug!("join backoff {} ms", backoff + jitter);
                Self::delay(device, backoff.saturating_add(jitter)).await?;
            }

            // a nonce is never reused, even if the request below fails
            self.dev_nonce = self.dev_nonce.wrapping_add(1);
            self.persist(device);
            self.status.set_join_state(JoinState::Requesting);

            let mut creator = JoinRequestCreator::new();
            creator
                .set_app_eui(EUI64::<[u8; 8]>::from(credentials.join_eui))
                .set_dev_eui(EUI64::<[u8; 8]>::from(credentials.dev_eui))
                .set_dev_nonce(DevNonce::from(self.dev_nonce.to_le_bytes()));
            radio_buffer.clear();
            radio_buffer.extend_from_slice(creator.build(&credentials.app_key))?;

            let data_rate = R::join_data_rate(attempt);
            let (channel, tx_config) =
                self.acquire_channel(device, Frame::Join, data_rate, radio_buffer.as_ref().len())
                    .await?;
            info!(
                "join request {} of {} on {} Hz, dev nonce {}",
                attempt + 1,
                attempts,
                channel.get_ul_frequency(),
                self.dev_nonce
            );
            let tx_end = self.transmit(device, radio_buffer, tx_config).await?;
            self.status.set_join_state(JoinState::WaitingAccept);

            for window in [Window::_1, Window::_2] {
                let rf_config = self.create_rf_config::<D>(Frame::Join, window, data_rate, &channel)?;
                let Some(quality) = self
                    .receive(device, radio_buffer, Frame::Join, window, tx_end, rf_config)
                    .await?
                else {
                    continue;
                };
                let accept = match parse(radio_buffer.as_mut()) {
                    Ok(PhyPayload::JoinAccept(JoinAcceptPayload::Encrypted(encrypted))) => {
                        encrypted.decrypt(&credentials.app_key)
                    }
                    Ok(_) => {
                        debug!("not a join accept");
                        continue;
                    }
                    Err(e) => {
                        debug!("undecodable frame: {:?}", e);
                        continue;
                    }
                };
                if !accept.validate_mic(&credentials.app_key) {
                    debug!("join accept with a bad MIC");
                    continue;
                }
                let nonce = join_nonce(&accept);
                match self.last_join_nonce {
                    Some(last) if nonce <= last => {
                        warn!("join accept with stale join nonce {} (last {}), ignored", nonce, last);
                    }
                    _ => {
                        self.accept_join(device, credentials, &accept, quality);
                        return Ok(());
                    }
                }
            }
            self.status.set_state(SessionState::Idle);
        }

        warn!("join failed after {} attempts", attempts);
        self.status.set_join_state(JoinState::Failed);
        Err(Error::NoResponse.into())
    }

    fn accept_join<D: Device>(
        &mut self,
        device: &mut D,
        credentials: &Credentials,
        accept: &JoinAccept<'_>,
        quality: RxQuality,
    ) {
        let dev_nonce = DevNonce::from(self.dev_nonce.to_le_bytes());
        let dev_addr = accept.dev_addr().to_owned();
        self.session = Some(Session::new(
            accept.derive_newskey(&dev_nonce, &credentials.app_key),
            accept.derive_appskey(&dev_nonce, &credentials.app_key),
            dev_addr,
        ));

        let dl_settings = accept.dl_settings();
        let (rx1_dr_offset_ok, rx2_data_rate_ok) = self.validate_dl_settings(&dl_settings);
        if rx1_dr_offset_ok && rx2_data_rate_ok {
            self.handle_dl_settings(&dl_settings);
        } else {
            warn!("join accept carries unusable DL settings {}", dl_settings.raw_value());
        }
        self.configuration.rx_delay = Some(accept.rx_delay().max(1));
        self.channel_plan.reactivate_channels();
        if let Some(cf_list) = accept.c_f_list() {
            if let Err(e) = self.channel_plan.handle_cf_list(cf_list) {
                warn!("CFList ignored: {:?}", e);
            }
        }
        self.last_join_nonce = Some(join_nonce(accept));
        self.persist(device);
        self.publish_counters();
        self.status.update(|status| {
            status.state = SessionState::Idle;
            status.join_state = JoinState::Joined;
            status.rssi = Some(quality.rssi());
        });
        info!("joined as {:?}", dev_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::credentials_store::DeviceIdentity;
    use crate::mac::region::channel_plan::dynamic::DynamicChannelPlan;
    use crate::mac::region::eu868::EU868;
    use crate::mac::types::Configuration;
    use crate::test_util::{network_join_accept, test_device, Reply, TestDevice};
    use encoding::parser::DevAddr;
    use futures::executor::block_on;

    type EuMac = Mac<EU868, DynamicChannelPlan<EU868>>;

    const APP_KEY: [u8; 16] = [3; 16];

    fn single_attempt_mac() -> EuMac {
        EuMac::new(Configuration { max_join_attempts: 1, ..Default::default() })
    }

    fn accept_with_nonce(nonce: u32) -> Vec<u8> {
        let nonce = nonce.to_le_bytes();
        network_join_accept(
            &APP_KEY,
            [nonce[0], nonce[1], nonce[2]],
            [0x13, 0x00, 0x00],
            &DevAddr::from([0xDA, 0x1B, 0x01, 0x26]),
            0,
            1,
            None,
        )
    }

    /// Join once with every request answered in RX1 by `accept`, at -70 dBm.
    fn join_answered_with(mac: &mut EuMac, accept: Vec<u8>) -> Result<(), crate::Error<TestDevice>> {
        let (mut device, handle) = test_device();
        handle.respond(move |_| Reply::Rx1(accept.clone(), -70));
        let credentials = Credentials::from(&DeviceIdentity {
            dev_eui: [1; 8],
            join_eui: [2; 8],
            app_key: APP_KEY,
        });
        let mut radio_buffer: RadioBuffer = RadioBuffer::new();
        block_on(mac.join(&mut device, &mut radio_buffer, &credentials))
    }

    #[test]
    fn older_or_repeated_join_nonce_is_rejected() {
        let mut mac = single_attempt_mac();
        mac.last_join_nonce = Some(5);
        assert!(join_answered_with(&mut mac, accept_with_nonce(4)).is_err());
        assert!(mac.session.is_none());
        assert!(join_answered_with(&mut mac, accept_with_nonce(5)).is_err());
        assert!(mac.session.is_none());
        assert_eq!(mac.last_join_nonce, Some(5));
        assert_eq!(mac.link_monitor().snapshot().join_state, JoinState::Idle);
    }

    #[test]
    fn newer_join_nonce_is_accepted_with_its_rssi() {
        let mut mac = single_attempt_mac();
        mac.last_join_nonce = Some(5);
        join_answered_with(&mut mac, accept_with_nonce(6)).unwrap();
        assert!(mac.session.is_some());
        assert_eq!(mac.last_join_nonce, Some(6));
        let status = mac.link_monitor().snapshot();
        assert_eq!(status.join_state, JoinState::Joined);
        assert_eq!(status.rssi, Some(-70));
    }

    #[test]
    fn join_nonce_compares_all_24_bits() {
        let mut mac = single_attempt_mac();
        mac.last_join_nonce = Some(0x00_FFFF);
        join_answered_with(&mut mac, accept_with_nonce(0x01_0000)).unwrap();
        assert_eq!(mac.last_join_nonce, Some(0x01_0000));
    }

    #[test]
    fn persisted_rx2_frequency_survives_the_join() {
        let mut mac = single_attempt_mac();
        mac.configuration.rx2_frequency = Some(869_525_000);
        join_answered_with(&mut mac, accept_with_nonce(1)).unwrap();
        assert_eq!(mac.configuration.rx2_frequency, Some(869_525_000));
        assert_eq!(mac.configuration.rx_delay, Some(1));
    }
}

//! Simulated device and network used by the unit tests.
//!
//! Time is virtual: a timer future resolves by moving the clock forward to its instant,
//! unless the clock is held, in which case it stays pending until released.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};
use encoding::creator::DataPayloadCreator;
use encoding::keys::{AppKey, AppSKey, NewSKey};
use encoding::maccommands::SerializableMacCommand;
use encoding::parser::{DecryptedJoinAcceptPayload, DevAddr, JoinRequestPayload};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use serde::{de::DeserializeOwned, Serialize};

use crate::device::non_volatile_store::{NonVolatileStore, StoreKey};
use crate::device::radio::types::{RfConfig, RxEvent, RxQuality, TxConfig};
use crate::device::radio::Radio;
use crate::device::rng::Rng;
use crate::device::timer::Timer;
use crate::device::Device;

pub const HARDWARE_ID: [u8; 6] = [0xA0, 0xB1, 0xC2, 0x01, 0x02, 0x03];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TestError {
    Radio,
    Store,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
struct ClockState {
    now: u64,
    held: bool,
    wakers: Vec<Waker>,
}

#[derive(Clone, Default)]
pub struct Clock(Arc<Mutex<ClockState>>);

impl Clock {
    pub fn now(&self) -> u64 {
        lock(&self.0).now
    }

    pub fn advance_to(&self, instant: u64) {
        let mut state = lock(&self.0);
        state.now = state.now.max(instant);
    }

    /// While held, timer futures that are not due yet stay pending.
    pub fn set_held(&self, held: bool) {
        let wakers = {
            let mut state = lock(&self.0);
            state.held = held;
            std::mem::take(&mut state.wakers)
        };
        if !held {
            wakers.into_iter().for_each(Waker::wake);
        }
    }
}

pub struct TestTimer(Clock);

pub struct TestAt {
    clock: Clock,
    instant: u64,
}

impl Future for TestAt {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = lock(&self.clock.0);
        if state.now >= self.instant {
            return Poll::Ready(());
        }
        if state.held {
            state.wakers.push(cx.waker().clone());
            return Poll::Pending;
        }
        state.now = self.instant;
        Poll::Ready(())
    }
}

impl Timer for TestTimer {
    type Error = TestError;
    type AtFuture = TestAt;

    fn now_ms(&mut self) -> u64 {
        self.0.now()
    }

    fn at(&mut self, instant_ms: u64) -> Result<TestAt, TestError> {
        Ok(TestAt { clock: self.0.clone(), instant: instant_ms })
    }
}

/// What the simulated network answers to a transmission.
pub enum Reply {
    Silence,
    Rx1(Vec<u8>, i16),
    Rx2(Vec<u8>, i16),
}

#[derive(Debug, Clone)]
pub struct Transmission {
    pub at: u64,
    pub bytes: Vec<u8>,
    pub config: TxConfig,
}

#[derive(Debug, Clone, Copy)]
pub struct Reception {
    pub at: u64,
    pub config: RfConfig,
}

type Responder = Box<dyn FnMut(&[u8]) -> Reply + Send>;

#[derive(Default)]
struct RadioState {
    responder: Option<Responder>,
    pending: Option<Reply>,
    windows_since_tx: u8,
    transmissions: Vec<Transmission>,
    receptions: Vec<Reception>,
    fail_tx: bool,
    sleeps: usize,
    resets: usize,
}

pub struct TestRadio {
    clock: Clock,
    state: Arc<Mutex<RadioState>>,
}

impl Radio for TestRadio {
    type Error = TestError;

    async fn tx(&mut self, config: TxConfig, buf: &[u8]) -> Result<(), TestError> {
        let mut state = lock(&self.state);
        if state.fail_tx {
            return Err(TestError::Radio);
        }
        let at = self.clock.now();
        state.transmissions.push(Transmission { at, bytes: buf.to_vec(), config });
        let reply = state.responder.as_mut().map(|respond| respond(buf));
        state.pending = reply;
        state.windows_since_tx = 0;
        self.clock.advance_to(at + config.rf.time_on_air_ms(buf.len()) as u64);
        Ok(())
    }

    async fn rx(
        &mut self,
        config: RfConfig,
        deadline_ms: u64,
        rx_buf: &mut [u8],
    ) -> Result<RxEvent, TestError> {
        let mut state = lock(&self.state);
        state.windows_since_tx += 1;
        state.receptions.push(Reception { at: self.clock.now(), config });
        let frame = match (state.windows_since_tx, state.pending.take()) {
            (1, Some(Reply::Rx1(frame, rssi))) | (2, Some(Reply::Rx2(frame, rssi))) => {
                Some((frame, rssi))
            }
            (_, pending) => {
                state.pending = pending;
                None
            }
        };
        match frame {
            Some((frame, rssi)) => {
                rx_buf[..frame.len()].copy_from_slice(&frame);
                Ok(RxEvent::Received(frame.len(), RxQuality::new(rssi, 5)))
            }
            None => {
                self.clock.advance_to(deadline_ms);
                Ok(RxEvent::Timeout)
            }
        }
    }

    async fn sleep(&mut self, _warm_start: bool) -> Result<(), TestError> {
        lock(&self.state).sleeps += 1;
        Ok(())
    }

    async fn reset(&mut self) -> Result<(), TestError> {
        lock(&self.state).resets += 1;
        Ok(())
    }
}

pub struct TestRng(StdRng);

impl Rng for TestRng {
    type Error = TestError;

    fn next_u32(&mut self) -> Result<u32, TestError> {
        Ok(self.0.next_u32())
    }
}

/// In-memory store serializing records with postcard, like a flash backed one would.
#[derive(Clone, Default)]
pub struct TestStore {
    records: Arc<Mutex<HashMap<&'static str, Vec<u8>>>>,
    fail_writes: Arc<Mutex<bool>>,
}

impl TestStore {
    pub fn fail_writes(&mut self, fail: bool) {
        *lock(&self.fail_writes) = fail;
    }

    pub fn contains(&self, key: StoreKey) -> bool {
        lock(&self.records).contains_key(key.name())
    }
}

impl NonVolatileStore for TestStore {
    type Error = TestError;

    fn save<T>(&mut self, key: StoreKey, item: &T) -> Result<(), TestError>
    where
        T: Serialize,
    {
        if *lock(&self.fail_writes) {
            return Err(TestError::Store);
        }
        let bytes = postcard::to_allocvec(item).map_err(|_| TestError::Store)?;
        lock(&self.records).insert(key.name(), bytes);
        Ok(())
    }

    fn load<T>(&mut self, key: StoreKey) -> Result<Option<T>, TestError>
    where
        T: DeserializeOwned,
    {
        Ok(lock(&self.records).get(key.name()).and_then(|bytes| postcard::from_bytes(bytes).ok()))
    }

    fn remove(&mut self, key: StoreKey) -> Result<(), TestError> {
        if *lock(&self.fail_writes) {
            return Err(TestError::Store);
        }
        lock(&self.records).remove(key.name());
        Ok(())
    }
}

pub struct TestDevice {
    timer: TestTimer,
    radio: TestRadio,
    rng: TestRng,
    store: TestStore,
}

impl Device for TestDevice {
    type Timer = TestTimer;
    type Radio = TestRadio;
    type Rng = TestRng;
    type NonVolatileStore = TestStore;

    fn timer(&mut self) -> &mut TestTimer {
        &mut self.timer
    }

    fn radio(&mut self) -> &mut TestRadio {
        &mut self.radio
    }

    fn rng(&mut self) -> &mut TestRng {
        &mut self.rng
    }

    fn non_volatile_store(&mut self) -> &mut TestStore {
        &mut self.store
    }

    fn max_eirp() -> u8 {
        16
    }

    fn hardware_id(&mut self) -> Option<[u8; 6]> {
        Some(HARDWARE_ID)
    }
}

/// Test side view of a [`TestDevice`] that was moved into the code under test.
#[derive(Clone)]
pub struct TestHandle {
    pub clock: Clock,
    pub store: TestStore,
    radio: Arc<Mutex<RadioState>>,
}

impl TestHandle {
    pub fn respond(&self, responder: impl FnMut(&[u8]) -> Reply + Send + 'static) {
        lock(&self.radio).responder = Some(Box::new(responder));
    }

    pub fn transmissions(&self) -> Vec<Transmission> {
        lock(&self.radio).transmissions.clone()
    }

    pub fn receptions(&self) -> Vec<Reception> {
        lock(&self.radio).receptions.clone()
    }

    pub fn fail_tx(&self, fail: bool) {
        lock(&self.radio).fail_tx = fail;
    }

    pub fn sleeps(&self) -> usize {
        lock(&self.radio).sleeps
    }

    pub fn resets(&self) -> usize {
        lock(&self.radio).resets
    }
}

pub fn test_device() -> (TestDevice, TestHandle) {
    let clock = Clock::default();
    // start away from zero so instants computed before the first window are positive
    clock.advance_to(1_000);
    let radio = Arc::new(Mutex::new(RadioState::default()));
    let store = TestStore::default();
    let device = TestDevice {
        timer: TestTimer(clock.clone()),
        radio: TestRadio { clock: clock.clone(), state: radio.clone() },
        rng: TestRng(StdRng::seed_from_u64(7)),
        store: store.clone(),
    };
    (device, TestHandle { clock, store, radio })
}

/// Join accept as a network server would send it: MIC over the plaintext, then the body
/// run through AES decrypt.
pub fn network_join_accept(
    app_key: &[u8; 16],
    app_nonce: [u8; 3],
    net_id: [u8; 3],
    dev_addr: &DevAddr<[u8; 4]>,
    dl_settings: u8,
    rx_delay: u8,
    cf_list: Option<[u8; 16]>,
) -> Vec<u8> {
    let mut frame = vec![0x20];
    frame.extend_from_slice(&app_nonce);
    frame.extend_from_slice(&net_id);
    frame.extend_from_slice(dev_addr.as_ref());
    frame.push(dl_settings);
    frame.push(rx_delay);
    if let Some(cf_list) = cf_list {
        frame.extend_from_slice(&cf_list);
    }
    let mut mac = <Cmac<Aes128> as KeyInit>::new(GenericArray::from_slice(app_key));
    mac.update(&frame);
    let mic = mac.finalize().into_bytes();
    frame.extend_from_slice(&mic[..4]);
    let cipher = Aes128::new(GenericArray::from_slice(app_key));
    for chunk in frame[1..].chunks_exact_mut(16) {
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
    }
    frame
}

/// MAC commands given as raw bytes, CID first.
struct RawMacCommands<'a>(&'a [u8]);

impl SerializableMacCommand for RawMacCommands<'_> {
    fn payload_bytes(&self) -> &[u8] {
        &self.0[1..]
    }

    fn cid(&self) -> u8 {
        self.0[0]
    }

    fn payload_len(&self) -> usize {
        self.0.len() - 1
    }
}

/// Minimal network server: answers join requests and builds downlinks for the
/// resulting session.
pub struct TestNetwork {
    app_key: AppKey,
    pub app_nonce: u32,
    pub net_id: [u8; 3],
    pub dev_addr: DevAddr<[u8; 4]>,
    pub session_keys: Option<(NewSKey, AppSKey)>,
}

impl TestNetwork {
    pub fn new(app_key: [u8; 16]) -> Self {
        Self {
            app_key: AppKey::from(app_key),
            app_nonce: 0,
            net_id: [0x13, 0x00, 0x00],
            dev_addr: DevAddr::from(0x2601_1BDAu32.to_le_bytes()),
            session_keys: None,
        }
    }

    pub fn accept(&mut self, join_request: &[u8]) -> Vec<u8> {
        let request = JoinRequestPayload::new(join_request).expect("join request");
        assert!(request.validate_mic(self.app_key.inner()), "join request MIC");
        self.app_nonce += 1;
        let nonce = self.app_nonce.to_le_bytes();
        let frame = network_join_accept(
            &self.app_key.inner().0,
            [nonce[0], nonce[1], nonce[2]],
            self.net_id,
            &self.dev_addr,
            0,
            1,
            None,
        );
        let accept = DecryptedJoinAcceptPayload::new(frame.clone(), &self.app_key)
            .expect("own join accept");
        let dev_nonce = request.dev_nonce();
        self.session_keys = Some((
            accept.derive_newskey(&dev_nonce, &self.app_key),
            accept.derive_appskey(&dev_nonce, &self.app_key),
        ));
        frame
    }

    pub fn downlink(
        &self,
        fcnt: u32,
        fport: Option<u8>,
        payload: &[u8],
        ack: bool,
        fopts: &[u8],
    ) -> Vec<u8> {
        let (nwk_skey, app_skey) = self.session_keys.expect("network has a session");
        let mut creator = DataPayloadCreator::new();
        creator
            .set_uplink(false)
            .set_confirmed(false)
            .set_dev_addr(self.dev_addr)
            .set_fctrl(&encoding::parser::FCtrl(if ack { 0x20 } else { 0 }, false))
            .set_fcnt(fcnt);
        if let Some(port) = fport {
            creator.set_f_port(port);
        }
        let (fopts, payload) = match fport {
            Some(0) => (RawMacCommands(payload), &[][..]),
            _ => (RawMacCommands(fopts), payload),
        };
        let mut cmds: Vec<&dyn SerializableMacCommand> = Vec::new();
        if !fopts.0.is_empty() {
            cmds.push(&fopts);
        }
        creator.build(payload, &cmds, &nwk_skey, &app_skey).expect("downlink").to_vec()
    }
}

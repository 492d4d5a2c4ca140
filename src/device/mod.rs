//! Wrapper for all necessary functionality implemented by calling code.

pub mod credentials_store;
pub mod non_volatile_store;
pub mod radio;
pub mod radio_buffer;
pub mod rng;
pub mod timer;

use core::fmt::Debug;

use radio::Radio;
use rng::Rng;
use timer::Timer;

use self::non_volatile_store::NonVolatileStore;

#[allow(missing_docs)]
pub enum Error<D>
where
    D: Device,
{
    Timer(<<D as Device>::Timer as Timer>::Error),
    Radio(<<D as Device>::Radio as Radio>::Error),
    Rng(<<D as Device>::Rng as Rng>::Error),
    NonVolatileStore(<<D as Device>::NonVolatileStore as NonVolatileStore>::Error),
    RadioBuffer(radio_buffer::Error),
}
impl<D> Debug for Error<D>
where
    D: Device,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Timer(e) => f.debug_tuple("Timer").field(e).finish(),
            Error::Radio(e) => f.debug_tuple("Radio").field(e).finish(),
            Error::Rng(e) => f.debug_tuple("Rng").field(e).finish(),
            Error::NonVolatileStore(e) => f.debug_tuple("NonVolatileStore").field(e).finish(),
            Error::RadioBuffer(e) => f.debug_tuple("RadioBuffer").field(e).finish(),
        }
    }
}
#[cfg(feature = "defmt")]
impl<D> defmt::Format for Error<D>
where
    D: Device,
{
    fn format(&self, f: defmt::Formatter) {
        match self {
            Error::Timer(e) => defmt::write!(f, "Timer({})", e),
            Error::Radio(e) => defmt::write!(f, "Radio({})", e),
            Error::Rng(e) => defmt::write!(f, "Rng({})", e),
            Error::NonVolatileStore(e) => defmt::write!(f, "NonVolatileStore({})", e),
            Error::RadioBuffer(e) => defmt::write!(f, "RadioBuffer({})", e),
        }
    }
}
impl<D> From<Error<D>> for super::Error<D>
where
    D: Device,
{
    fn from(value: Error<D>) -> Self {
        Self::Device(value)
    }
}
impl<D> From<radio_buffer::Error> for super::Error<D>
where
    D: Device,
{
    fn from(value: radio_buffer::Error) -> Self {
        Self::Device(Error::RadioBuffer(value))
    }
}

/// End device functionality provided by the caller.
pub trait Device {
    /// Timer provided by the calling code.
    type Timer: Timer;
    /// Radio provided by the calling code.
    type Radio: Radio;
    /// Random number generator provided by calling code.
    type Rng: Rng;
    /// Storage capability provided by calling code.
    type NonVolatileStore: NonVolatileStore;

    /// Get the caller-supplied timer implementation.
    fn timer(&mut self) -> &mut Self::Timer;
    /// Get the caller-supplied LoRa radio implementation.
    fn radio(&mut self) -> &mut Self::Radio;
    /// Get the caller-supllied random number generator implementation.
    fn rng(&mut self) -> &mut Self::Rng;
    /// Get the caller-supplied persistence implementation.
    fn non_volatile_store(&mut self) -> &mut Self::NonVolatileStore;
    /// Get the caller-supplied maximum EIRP.
    fn max_eirp() -> u8;
    /// 6 byte hardware identifier (usually a MAC address) to derive a DevEUI from.
    fn hardware_id(&mut self) -> Option<[u8; 6]> {
        None
    }
    /// Process the LinkCheckAns response from a network server as directed by the caller.
    fn handle_link_check(&mut self, _gateway_count: u8, _margin: u8) {
        // default do nothing
    }
    /// Battery level in `0.0..=1.0` reported in DevStatusAns, `None` when externally powered.
    fn battery_level(&self) -> Option<f32> {
        None
    }
}

//! Transceiver control consumed by the MAC.

pub mod types;
use core::fmt::Debug;
use types::*;

/// An asynchronous radio implementation that can transmit and receive data.
///
/// Bus and pin configuration happen when the implementation is constructed. Only one
/// operation is ever outstanding: the MAC owns the radio exclusively.
pub trait Radio: Sized {
    #[cfg(feature = "defmt")]
    type Error: Debug + defmt::Format;

    #[cfg(not(feature = "defmt"))]
    type Error: Debug;

    /// Transmit data buffer with the given tranciever configuration. The returned future
    /// should only complete once data have been transmitted.
    async fn tx(&mut self, config: TxConfig, buf: &[u8]) -> Result<(), Self::Error>;

    /// Listen with the given configuration until a frame arrives or the absolute
    /// `deadline_ms` passes. A received frame is written to the start of `rx_buf`.
    ///
    /// The MAC also races this future against its own window timer, so returning late
    /// is harmless.
    async fn rx(
        &mut self,
        config: RfConfig,
        deadline_ms: u64,
        rx_buf: &mut [u8],
    ) -> Result<RxEvent, Self::Error>;

    /// Place the radio in sleep mode with warm or cold start specified.
    async fn sleep(&mut self, warm_start: bool) -> Result<(), Self::Error>;

    /// Hardware reset of the transceiver.
    async fn reset(&mut self) -> Result<(), Self::Error>;
}

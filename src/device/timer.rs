//! Monotonic time source used to pace duty-cycle waits and receive windows.

use core::{fmt::Debug, future::Future};

/// Millisecond clock with the ability to sleep until an absolute instant.
pub trait Timer: Sized {
    #[cfg(feature = "defmt")]
    type Error: Debug + defmt::Format;

    #[cfg(not(feature = "defmt"))]
    type Error: Debug;

    /// Future returned by [`Timer::at`]. It does not borrow the timer so it can be raced
    /// against radio operations.
    type AtFuture: Future<Output = ()>;

    /// Milliseconds since an arbitrary, fixed epoch.
    fn now_ms(&mut self) -> u64;

    /// Resolve once `now_ms()` has reached `instant_ms`. Instants in the past resolve
    /// immediately.
    fn at(&mut self, instant_ms: u64) -> Result<Self::AtFuture, Self::Error>;
}

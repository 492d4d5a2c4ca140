//! Randomness provided by calling code.

use core::fmt::Debug;

/// Random source for channel selection and retry jitter.
pub trait Rng {
    #[cfg(feature = "defmt")]
    type Error: Debug + defmt::Format;

    #[cfg(not(feature = "defmt"))]
    type Error: Debug;

    /// Next random word.
    fn next_u32(&mut self) -> Result<u32, Self::Error>;

    /// Uniform-ish value in `0..bound`, zero when `bound` is zero.
    fn below(&mut self, bound: u32) -> Result<u32, Self::Error> {
        if bound == 0 {
            return Ok(0);
        }
        Ok(self.next_u32()? % bound)
    }
}

//! Buffer functionality for send/receive data tranmission between the caller and the LoRa physical layer.

use core::ops::Range;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Error {
    BufferFull,
}

/// Largest PHY payload handled by the MAC.
pub const MAX_PHY_PAYLOAD: usize = 256;

/// Packet buffer shared by the uplink frame being built and the downlink frame being received.
#[derive(Clone)]
pub struct RadioBuffer<const N: usize = MAX_PHY_PAYLOAD> {
    packet: [u8; N],
    pos: usize,
}

impl<const N: usize> Default for RadioBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RadioBuffer<N> {
    /// Creation.
    pub fn new() -> Self {
        Self { packet: [0; N], pos: 0 }
    }

    /// Mark as empty.
    pub fn clear(&mut self) {
        self.pos = 0;
    }

    /// Add data as long as it fits within the buffer.
    pub fn extend_from_slice(&mut self, buf: &[u8]) -> Result<(), Error> {
        let end = self.pos + buf.len();
        if end > N {
            return Err(Error::BufferFull);
        }
        self.packet[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(())
    }

    /// Provide the whole buffer for the radio to receive into.
    pub fn as_raw_slice(&mut self) -> &mut [u8] {
        &mut self.packet
    }

    /// Mark the first `len` bytes as valid after a reception.
    pub fn set_len(&mut self, len: usize) -> Result<(), Error> {
        if len > N {
            return Err(Error::BufferFull);
        }
        self.pos = len;
        Ok(())
    }

    /// Bytes of a sub range of the valid data.
    pub fn slice(&self, range: Range<usize>) -> &[u8] {
        let end = range.end.min(self.pos);
        &self.packet[range.start.min(end)..end]
    }
}

impl<const N: usize> AsMut<[u8]> for RadioBuffer<N> {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.packet[..self.pos]
    }
}

impl<const N: usize> AsRef<[u8]> for RadioBuffer<N> {
    fn as_ref(&self) -> &[u8] {
        &self.packet[..self.pos]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_to_capacity() {
        let mut buffer: RadioBuffer<4> = RadioBuffer::new();
        buffer.extend_from_slice(&[1, 2]).unwrap();
        buffer.extend_from_slice(&[3, 4]).unwrap();
        assert_eq!(buffer.as_ref(), &[1, 2, 3, 4]);
        assert!(buffer.extend_from_slice(&[5]).is_err());
    }

    #[test]
    fn received_length_bounds_slices() {
        let mut buffer: RadioBuffer<8> = RadioBuffer::new();
        buffer.as_raw_slice()[..3].copy_from_slice(&[9, 8, 7]);
        buffer.set_len(3).unwrap();
        assert_eq!(buffer.slice(1..5), &[8, 7]);
        assert!(buffer.set_len(9).is_err());
        buffer.clear();
        assert!(buffer.as_ref().is_empty());
    }
}

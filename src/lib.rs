#![allow(async_fn_in_trait)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

mod fmt;

use core::fmt::Debug;
use device::Device;
use mac::region;

pub mod device;
pub mod dispatch;
pub mod mac;
pub mod node;

#[cfg(test)]
mod test_util;

pub use device::credentials_store::DeviceIdentity;
pub use mac::types::{FrameCounters, JoinState, LinkStatus, RxTxWindow};
pub use node::{Error as NodeError, Eu868Node, Node, ResponseCode, Settings, Us915Node};

/// Failure inside the MAC, tagged with the layer it came from.
#[allow(missing_docs)]
pub enum Error<D>
where
    D: Device,
{
    Device(device::Error<D>),
    Region(region::Error),
    Mac(mac::Error),
}

impl<D> Debug for Error<D>
where
    D: Device,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Device(e) => f.debug_tuple("Device").field(e).finish(),
            Error::Region(e) => f.debug_tuple("Region").field(e).finish(),
            Error::Mac(e) => f.debug_tuple("Mac").field(e).finish(),
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
            Error::Device(e) => defmt::write!(f, "Device({})", e),
            Error::Region(e) => defmt::write!(f, "Region({})", e),
            Error::Mac(e) => defmt::write!(f, "Mac({})", e),
        }
    }
}

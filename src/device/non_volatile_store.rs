//! Storage capability supporting persistence during power-off which must be implemented by calling code.

use core::fmt::Debug;

use serde::{de::DeserializeOwned, Serialize};

/// Namespace every record of this crate is stored under.
pub const NAMESPACE: &str = "lorawan";

/// Records persisted by the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreKey {
    /// DevEUI, JoinEUI and AppKey.
    Credentials,
    /// MAC parameters and nonces that must survive a power cycle.
    MacState,
}

impl StoreKey {
    /// Key name inside [`NAMESPACE`].
    pub fn name(self) -> &'static str {
        match self {
            StoreKey::Credentials => "credentials",
            StoreKey::MacState => "mac",
        }
    }
}

/// Key-value persistence. A single `save` must be all-or-nothing: after a power loss the
/// record reads back either as the old or as the new value.
pub trait NonVolatileStore {
    #[cfg(feature = "defmt")]
    type Error: Debug + defmt::Format;

    #[cfg(not(feature = "defmt"))]
    type Error: Debug;

    /// Durably replace the record under `key`.
    fn save<T>(&mut self, key: StoreKey, item: &T) -> Result<(), Self::Error>
    where
        T: Serialize;

    /// Read the record under `key`. `Ok(None)` means the record was never written or
    /// cannot be decoded as `T`.
    fn load<T>(&mut self, key: StoreKey) -> Result<Option<T>, Self::Error>
    where
        T: DeserializeOwned;

    /// Delete the record under `key`; deleting a missing record succeeds.
    fn remove(&mut self, key: StoreKey) -> Result<(), Self::Error>;
}

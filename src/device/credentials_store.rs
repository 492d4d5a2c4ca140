//! Persistence of the OTAA identity (DevEUI, JoinEUI, AppKey).

use serde::{Deserialize, Serialize};

use super::non_volatile_store::{NonVolatileStore, StoreKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Error {
    /// A field does not have the expected number of hex characters.
    InvalidLength,
    /// A field contains something other than `0-9a-fA-F`.
    InvalidHexDigit,
}

/// Everything needed to attempt an OTAA join. EUIs are kept in the order they are
/// written by humans (most significant byte first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceIdentity {
    /// Device EUI.
    pub dev_eui: [u8; 8],
    /// Join EUI, called AppEUI before LoRaWAN 1.0.4.
    pub join_eui: [u8; 8],
    /// Root key used for the join handshake.
    pub app_key: [u8; 16],
}

impl DeviceIdentity {
    /// Parse the 16/16/32 hex character triple used for provisioning.
    pub fn from_hex(dev_eui: &str, join_eui: &str, app_key: &str) -> Result<Self, Error> {
        Ok(Self {
            dev_eui: parse_hex(dev_eui)?,
            join_eui: parse_hex(join_eui)?,
            app_key: parse_hex(app_key)?,
        })
    }

    /// Parse JoinEUI and AppKey and take the DevEUI from a 6 byte hardware identifier.
    pub fn from_hardware_id(
        hardware_id: [u8; 6],
        join_eui: &str,
        app_key: &str,
    ) -> Result<Self, Error> {
        Ok(Self {
            dev_eui: derive_dev_eui(hardware_id),
            join_eui: parse_hex(join_eui)?,
            app_key: parse_hex(app_key)?,
        })
    }
}

/// Turn a 6 byte MAC-style identifier into an EUI-64 by inserting `FF FE` in the middle.
pub fn derive_dev_eui(hardware_id: [u8; 6]) -> [u8; 8] {
    let mut eui = [0u8; 8];
    eui[..3].copy_from_slice(&hardware_id[..3]);
    eui[3] = 0xFF;
    eui[4] = 0xFE;
    eui[5..].copy_from_slice(&hardware_id[3..]);
    eui
}

fn parse_hex<const N: usize>(hex: &str) -> Result<[u8; N], Error> {
    let hex = hex.trim().as_bytes();
    if hex.len() != 2 * N {
        return Err(Error::InvalidLength);
    }
    let mut out = [0u8; N];
    for (byte, pair) in out.iter_mut().zip(hex.chunks_exact(2)) {
        *byte = (nibble(pair[0])? << 4) | nibble(pair[1])?;
    }
    Ok(out)
}

fn nibble(c: u8) -> Result<u8, Error> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::InvalidHexDigit),
    }
}

/// Adapter storing a [`DeviceIdentity`] as one record of a [`NonVolatileStore`].
pub struct CredentialsStore<'a, S>
where
    S: NonVolatileStore,
{
    store: &'a mut S,
}

impl<'a, S> CredentialsStore<'a, S>
where
    S: NonVolatileStore,
{
    /// Wrap the caller's store.
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    /// Read the stored identity. Anything missing or malformed reads as `None`.
    pub fn load(&mut self) -> Result<Option<DeviceIdentity>, S::Error> {
        self.store.load(StoreKey::Credentials)
    }

    /// Persist all three fields in one write.
    pub fn save(&mut self, identity: &DeviceIdentity) -> Result<(), S::Error> {
        self.store.save(StoreKey::Credentials, identity)?;
        debug!("credentials saved");
        Ok(())
    }

    /// True only when a complete identity can be read back.
    pub fn is_provisioned(&mut self) -> bool {
        matches!(self.load(), Ok(Some(_)))
    }

    /// Forget the stored identity.
    pub fn clear(&mut self) -> Result<(), S::Error> {
        self.store.remove(StoreKey::Credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::TestStore;

    const DEV_EUI: &str = "0004A30B001C0530";
    const JOIN_EUI: &str = "70B3D57ED0000001";
    const APP_KEY: &str = "2B7E151628AED2A6ABF7158809CF4F3C";

    #[test]
    fn derives_eui_from_hardware_id() {
        let eui = derive_dev_eui([0xA0, 0xB1, 0xC2, 0x01, 0x02, 0x03]);
        assert_eq!(eui, [0xA0, 0xB1, 0xC2, 0xFF, 0xFE, 0x01, 0x02, 0x03]);
        assert_eq!(eui, derive_dev_eui([0xA0, 0xB1, 0xC2, 0x01, 0x02, 0x03]));
    }

    #[test]
    fn parses_provisioning_triple() {
        let identity = DeviceIdentity::from_hex(DEV_EUI, JOIN_EUI, APP_KEY).unwrap();
        assert_eq!(identity.dev_eui, [0x00, 0x04, 0xA3, 0x0B, 0x00, 0x1C, 0x05, 0x30]);
        assert_eq!(identity.join_eui[0], 0x70);
        assert_eq!(identity.app_key[15], 0x3C);
        let lower = DeviceIdentity::from_hex(
            &DEV_EUI.to_lowercase(),
            JOIN_EUI,
            &APP_KEY.to_lowercase(),
        )
        .unwrap();
        assert_eq!(lower, identity);
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(
            DeviceIdentity::from_hex("0004A30B001C053", JOIN_EUI, APP_KEY),
            Err(Error::InvalidLength)
        );
        assert_eq!(
            DeviceIdentity::from_hex(DEV_EUI, "70B3D57ED000000G", APP_KEY),
            Err(Error::InvalidHexDigit)
        );
        assert_eq!(
            DeviceIdentity::from_hex(DEV_EUI, JOIN_EUI, &APP_KEY[..30]),
            Err(Error::InvalidLength)
        );
    }

    #[test]
    fn provisioned_only_after_complete_save() {
        let mut store = TestStore::default();
        let mut credentials = CredentialsStore::new(&mut store);
        assert!(!credentials.is_provisioned());
        assert_eq!(credentials.load().unwrap(), None);

        let identity = DeviceIdentity::from_hex(DEV_EUI, JOIN_EUI, APP_KEY).unwrap();
        credentials.save(&identity).unwrap();
        assert!(credentials.is_provisioned());
        assert_eq!(credentials.load().unwrap(), Some(identity));

        credentials.clear().unwrap();
        assert!(!credentials.is_provisioned());
    }

    #[test]
    fn store_failure_is_reported() {
        let mut store = TestStore::default();
        store.fail_writes(true);
        let identity = DeviceIdentity::from_hex(DEV_EUI, JOIN_EUI, APP_KEY).unwrap();
        let mut credentials = CredentialsStore::new(&mut store);
        assert!(credentials.save(&identity).is_err());
        assert!(!credentials.is_provisioned());
    }
}

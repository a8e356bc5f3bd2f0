//! Deterministic per-order account derivation and address canonicalization.
//!
//! Every order gets its own deposit account, derived from the master seed with the order id as
//! a hard sub-path. No private key material is ever persisted; the keypair is re-derived on
//! demand when the sweep transaction needs signing.

use blake2::{digest::consts::U32, Blake2b, Digest};
use dpg_common::Secret;
use ed25519_dalek::{Signer, SigningKey};
use thiserror::Error;

use crate::db_types::OrderId;

type Blake2b256 = Blake2b<U32>;

/// Domain separator mixed into every key derivation, so seeds used elsewhere can never collide
/// with gateway deposit keys.
const DERIVATION_TAG: &[u8] = b"dpg-ed25519-hdkd";

/// The network prefix all addresses are canonicalized under.
pub const NETWORK_PREFIX: u16 = 0;

#[derive(Debug, Clone, Error)]
pub enum KeyringError {
    #[error("Invalid address format: {0}")]
    InvalidAddressFormat(String),
}

/// An order's deposit keypair. Holds the signing key in memory only.
pub struct DerivedAccount {
    signing_key: SigningKey,
}

impl DerivedAccount {
    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The SS58 deposit address under [`NETWORK_PREFIX`].
    pub fn address(&self) -> String {
        ss58::encode(&self.public_key(), NETWORK_PREFIX)
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for DerivedAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DerivedAccount({})", self.address())
    }
}

/// Derives the deposit keypair for an order. Pure in `(seed, order_id)`: the same pair always
/// yields the identical keypair, and distinct order ids yield distinct addresses with
/// overwhelming probability.
pub fn derive_account(seed: &Secret<String>, order_id: &OrderId) -> DerivedAccount {
    let mut hasher = Blake2b256::new();
    hasher.update(DERIVATION_TAG);
    hasher.update(seed.reveal().as_bytes());
    hasher.update(b"//");
    hasher.update(order_id.as_str().as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    DerivedAccount { signing_key: SigningKey::from_bytes(&digest) }
}

/// Decodes any valid SS58 address and re-encodes it under [`NETWORK_PREFIX`], so that
/// addresses supplied by merchants compare equal to the ones the gateway generates.
pub fn canonicalize_address(raw: &str) -> Result<String, KeyringError> {
    let (public_key, _) = ss58::decode(raw).map_err(|e| {
        log::error!("Error decoding address {raw}: {e}");
        KeyringError::InvalidAddressFormat(raw.to_string())
    })?;
    Ok(ss58::encode(&public_key, NETWORK_PREFIX))
}

/// SS58 address codec: base58 over `prefix ++ public key ++ checksum`, where the checksum is
/// the first two bytes of BLAKE2b-512 over `b"SS58PRE" ++ prefix ++ public key`.
pub mod ss58 {
    use blake2::{Blake2b512, Digest};
    use thiserror::Error;

    const CHECKSUM_PREIMAGE_TAG: &[u8] = b"SS58PRE";
    const CHECKSUM_LEN: usize = 2;

    #[derive(Debug, Clone, Error)]
    pub enum Ss58Error {
        #[error("not valid base58: {0}")]
        Base58(String),
        #[error("unexpected payload length {0}")]
        BadLength(usize),
        #[error("checksum mismatch")]
        BadChecksum,
        #[error("reserved address prefix")]
        ReservedPrefix,
    }

    fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
        let mut hasher = Blake2b512::new();
        hasher.update(CHECKSUM_PREIMAGE_TAG);
        hasher.update(payload);
        let digest = hasher.finalize();
        [digest[0], digest[1]]
    }

    pub fn encode(public_key: &[u8; 32], prefix: u16) -> String {
        let mut payload = Vec::with_capacity(35);
        if prefix < 64 {
            payload.push(prefix as u8);
        } else {
            // Two-byte prefix encoding for idents 64..=16383.
            let ident = prefix & 0b0011_1111_1111_1111;
            payload.push(((ident & 0b0000_0000_1111_1100) >> 2) as u8 | 0b0100_0000);
            payload.push(((ident >> 8) as u8) | (((ident & 0b0000_0000_0000_0011) as u8) << 6));
        }
        payload.extend_from_slice(public_key);
        let check = checksum(&payload);
        payload.extend_from_slice(&check);
        bs58::encode(payload).into_string()
    }

    pub fn decode(address: &str) -> Result<([u8; 32], u16), Ss58Error> {
        let data = bs58::decode(address).into_vec().map_err(|e| Ss58Error::Base58(e.to_string()))?;
        let (prefix, body_start) = match data.len() {
            35 => {
                if data[0] >= 64 {
                    return Err(Ss58Error::ReservedPrefix);
                }
                (data[0] as u16, 1)
            },
            36 => {
                let lower = ((data[0] << 2) | (data[1] >> 6)) as u16;
                let upper = ((data[1] & 0b0011_1111) as u16) << 8;
                (lower | upper, 2)
            },
            n => return Err(Ss58Error::BadLength(n)),
        };
        let check_start = data.len() - CHECKSUM_LEN;
        if checksum(&data[..check_start]) != data[check_start..] {
            return Err(Ss58Error::BadChecksum);
        }
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&data[body_start..check_start]);
        Ok((public_key, prefix))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn seed() -> Secret<String> {
        Secret::new("tide ripple ladder cabin ordinary hollow radar pact".to_string())
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_account(&seed(), &OrderId("order-A".into()));
        let b = derive_account(&seed(), &OrderId("order-A".into()));
        assert_eq!(a.address(), b.address());
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn distinct_orders_get_distinct_accounts() {
        let a = derive_account(&seed(), &OrderId("order-A".into()));
        let b = derive_account(&seed(), &OrderId("order-B".into()));
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn distinct_seeds_get_distinct_accounts() {
        let a = derive_account(&seed(), &OrderId("order-A".into()));
        let b = derive_account(&Secret::new("another seed".to_string()), &OrderId("order-A".into()));
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn signatures_verify_under_the_derived_key() {
        use ed25519_dalek::{Signature, Verifier, VerifyingKey};
        let account = derive_account(&seed(), &OrderId("order-A".into()));
        let sig = account.sign(b"payload");
        let vk = VerifyingKey::from_bytes(&account.public_key()).unwrap();
        assert!(vk.verify(b"payload", &Signature::from_bytes(&sig)).is_ok());
    }

    #[test]
    fn ss58_round_trip() {
        let key = [7u8; 32];
        let address = ss58::encode(&key, NETWORK_PREFIX);
        let (decoded, prefix) = ss58::decode(&address).unwrap();
        assert_eq!(decoded, key);
        assert_eq!(prefix, NETWORK_PREFIX);
    }

    #[test]
    fn canonicalize_rewrites_foreign_prefixes() {
        let key = [42u8; 32];
        // Encoded for a different network (e.g. a parachain-specific prefix).
        let foreign = ss58::encode(&key, 2);
        let canonical = canonicalize_address(&foreign).unwrap();
        assert_eq!(canonical, ss58::encode(&key, NETWORK_PREFIX));
        // Canonicalizing is idempotent.
        assert_eq!(canonicalize_address(&canonical).unwrap(), canonical);
    }

    #[test]
    fn canonicalize_rejects_garbage() {
        assert!(matches!(canonicalize_address("not-an-address"), Err(KeyringError::InvalidAddressFormat(_))));
        assert!(matches!(canonicalize_address(""), Err(KeyringError::InvalidAddressFormat(_))));
        // Valid base58 but wrong length.
        let short = bs58::encode(&[1u8; 10]).into_string();
        assert!(matches!(canonicalize_address(&short), Err(KeyringError::InvalidAddressFormat(_))));
    }

    #[test]
    fn two_byte_prefix_round_trip() {
        let key = [9u8; 32];
        let address = ss58::encode(&key, 4242);
        let (decoded, prefix) = ss58::decode(&address).unwrap();
        assert_eq!(decoded, key);
        assert_eq!(prefix, 4242);
    }
}

//! The narrow SCALE subset the gateway speaks.
//!
//! Only what the reconciliation and withdrawal paths need is implemented: compact integers,
//! decoding of the recognized value-transfer calls out of raw extrinsics, signed-extrinsic
//! construction for the two sweep calls, and the storage keys for asset metadata and balances.
//! Anything outside this subset decodes to an opaque extrinsic and is skipped by the matcher.

use blake2::{
    digest::consts::{U16, U32},
    Blake2b,
    Digest,
};
use thiserror::Error;

use crate::{
    config::{CallIndices, TxExtensions},
    keyring::DerivedAccount,
};

type Blake2b256 = Blake2b<U32>;
type Blake2b128 = Blake2b<U16>;

#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("unsupported extrinsic version {0:#x}")]
    UnsupportedVersion(u8),
    #[error("unsupported encoding: {0}")]
    Unsupported(String),
}

//--------------------------------------   compact integers    -------------------------------------------------------

pub fn encode_compact(value: u128, out: &mut Vec<u8>) {
    if value < 1 << 6 {
        out.push((value as u8) << 2);
    } else if value < 1 << 14 {
        out.extend_from_slice(&(((value as u16) << 2) | 0b01).to_le_bytes());
    } else if value < 1 << 30 {
        out.extend_from_slice(&(((value as u32) << 2) | 0b10).to_le_bytes());
    } else {
        let bytes = value.to_le_bytes();
        let significant = (16 - value.leading_zeros() as usize / 8).max(4);
        out.push((((significant - 4) as u8) << 2) | 0b11);
        out.extend_from_slice(&bytes[..significant]);
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn byte(&mut self) -> Result<u8, CodecError> {
        let b = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array32(&mut self) -> Result<[u8; 32], CodecError> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.take(32)?);
        Ok(out)
    }

    fn compact(&mut self) -> Result<u128, CodecError> {
        let b0 = self.byte()?;
        match b0 & 0b11 {
            0b00 => Ok((b0 >> 2) as u128),
            0b01 => {
                let b1 = self.byte()?;
                Ok((u16::from_le_bytes([b0, b1]) >> 2) as u128)
            },
            0b10 => {
                let rest = self.take(3)?;
                Ok((u32::from_le_bytes([b0, rest[0], rest[1], rest[2]]) >> 2) as u128)
            },
            _ => {
                let n = (b0 >> 2) as usize + 4;
                if n > 16 {
                    return Err(CodecError::Unsupported(format!("compact wider than u128 ({n} bytes)")));
                }
                let mut bytes = [0u8; 16];
                bytes[..n].copy_from_slice(self.take(n)?);
                Ok(u128::from_le_bytes(bytes))
            },
        }
    }
}

//--------------------------------------   extrinsic decode    -------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedCall {
    /// `balances.transfer_allow_death` / `balances.transfer_keep_alive`.
    NativeTransfer { call_name: &'static str, to: [u8; 32], amount: u128 },
    /// `assets.transfer` / `assets.transfer_keep_alive`.
    AssetTransfer { call_name: &'static str, asset_id: u32, to: [u8; 32], amount: u128 },
    Opaque,
}

#[derive(Debug, Clone)]
pub struct DecodedExtrinsic {
    pub signer: Option<[u8; 32]>,
    pub call: DecodedCall,
}

/// Decodes one length-prefixed extrinsic as found in a block body.
///
/// The signed-extension layout is runtime-specific; `extensions` tells the decoder which of the
/// optional ones to expect. Calls outside the recognized transfer set come back as
/// [`DecodedCall::Opaque`].
pub fn decode_extrinsic(
    raw: &[u8],
    indices: &CallIndices,
    extensions: &TxExtensions,
) -> Result<DecodedExtrinsic, CodecError> {
    let mut cur = Cursor::new(raw);
    let _body_len = cur.compact()?;
    let version = cur.byte()?;
    if version & 0x7f != 4 {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let mut signer = None;
    if version & 0x80 != 0 {
        signer = decode_multi_address(&mut cur)?;
        match cur.byte()? {
            // MultiSignature: ed25519 and sr25519 are 64 bytes, ecdsa is 65.
            0x00 | 0x01 => {
                cur.take(64)?;
            },
            0x02 => {
                cur.take(65)?;
            },
            other => return Err(CodecError::Unsupported(format!("signature scheme {other:#x}"))),
        }
        // Era: a zero byte is immortal, anything else is a two-byte mortal era.
        if cur.byte()? != 0 {
            cur.byte()?;
        }
        cur.compact()?; // nonce
        cur.compact()?; // tip
        if extensions.fee_asset {
            match cur.byte()? {
                0x00 => {},
                0x01 => {
                    cur.take(4)?;
                },
                other => return Err(CodecError::Unsupported(format!("fee-asset option tag {other:#x}"))),
            }
        }
        if extensions.metadata_hash {
            cur.byte()?; // mode
        }
    }
    let pallet = cur.byte()?;
    let call_index = cur.byte()?;
    let call = decode_call(&mut cur, pallet, call_index, indices)?;
    Ok(DecodedExtrinsic { signer, call })
}

fn decode_call(
    cur: &mut Cursor<'_>,
    pallet: u8,
    call_index: u8,
    indices: &CallIndices,
) -> Result<DecodedCall, CodecError> {
    if pallet == indices.balances_pallet {
        let call_name = if call_index == indices.balances_transfer_allow_death {
            "transfer_allow_death"
        } else if call_index == indices.balances_transfer_keep_alive {
            "transfer_keep_alive"
        } else {
            return Ok(DecodedCall::Opaque);
        };
        let Some(to) = decode_multi_address(cur)? else {
            return Ok(DecodedCall::Opaque);
        };
        let amount = cur.compact()?;
        return Ok(DecodedCall::NativeTransfer { call_name, to, amount });
    }
    if pallet == indices.assets_pallet {
        let call_name = if call_index == indices.assets_transfer {
            "transfer"
        } else if call_index == indices.assets_transfer_keep_alive {
            "transfer_keep_alive"
        } else {
            return Ok(DecodedCall::Opaque);
        };
        let asset_id = cur.compact()? as u32;
        let Some(to) = decode_multi_address(cur)? else {
            return Ok(DecodedCall::Opaque);
        };
        let amount = cur.compact()?;
        return Ok(DecodedCall::AssetTransfer { call_name, asset_id, to, amount });
    }
    Ok(DecodedCall::Opaque)
}

/// Returns the account id for the `Id` variant; other address variants are skipped and yield
/// `None`, which the callers treat as an opaque (unmatched) destination.
fn decode_multi_address(cur: &mut Cursor<'_>) -> Result<Option<[u8; 32]>, CodecError> {
    match cur.byte()? {
        0x00 => Ok(Some(cur.array32()?)),
        0x01 => {
            cur.compact()?;
            Ok(None)
        },
        0x02 => {
            let n = cur.compact()? as usize;
            cur.take(n)?;
            Ok(None)
        },
        0x03 => {
            cur.take(32)?;
            Ok(None)
        },
        0x04 => {
            cur.take(20)?;
            Ok(None)
        },
        other => Err(CodecError::Unsupported(format!("address variant {other:#x}"))),
    }
}

//--------------------------------------   extrinsic encode    -------------------------------------------------------

fn encode_multi_address(key: &[u8; 32], out: &mut Vec<u8>) {
    out.push(0x00);
    out.extend_from_slice(key);
}

/// `balances.transfer_all(dest, keep_alive = false)`: the full-balance sweep that closes the
/// deposit account, fees paid from the transferred balance.
pub fn encode_native_sweep(indices: &CallIndices, dest: &[u8; 32]) -> Vec<u8> {
    let mut call = Vec::with_capacity(36);
    call.push(indices.balances_pallet);
    call.push(indices.balances_transfer_all);
    encode_multi_address(dest, &mut call);
    call.push(0x00); // keep_alive: false
    call
}

/// `assets.transfer(asset_id, dest, amount)`.
pub fn encode_asset_transfer(indices: &CallIndices, asset_id: u32, dest: &[u8; 32], amount: u128) -> Vec<u8> {
    let mut call = Vec::with_capacity(64);
    call.push(indices.assets_pallet);
    call.push(indices.assets_transfer);
    encode_compact(asset_id as u128, &mut call);
    encode_multi_address(dest, &mut call);
    encode_compact(amount, &mut call);
    call
}

pub struct SigningParams {
    pub nonce: u64,
    pub tip: u128,
    pub spec_version: u32,
    pub transaction_version: u32,
    pub genesis_hash: [u8; 32],
    /// The asset fees are paid in, for runtimes with `ChargeAssetTxPayment`. `None` pays in the
    /// native token.
    pub fee_asset: Option<u32>,
    pub extensions: TxExtensions,
}

/// Builds a version-4 signed extrinsic around the given call. The era is immortal, so the
/// checkpoint hash in the signed payload is the genesis hash.
pub fn build_signed_extrinsic(call: &[u8], account: &DerivedAccount, params: &SigningParams) -> Vec<u8> {
    let mut extra = Vec::with_capacity(16);
    extra.push(0x00); // immortal era
    encode_compact(params.nonce as u128, &mut extra);
    encode_compact(params.tip, &mut extra);
    if params.extensions.fee_asset {
        match params.fee_asset {
            Some(id) => {
                extra.push(0x01);
                extra.extend_from_slice(&id.to_le_bytes());
            },
            None => extra.push(0x00),
        }
    }
    if params.extensions.metadata_hash {
        extra.push(0x00); // mode: disabled
    }

    let mut additional = Vec::with_capacity(72);
    additional.extend_from_slice(&params.spec_version.to_le_bytes());
    additional.extend_from_slice(&params.transaction_version.to_le_bytes());
    additional.extend_from_slice(&params.genesis_hash);
    additional.extend_from_slice(&params.genesis_hash);
    if params.extensions.metadata_hash {
        additional.push(0x00); // no metadata hash
    }

    let mut payload = Vec::with_capacity(call.len() + extra.len() + additional.len());
    payload.extend_from_slice(call);
    payload.extend_from_slice(&extra);
    payload.extend_from_slice(&additional);
    let signature = if payload.len() > 256 {
        account.sign(&blake2_256(&payload))
    } else {
        account.sign(&payload)
    };

    let mut body = Vec::with_capacity(call.len() + 103);
    body.push(0x84); // signed, version 4
    encode_multi_address(&account.public_key(), &mut body);
    body.push(0x00); // MultiSignature::Ed25519
    body.extend_from_slice(&signature);
    body.extend_from_slice(&extra);
    body.extend_from_slice(call);

    let mut out = Vec::with_capacity(body.len() + 4);
    encode_compact(body.len() as u128, &mut out);
    out.extend_from_slice(&body);
    out
}

/// The extrinsic hash as block explorers report it: BLAKE2b-256 over the full encoding.
pub fn extrinsic_hash_hex(extrinsic: &[u8]) -> String {
    format!("0x{}", hex::encode(blake2_256(extrinsic)))
}

pub fn blake2_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn blake2_128(data: &[u8]) -> [u8; 16] {
    let mut hasher = Blake2b128::new();
    hasher.update(data);
    hasher.finalize().into()
}

//--------------------------------------    storage queries    -------------------------------------------------------

/// Storage key for `Assets::Metadata(asset_id)`.
pub fn assets_metadata_key(asset_id: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(52);
    key.extend_from_slice(&twox128(b"Assets"));
    key.extend_from_slice(&twox128(b"Metadata"));
    blake2_128_concat(&asset_id.to_le_bytes(), &mut key);
    key
}

/// Storage key for `Assets::Account(asset_id, account)`.
pub fn assets_account_key(asset_id: u32, account: &[u8; 32]) -> Vec<u8> {
    let mut key = Vec::with_capacity(100);
    key.extend_from_slice(&twox128(b"Assets"));
    key.extend_from_slice(&twox128(b"Account"));
    blake2_128_concat(&asset_id.to_le_bytes(), &mut key);
    blake2_128_concat(account, &mut key);
    key
}

fn blake2_128_concat(data: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(&blake2_128(data));
    out.extend_from_slice(data);
}

/// Pulls the decimals out of an `AssetMetadata` storage value
/// (`deposit ‖ name ‖ symbol ‖ decimals ‖ is_frozen`).
pub fn decode_asset_metadata_decimals(value: &[u8]) -> Result<u32, CodecError> {
    let mut cur = Cursor::new(value);
    cur.take(16)?; // deposit
    let name_len = cur.compact()? as usize;
    cur.take(name_len)?;
    let symbol_len = cur.compact()? as usize;
    cur.take(symbol_len)?;
    Ok(cur.byte()? as u32)
}

/// Pulls the balance out of an `AssetAccount` storage value; the balance is its first field.
pub fn decode_asset_account_balance(value: &[u8]) -> Result<u128, CodecError> {
    let mut cur = Cursor::new(value);
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(cur.take(16)?);
    Ok(u128::from_le_bytes(bytes))
}

//--------------------------------------       twox128         -------------------------------------------------------
// Storage map prefixes hash pallet and item names with xxHash64 under two seeds. The algorithm
// is small enough to carry inline; the vectors below pin it to the reference implementation.

const XX_P1: u64 = 0x9E37_79B1_85EB_CA87;
const XX_P2: u64 = 0xC2B2_AE3D_27D4_EB4F;
const XX_P3: u64 = 0x1656_67B1_9E37_79F9;
const XX_P4: u64 = 0x85EB_CA77_C2B2_AE63;
const XX_P5: u64 = 0x27D4_EB2F_1656_67C5;

fn twox128(data: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&xxhash64(data, 0).to_le_bytes());
    out[8..].copy_from_slice(&xxhash64(data, 1).to_le_bytes());
    out
}

fn xx_round(acc: u64, input: u64) -> u64 {
    acc.wrapping_add(input.wrapping_mul(XX_P2)).rotate_left(31).wrapping_mul(XX_P1)
}

fn xx_merge(acc: u64, val: u64) -> u64 {
    (acc ^ xx_round(0, val)).wrapping_mul(XX_P1).wrapping_add(XX_P4)
}

fn read_u64(data: &[u8], pos: usize) -> u64 {
    u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap())
}

fn xxhash64(data: &[u8], seed: u64) -> u64 {
    let mut pos = 0usize;
    let mut h = if data.len() >= 32 {
        let mut v1 = seed.wrapping_add(XX_P1).wrapping_add(XX_P2);
        let mut v2 = seed.wrapping_add(XX_P2);
        let mut v3 = seed;
        let mut v4 = seed.wrapping_sub(XX_P1);
        while pos + 32 <= data.len() {
            v1 = xx_round(v1, read_u64(data, pos));
            v2 = xx_round(v2, read_u64(data, pos + 8));
            v3 = xx_round(v3, read_u64(data, pos + 16));
            v4 = xx_round(v4, read_u64(data, pos + 24));
            pos += 32;
        }
        let mut h = v1
            .rotate_left(1)
            .wrapping_add(v2.rotate_left(7))
            .wrapping_add(v3.rotate_left(12))
            .wrapping_add(v4.rotate_left(18));
        h = xx_merge(h, v1);
        h = xx_merge(h, v2);
        h = xx_merge(h, v3);
        h = xx_merge(h, v4);
        h
    } else {
        seed.wrapping_add(XX_P5)
    };
    h = h.wrapping_add(data.len() as u64);
    while pos + 8 <= data.len() {
        h ^= xx_round(0, read_u64(data, pos));
        h = h.rotate_left(27).wrapping_mul(XX_P1).wrapping_add(XX_P4);
        pos += 8;
    }
    if pos + 4 <= data.len() {
        h ^= (u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as u64).wrapping_mul(XX_P1);
        h = h.rotate_left(23).wrapping_mul(XX_P2).wrapping_add(XX_P3);
        pos += 4;
    }
    while pos < data.len() {
        h ^= (data[pos] as u64).wrapping_mul(XX_P5);
        h = h.rotate_left(11).wrapping_mul(XX_P1);
        pos += 1;
    }
    h ^= h >> 33;
    h = h.wrapping_mul(XX_P2);
    h ^= h >> 29;
    h = h.wrapping_mul(XX_P3);
    h ^= h >> 32;
    h
}

#[cfg(test)]
mod test {
    use dpg_common::Secret;

    use super::*;
    use crate::{db_types::OrderId, keyring};

    #[test]
    fn compact_round_trips() {
        for value in [0u128, 1, 63, 64, 16_383, 16_384, (1 << 30) - 1, 1 << 30, u64::MAX as u128, u128::MAX] {
            let mut buf = Vec::new();
            encode_compact(value, &mut buf);
            let decoded = Cursor::new(&buf).compact().unwrap();
            assert_eq!(decoded, value, "value {value} did not round-trip");
        }
    }

    #[test]
    fn compact_single_byte_forms() {
        let mut buf = Vec::new();
        encode_compact(0, &mut buf);
        assert_eq!(buf, vec![0x00]);
        buf.clear();
        encode_compact(1, &mut buf);
        assert_eq!(buf, vec![0x04]);
        buf.clear();
        encode_compact(42, &mut buf);
        assert_eq!(buf, vec![0xa8]);
    }

    #[test]
    fn xxhash64_reference_vectors() {
        assert_eq!(xxhash64(b"", 0), 0xEF46_DB37_51D8_E999);
        assert_eq!(xxhash64(b"abc", 0), 0x44BC_2CF5_AD77_0999);
    }

    #[test]
    fn storage_key_shapes() {
        assert_eq!(assets_metadata_key(1984).len(), 16 + 16 + 16 + 4);
        assert_eq!(assets_account_key(1984, &[1u8; 32]).len(), 16 + 16 + 16 + 4 + 16 + 32);
        // Both maps share the pallet prefix.
        assert_eq!(assets_metadata_key(1)[..16], assets_account_key(1, &[0u8; 32])[..16]);
        // Distinct asset ids produce distinct keys.
        assert_ne!(assets_metadata_key(1), assets_metadata_key(2));
    }

    #[test]
    fn asset_metadata_value_decodes() {
        let mut value = Vec::new();
        value.extend_from_slice(&10_000_000u128.to_le_bytes()); // deposit
        encode_compact(6, &mut value);
        value.extend_from_slice(b"Tether");
        encode_compact(4, &mut value);
        value.extend_from_slice(b"USDt");
        value.push(6); // decimals
        value.push(0); // is_frozen
        assert_eq!(decode_asset_metadata_decimals(&value).unwrap(), 6);
    }

    #[test]
    fn asset_account_value_decodes() {
        let mut value = Vec::new();
        value.extend_from_slice(&123_456_789u128.to_le_bytes());
        value.extend_from_slice(&[0u8; 20]); // trailing fields are irrelevant
        assert_eq!(decode_asset_account_balance(&value).unwrap(), 123_456_789);
    }

    fn account() -> DerivedAccount {
        keyring::derive_account(&Secret::new("codec test seed".to_string()), &OrderId("order-1".into()))
    }

    fn params(extensions: TxExtensions, fee_asset: Option<u32>) -> SigningParams {
        SigningParams {
            nonce: 7,
            tip: 0,
            spec_version: 1_002_000,
            transaction_version: 26,
            genesis_hash: [0xd5; 32],
            fee_asset,
            extensions,
        }
    }

    #[test]
    fn signed_native_transfer_round_trips_through_the_decoder() {
        let indices = CallIndices::default();
        // balances.transfer_allow_death(dest, value)
        let dest = [9u8; 32];
        let mut call = vec![indices.balances_pallet, indices.balances_transfer_allow_death];
        encode_multi_address(&dest, &mut call);
        encode_compact(1_000_000_000_000, &mut call);

        let xt = build_signed_extrinsic(&call, &account(), &params(TxExtensions::default(), None));
        let decoded = decode_extrinsic(&xt, &indices, &TxExtensions::default()).unwrap();
        assert_eq!(decoded.signer, Some(account().public_key()));
        assert_eq!(
            decoded.call,
            DecodedCall::NativeTransfer { call_name: "transfer_allow_death", to: dest, amount: 1_000_000_000_000 }
        );
    }

    #[test]
    fn signed_asset_transfer_round_trips_with_fee_asset_extension() {
        let indices = CallIndices::default();
        let extensions = TxExtensions { fee_asset: true, metadata_hash: true };
        let dest = [3u8; 32];
        let call = encode_asset_transfer(&indices, 1984, &dest, 55_000_000);
        let xt = build_signed_extrinsic(&call, &account(), &params(extensions.clone(), Some(1984)));
        let decoded = decode_extrinsic(&xt, &indices, &extensions).unwrap();
        assert_eq!(
            decoded.call,
            DecodedCall::AssetTransfer { call_name: "transfer", asset_id: 1984, to: dest, amount: 55_000_000 }
        );
    }

    #[test]
    fn sweep_call_decodes_as_opaque_for_the_matcher() {
        // transfer_all is a withdrawal-side call; the deposit matcher must not credit it.
        let indices = CallIndices::default();
        let call = encode_native_sweep(&indices, &[1u8; 32]);
        let xt = build_signed_extrinsic(&call, &account(), &params(TxExtensions::default(), None));
        let decoded = decode_extrinsic(&xt, &indices, &TxExtensions::default()).unwrap();
        assert_eq!(decoded.call, DecodedCall::Opaque);
    }

    #[test]
    fn unsigned_extrinsics_have_no_signer() {
        let indices = CallIndices::default();
        // A bare (unsigned) remark-style extrinsic: version byte without the signed bit.
        let mut body = vec![0x04, 0x00, 0x00];
        body.extend_from_slice(&[0u8; 4]);
        let mut raw = Vec::new();
        encode_compact(body.len() as u128, &mut raw);
        raw.extend_from_slice(&body);
        let decoded = decode_extrinsic(&raw, &indices, &TxExtensions::default()).unwrap();
        assert!(decoded.signer.is_none());
        assert_eq!(decoded.call, DecodedCall::Opaque);
    }

    #[test]
    fn truncated_extrinsics_error_instead_of_panicking() {
        let indices = CallIndices::default();
        assert!(matches!(decode_extrinsic(&[0x08, 0x84], &indices, &TxExtensions::default()), Err(_)));
        assert!(matches!(decode_extrinsic(&[], &indices, &TxExtensions::default()), Err(CodecError::UnexpectedEof)));
    }
}

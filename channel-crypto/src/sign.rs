use num_bigint::BigUint;
use sha2::{Digest, Sha256};
use tiny_keccak::Hasher;

use crate::address::Address;
use crate::error::CryptoError;
use crate::pack::pack;
use crate::wei::Wei;

/// Recovery term added to a secp256k1 recovery id to get Ethereum's `v`.
const ETH_ADD_TO_V: u8 = 27u8;

/// The capability boundary named in the system design: verifying that a
/// state update was signed by `sender`. Production uses secp256k1 recovery
/// against an address derived by keccak; tests inject a stub.
pub trait SignatureVerifier: Send + Sync {
    fn ecdsa_verify(&self, sender: &Address, digest: &[u8; 32], signature: &[u8; 65]) -> bool;
}

/// Always reports the signature as valid. For tests of admission logic that
/// are not exercising signature verification itself.
#[derive(Clone, Copy, Default)]
pub struct AlwaysValid;

impl SignatureVerifier for AlwaysValid {
    fn ecdsa_verify(&self, _sender: &Address, _digest: &[u8; 32], _signature: &[u8; 65]) -> bool {
        true
    }
}

/// Always reports the signature as invalid.
#[derive(Clone, Copy, Default)]
pub struct AlwaysInvalid;

impl SignatureVerifier for AlwaysInvalid {
    fn ecdsa_verify(&self, _sender: &Address, _digest: &[u8; 32], _signature: &[u8; 65]) -> bool {
        false
    }
}

fn keccak256(input: &[u8]) -> [u8; 32] {
    let mut output = [0u8; 32];
    let mut hasher = tiny_keccak::Keccak::v256();
    hasher.update(input);
    hasher.finalize(&mut output);
    output
}

fn eth_address_from_public_key(public: &secp256k1::PublicKey) -> Address {
    // strip the leading tag byte before hashing, as Ethereum addresses are
    // derived from the raw 64-byte point, not the SEC1-tagged encoding.
    let serialized = public.serialize();
    let hash = keccak256(&serialized[1..]);
    Address::from(<[u8; 20]>::try_from(&hash[12..]).expect("keccak output is 32 bytes"))
}

/// Production `SignatureVerifier`: secp256k1 recoverable-signature ->
/// public key -> Ethereum-style address, compared against `sender`.
#[derive(Clone, Copy, Default)]
pub struct Secp256k1Verifier;

impl SignatureVerifier for Secp256k1Verifier {
    fn ecdsa_verify(&self, sender: &Address, digest: &[u8; 32], signature: &[u8; 65]) -> bool {
        let message = secp256k1::Message::parse(digest);

        let v = signature[64];
        let recovery_id = if v >= ETH_ADD_TO_V {
            v - ETH_ADD_TO_V
        } else {
            v
        };
        let recovery_id = match secp256k1::RecoveryId::parse(recovery_id) {
            Ok(r) => r,
            Err(_) => return false,
        };
        let parsed_signature = match secp256k1::Signature::parse_slice(&signature[0..64]) {
            Ok(s) => s,
            Err(_) => return false,
        };

        let public_key = match secp256k1::recover(&message, &parsed_signature, &recovery_id) {
            Ok(pk) => pk,
            Err(_) => return false,
        };

        &eth_address_from_public_key(&public_key) == sender
    }
}

/// Builds the digest signed for a state update: big-endian packed
/// `chain_id (4) || contract_id (20) || channel_id (32) || amount*10^18 (32)`,
/// hashed with SHA-256.
pub fn digest_for_state_update(
    chain_id: u32,
    contract_id: &Address,
    channel_id: &crate::address::Hash32,
    amount: &Wei,
) -> Result<[u8; 32], CryptoError> {
    let scaled = amount.scaled_by_pow10(18);

    let mut bytes = Vec::with_capacity(4 + 20 + 32 + 32);
    bytes.extend(hex::decode(pack(4, &BigUint::from(chain_id))?).unwrap());
    bytes.extend_from_slice(contract_id.as_bytes());
    bytes.extend_from_slice(channel_id.as_bytes());
    bytes.extend(hex::decode(pack(32, scaled.as_biguint())?).unwrap());

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    Ok(out)
}

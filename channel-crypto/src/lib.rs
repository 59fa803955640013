mod address;
mod error;
mod pack;
mod sign;
mod wei;

pub use address::{eth_decode_hex, Address, Hash32, Signature65};
pub use error::CryptoError;
pub use pack::pack;
pub use sign::{digest_for_state_update, AlwaysInvalid, AlwaysValid, Secp256k1Verifier, SignatureVerifier};
pub use wei::Wei;

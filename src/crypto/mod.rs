mod hashing;
mod signing;

pub use hashing::{generate_license_key, hash_fingerprint, hash_license_key};
pub use signing::{
    canonical_claims, encode_public_key, generate_key_pair, sign_claims, verify_claims,
    verify_signature,
};

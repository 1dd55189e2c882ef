//! Per-license Ed25519 key generation, signing and verification.
//!
//! Key generation is stateless: every license gets a fresh key pair, the
//! signing half is consumed by [`sign_claims`] and dropped (zeroized) when
//! that call returns. Only the verifying key is ever persisted.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::{RngCore, rngs::OsRng};

use crate::error::{AppError, Result};
use crate::models::LicenseClaims;

/// Generate a fresh key pair from the OS RNG.
pub fn generate_key_pair() -> Result<(VerifyingKey, SigningKey)> {
    let mut seed = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut seed)
        .map_err(|e| AppError::CryptoFailure(format!("RNG unavailable: {}", e)))?;
    let signing_key = SigningKey::from_bytes(&seed);
    seed.fill(0);
    Ok((signing_key.verifying_key(), signing_key))
}

/// Canonical bytes of a claim set. Struct field order plus the sorted
/// feature map make this deterministic.
pub fn canonical_claims(claims: &LicenseClaims) -> Result<String> {
    Ok(serde_json::to_string(claims)?)
}

/// Sign the canonical serialization of `claims`, consuming the signing key.
///
/// Returns `(signed_data, base64 signature)`.
pub fn sign_claims(signing_key: SigningKey, claims: &LicenseClaims) -> Result<(String, String)> {
    let signed_data = canonical_claims(claims)?;
    let signature = signing_key
        .try_sign(signed_data.as_bytes())
        .map_err(|e| AppError::CryptoFailure(format!("signing failed: {}", e)))?;
    Ok((signed_data, BASE64.encode(signature.to_bytes())))
}

pub fn encode_public_key(key: &VerifyingKey) -> String {
    BASE64.encode(key.to_bytes())
}

fn decode_public_key(public_key: &str) -> Option<VerifyingKey> {
    let bytes = BASE64.decode(public_key).ok()?;
    let bytes: [u8; 32] = bytes.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

/// Check `signature` over `signed_data` with `public_key` (both base64).
/// Malformed keys or signatures verify as false.
pub fn verify_signature(signed_data: &str, signature: &str, public_key: &str) -> bool {
    let Some(verifying_key) = decode_public_key(public_key) else {
        return false;
    };
    let Ok(sig_bytes) = BASE64.decode(signature) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    verifying_key
        .verify_strict(signed_data.as_bytes(), &signature)
        .is_ok()
}

/// Verify and decode a signed claim set, as an offline client would.
pub fn verify_claims(
    signed_data: &str,
    signature: &str,
    public_key: &str,
) -> Option<LicenseClaims> {
    if !verify_signature(signed_data, signature, public_key) {
        return None;
    }
    serde_json::from_str(signed_data).ok()
}

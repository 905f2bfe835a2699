//! Signature verification
//!
//! Each settlement platform signs orders with its own scheme:
//! - Ethereum: EIP-191 personal message, secp256k1 recoverable signature,
//!   compared against the sender's 0x address.
//! - Algorand: Ed25519 over the "MX"-prefixed message, checked against the
//!   sender's base32 address.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use data_encoding::BASE32_NOPAD;
use ed25519_dalek::Verifier;
use sha2::Sha512_256;
use sha3::{Digest, Keccak256};
use swapbook_matching_engine::Platform;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid public key")]
    InvalidPubkey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Signature verification failed")]
    VerificationFailed,
    #[error("Signature belongs to a different key")]
    KeyMismatch,
}

/// One platform's signing scheme
pub trait SignatureScheme: Send + Sync {
    fn verify(&self, payload: &[u8], signature: &str, claimed_key: &str) -> Result<(), AuthError>;
}

pub struct EthereumScheme;

pub struct AlgorandScheme;

pub fn scheme_for(platform: Platform) -> &'static dyn SignatureScheme {
    match platform {
        Platform::Ethereum => &EthereumScheme,
        Platform::Algorand => &AlgorandScheme,
    }
}

/// Capability handed to the trade service
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, platform: Platform, payload: &[u8], signature: &str, claimed_key: &str) -> bool;
}

/// Dispatches on the order's platform
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformVerifier;

impl SignatureVerifier for PlatformVerifier {
    fn verify(&self, platform: Platform, payload: &[u8], signature: &str, claimed_key: &str) -> bool {
        match scheme_for(platform).verify(payload, signature, claimed_key) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(%platform, error = %e, "Signature rejected");
                false
            }
        }
    }
}

// ==================== Ethereum ====================

fn eip191_digest(message: &[u8]) -> Vec<u8> {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message);
    hasher.finalize().to_vec()
}

/// 0x-prefixed lowercase address of a secp256k1 key
pub fn ethereum_address(key: &k256::ecdsa::VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

impl SignatureScheme for EthereumScheme {
    fn verify(&self, payload: &[u8], signature: &str, claimed_key: &str) -> Result<(), AuthError> {
        use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

        let raw = hex::decode(signature.trim_start_matches("0x"))
            .map_err(|_| AuthError::InvalidSignature)?;
        if raw.len() != 65 {
            return Err(AuthError::InvalidSignature);
        }

        let sig = Signature::from_slice(&raw[..64]).map_err(|_| AuthError::InvalidSignature)?;
        let v = match raw[64] {
            27 | 28 => raw[64] - 27,
            v => v,
        };
        let recovery_id = RecoveryId::from_byte(v).ok_or(AuthError::InvalidSignature)?;

        let key = VerifyingKey::recover_from_prehash(&eip191_digest(payload), &sig, recovery_id)
            .map_err(|_| AuthError::VerificationFailed)?;

        if ethereum_address(&key).eq_ignore_ascii_case(claimed_key) {
            Ok(())
        } else {
            Err(AuthError::KeyMismatch)
        }
    }
}

// ==================== Algorand ====================

const ALGORAND_PREFIX: &[u8] = b"MX";

/// Decode a 58-character Algorand address into its Ed25519 key
pub fn algorand_key(address: &str) -> Result<ed25519_dalek::VerifyingKey, AuthError> {
    let raw = BASE32_NOPAD
        .decode(address.as_bytes())
        .map_err(|_| AuthError::InvalidPubkey)?;
    if raw.len() != 36 {
        return Err(AuthError::InvalidPubkey);
    }

    let (key, checksum) = raw.split_at(32);
    let digest = Sha512_256::digest(key);
    if &digest[28..] != checksum {
        return Err(AuthError::InvalidPubkey);
    }

    let bytes: [u8; 32] = key.try_into().map_err(|_| AuthError::InvalidPubkey)?;
    ed25519_dalek::VerifyingKey::from_bytes(&bytes).map_err(|_| AuthError::InvalidPubkey)
}

/// Encode an Ed25519 key as an Algorand address
pub fn algorand_address(key: &ed25519_dalek::VerifyingKey) -> String {
    let bytes = key.to_bytes();
    let digest = Sha512_256::digest(bytes);
    let mut raw = bytes.to_vec();
    raw.extend_from_slice(&digest[28..]);
    BASE32_NOPAD.encode(&raw)
}

impl SignatureScheme for AlgorandScheme {
    fn verify(&self, payload: &[u8], signature: &str, claimed_key: &str) -> Result<(), AuthError> {
        let key = algorand_key(claimed_key)?;

        let raw = BASE64.decode(signature).map_err(|_| AuthError::InvalidSignature)?;
        let sig = ed25519_dalek::Signature::from_slice(&raw).map_err(|_| AuthError::InvalidSignature)?;

        let mut message = ALGORAND_PREFIX.to_vec();
        message.extend_from_slice(payload);

        key.verify(&message, &sig).map_err(|_| AuthError::VerificationFailed)
    }
}

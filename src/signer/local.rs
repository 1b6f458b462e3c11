//! In-process ed25519 signer for development and tests

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::{Error, Result};

use super::{SignedTransfer, TransactionSigner};

/// ed25519 key held in memory
pub struct LocalSigner {
    key: SigningKey,
}

impl std::fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSigner")
            .field("public_key", &self.public_key_b58())
            .finish()
    }
}

impl LocalSigner {
    /// Fresh random key
    pub fn generate() -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Load from a hex-encoded 32-byte secret
    pub fn from_hex(secret_hex: &str) -> Result<Self> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| Error::Signer(format!("Invalid secret key hex: {}", e)))?;
        let secret: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            Error::Signer(format!("Secret key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self {
            key: SigningKey::from_bytes(&secret),
        })
    }

    /// Hex secret, for `keygen` output only
    pub fn secret_hex(&self) -> String {
        hex::encode(self.key.to_bytes())
    }

    pub fn public_key_b58(&self) -> String {
        bs58::encode(self.key.verifying_key().as_bytes()).into_string()
    }
}

/// Check a signed transfer's signature against its claimed signer
pub fn verify_signed_transfer(signed: &SignedTransfer) -> Result<bool> {
    let key_bytes = bs58::decode(&signed.signer)
        .into_vec()
        .map_err(|e| Error::Signer(format!("Invalid signer key: {}", e)))?;
    let key_bytes: [u8; 32] = key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::Signer("Signer key must be 32 bytes".to_string()))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| Error::Signer(format!("Invalid signer key: {}", e)))?;

    let sig_bytes = bs58::decode(&signed.signature)
        .into_vec()
        .map_err(|e| Error::Signer(format!("Invalid signature encoding: {}", e)))?;
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return Ok(false);
    };

    let message = signed.transaction.message()?;
    Ok(key.verify(&message, &signature).is_ok())
}

#[async_trait]
impl TransactionSigner for LocalSigner {
    fn backend(&self) -> &str {
        "local"
    }

    async fn public_key(&self) -> Result<String> {
        Ok(self.public_key_b58())
    }

    async fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.key.sign(message).to_bytes().to_vec())
    }
}

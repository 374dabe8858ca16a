//! Request body cipher.
//!
//! Bodies of every call after the partner login are encrypted with the
//! partner's symmetric keys and sent as lowercase hex. The keys are secrets
//! supplied through [`PartnerConfig`](core_runtime::config::PartnerConfig);
//! the algorithm sits behind [`BodyCipher`] so hosts can swap it.

use crate::error::{Fault, FaultCode, Result};
use blowfish::cipher::generic_array::GenericArray;
use blowfish::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use blowfish::Blowfish;
use std::fmt;

const BLOCK_SIZE: usize = 8;

/// Symmetric cipher applied to request bodies and server-encrypted fields.
pub trait BodyCipher: Send + Sync {
    /// Encrypt `plain` and return hex cipher-text.
    fn encrypt(&self, plain: &[u8]) -> String;

    /// Decode hex cipher-text and decrypt it. Trailing padding is left in place.
    fn decrypt(&self, hex_text: &str) -> Result<Vec<u8>>;
}

/// Blowfish in ECB mode with zero padding.
pub struct BlowfishCipher {
    encryptor: Blowfish,
    decryptor: Blowfish,
}

impl BlowfishCipher {
    /// `encrypt_key` protects outgoing bodies, `decrypt_key` opens values the
    /// server encrypts (the partner `syncTime`).
    pub fn new(encrypt_key: &str, decrypt_key: &str) -> Result<Self> {
        Ok(Self {
            encryptor: Self::schedule(encrypt_key)?,
            decryptor: Self::schedule(decrypt_key)?,
        })
    }

    fn schedule(key: &str) -> Result<Blowfish> {
        Blowfish::new_from_slice(key.as_bytes()).map_err(|_| {
            Fault::with_message(
                FaultCode::ConfigError,
                format!("Cipher key must be 4-56 bytes, got {}", key.len()),
            )
        })
    }
}

impl BodyCipher for BlowfishCipher {
    fn encrypt(&self, plain: &[u8]) -> String {
        let padded_len = plain.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        let mut buffer = plain.to_vec();
        buffer.resize(padded_len, 0);

        for block in buffer.chunks_exact_mut(BLOCK_SIZE) {
            self.encryptor
                .encrypt_block(GenericArray::from_mut_slice(block));
        }

        hex::encode(buffer)
    }

    fn decrypt(&self, hex_text: &str) -> Result<Vec<u8>> {
        let mut buffer = hex::decode(hex_text.trim()).map_err(Fault::bad_response)?;
        if buffer.len() % BLOCK_SIZE != 0 {
            return Err(Fault::bad_response(format!(
                "cipher-text length {} is not a multiple of {}",
                buffer.len(),
                BLOCK_SIZE
            )));
        }

        for block in buffer.chunks_exact_mut(BLOCK_SIZE) {
            self.decryptor
                .decrypt_block(GenericArray::from_mut_slice(block));
        }

        Ok(buffer)
    }
}

impl fmt::Debug for BlowfishCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlowfishCipher").finish_non_exhaustive()
    }
}

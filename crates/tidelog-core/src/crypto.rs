//! Derives the per-user identity and encryption key from a secret, and
//! provides authenticated encryption/decryption between [`HistoryEntry`]
//! and its wire form [`EncryptedEntry`].

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL_SAFE;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::entry::{EncryptedEntry, HistoryEntry};
use crate::errors::{Error, Result};

const NONCE_SIZE: usize = 12;
const USER_ID_CONTEXT: &[u8] = b"user_id";
const ENCRYPTION_KEY_CONTEXT: &[u8] = b"encryption_key";

type HmacSha256 = Hmac<Sha256>;

/// The two values deterministically derived from a user secret.
#[derive(Clone)]
pub struct Identity {
    /// The only user handle the relay ever sees.
    pub user_id: String,
    enc_key: [u8; 32],
}

impl Identity {
    /// Derives `UserId` and `EncKey` from `secret`. Deterministic: the same
    /// secret always yields the same identity, which is what lets every
    /// device sharing the secret converge on the same `UserId`.
    pub fn derive(secret: &str) -> Result<Self> {
        // `UserId` is the one value the relay and its URLs/headers see, so it
        // uses the url-safe alphabet; the wire envelope's ciphertext/nonce
        // fields go over JSON instead and keep the standard alphabet.
        let user_id = BASE64_URL_SAFE.encode(hmac_digest(secret, USER_ID_CONTEXT)?);
        let enc_key = hmac_digest(secret, ENCRYPTION_KEY_CONTEXT)?;
        Ok(Self { user_id, enc_key })
    }

    /// Encrypts `entry` under this identity's key, producing the wire form.
    /// A fresh random 96-bit nonce is drawn per call; `UserId` is bound as
    /// AEAD associated data.
    pub fn encrypt(&self, entry: &HistoryEntry) -> Result<EncryptedEntry> {
        let cipher = Aes256Gcm::new_from_slice(&self.enc_key)
            .map_err(|e| Error::crypto(format!("invalid key: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let plaintext = serde_json::to_vec(entry)?;
        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: &plaintext,
                    aad: self.user_id.as_bytes(),
                },
            )
            .map_err(|e| Error::crypto(format!("encryption failed: {e}")))?;

        Ok(EncryptedEntry {
            encrypted_data: BASE64.encode(ciphertext),
            nonce: BASE64.encode(nonce_bytes),
            user_id: self.user_id.clone(),
            date: entry.end_time,
            encrypted_id: entry.entry_id.clone(),
            read_count: 0,
            device_id: entry.device_id.clone(),
        })
    }

    /// Decrypts `envelope`. Fails hard (no partial data returned) if the
    /// envelope's `UserId` does not match this identity, or if the decrypted
    /// entry's `EntryId` disagrees with the envelope's `EncryptedId`.
    pub fn decrypt(&self, envelope: &EncryptedEntry) -> Result<HistoryEntry> {
        if envelope.user_id != self.user_id {
            return Err(Error::crypto("envelope user_id does not match this identity"));
        }

        let cipher = Aes256Gcm::new_from_slice(&self.enc_key)
            .map_err(|e| Error::crypto(format!("invalid key: {e}")))?;

        let nonce_bytes = BASE64
            .decode(&envelope.nonce)
            .map_err(|e| Error::crypto(format!("invalid nonce encoding: {e}")))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(Error::crypto("nonce has unexpected length"));
        }
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = BASE64
            .decode(&envelope.encrypted_data)
            .map_err(|e| Error::crypto(format!("invalid ciphertext encoding: {e}")))?;

        let plaintext = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &ciphertext,
                    aad: self.user_id.as_bytes(),
                },
            )
            .map_err(|_| Error::crypto("AEAD decryption failed"))?;

        let entry: HistoryEntry = serde_json::from_slice(&plaintext)?;

        if !entry.entry_id.is_empty()
            && !envelope.encrypted_id.is_empty()
            && entry.entry_id != envelope.encrypted_id
        {
            return Err(Error::crypto("entry_id does not match envelope's encrypted_id"));
        }

        Ok(entry)
    }
}

fn hmac_digest(secret: &str, context: &[u8]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::crypto(format!("HMAC key error: {e}")))?;
    mac.update(context);
    let result = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(entry_id: &str, end_time: i64) -> HistoryEntry {
        HistoryEntry {
            local_username: "alice".into(),
            hostname: "box1".into(),
            home_directory: "/home/alice".into(),
            command: "ls -la".into(),
            current_working_directory: "/home/alice".into(),
            exit_code: 0,
            start_time: end_time - 1,
            end_time,
            device_id: "dev-1".into(),
            entry_id: entry_id.into(),
            custom_columns: vec![],
        }
    }

    #[test]
    fn derive_is_deterministic() {
        let a = Identity::derive("k").unwrap();
        let b = Identity::derive("k").unwrap();
        assert_eq!(a.user_id, b.user_id);
    }

    #[test]
    fn different_secrets_yield_different_user_ids() {
        let a = Identity::derive("k1").unwrap();
        let b = Identity::derive("k2").unwrap();
        assert_ne!(a.user_id, b.user_id);
    }

    #[test]
    fn round_trip_with_same_secret() {
        let id = Identity::derive("k").unwrap();
        let entry = sample("entry-1", 100);
        let envelope = id.encrypt(&entry).unwrap();
        let decrypted = id.decrypt(&envelope).unwrap();
        assert_eq!(entry, decrypted);
    }

    #[test]
    fn identical_plaintexts_get_distinct_nonces_and_ciphertexts() {
        let id = Identity::derive("k").unwrap();
        let e1 = sample("entry-1", 100);
        let e2 = sample("entry-2", 110);
        let env1 = id.encrypt(&e1).unwrap();
        let env2 = id.encrypt(&e2).unwrap();
        assert_ne!(env1.nonce, env2.nonce);
        assert_ne!(env1.encrypted_data, env2.encrypted_data);
    }

    #[test]
    fn decrypt_fails_on_user_id_mismatch() {
        let id_a = Identity::derive("k1").unwrap();
        let id_b = Identity::derive("k2").unwrap();
        let envelope = id_a.encrypt(&sample("entry-1", 100)).unwrap();
        assert!(id_b.decrypt(&envelope).is_err());
    }

    #[test]
    fn decrypt_fails_on_tampered_entry_id() {
        let id = Identity::derive("k").unwrap();
        let mut envelope = id.encrypt(&sample("entry-1", 100)).unwrap();
        envelope.encrypted_id = "entry-evil".into();
        assert!(id.decrypt(&envelope).is_err());
    }

    #[test]
    fn decrypt_fails_on_corrupted_ciphertext() {
        let id = Identity::derive("k").unwrap();
        let mut envelope = id.encrypt(&sample("entry-1", 100)).unwrap();
        envelope.encrypted_data = BASE64.encode(b"not valid ciphertext at all");
        assert!(id.decrypt(&envelope).is_err());
    }
}

//! Encrypted key package storage
//!
//! Each participant's key package is encrypted at rest with AES-256-GCM under a
//! password-derived key. The public key package is not secret and is kept as plain
//! JSON next to the encrypted shares.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::error::ProtocolError;
use crate::keys::{KeyPackage, PublicKeyPackage};

const KEY_FILE_VERSION: u8 = 1;
const KDF_DOMAIN: &[u8] = b"assetman-keystore-v1";

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("encryption error: {0}")]
    Encryption(String),
    #[error("decryption error: {0}")]
    Decryption(String),
    #[error("key material error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("key not found: {0}")]
    KeyNotFound(PathBuf),
    #[error("invalid password")]
    InvalidPassword,
    #[error("unsupported key file version {0}")]
    UnsupportedVersion(u8),
}

/// On-disk format of an encrypted key package
#[derive(Debug, Serialize, Deserialize)]
struct EncryptedKeyFile {
    version: u8,
    participant: u16,
    /// hex
    salt: String,
    /// hex
    nonce: String,
    /// hex
    ciphertext: String,
    /// Group public key (hex), readable without the password
    group_public_key: String,
}

/// Plaintext sealed inside `EncryptedKeyFile::ciphertext`
#[derive(Serialize, Deserialize)]
struct KeyShareData {
    key_package: Vec<u8>,
    public_key_package: Vec<u8>,
    min_signers: u16,
    max_signers: u16,
}

/// Public key package file, `group.json`
#[derive(Debug, Serialize, Deserialize)]
struct PublicKeyFile {
    min_signers: u16,
    max_signers: u16,
    group_public_key: String,
    public_key_package: String,
}

/// Encrypted key file of one participant
pub struct Keystore {
    key_path: PathBuf,
    participant: u16,
}

impl Keystore {
    pub fn new(key_path: impl AsRef<Path>, participant: u16) -> Self {
        Self {
            key_path: key_path.as_ref().to_path_buf(),
            participant,
        }
    }

    /// Keystore at `dir/participant{N}.key.enc`
    pub fn in_dir(dir: impl AsRef<Path>, participant: u16) -> Self {
        Self::new(
            dir.as_ref().join(format!("participant{participant}.key.enc")),
            participant,
        )
    }

    pub fn path(&self) -> &Path {
        &self.key_path
    }

    pub fn exists(&self) -> bool {
        self.key_path.exists()
    }

    fn derive_key(password: &str, salt: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hasher.update(salt);
        hasher.update(KDF_DOMAIN);
        hasher.finalize().into()
    }

    /// Encrypt `key_package` with `password` and write it
    pub fn save(
        &self,
        key_package: &KeyPackage,
        public_key_package: &PublicKeyPackage,
        password: &str,
    ) -> Result<(), KeystoreError> {
        if key_package.identifier().index() != self.participant {
            return Err(KeystoreError::Encryption(format!(
                "key package of participant {} cannot be stored for participant {}",
                key_package.identifier(),
                self.participant
            )));
        }

        let data = KeyShareData {
            key_package: key_package.serialize()?,
            public_key_package: public_key_package.serialize()?,
            min_signers: public_key_package.min_signers(),
            max_signers: public_key_package.max_signers(),
        };
        let plaintext = serde_json::to_vec(&data)?;

        let mut salt = [0u8; 16];
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let key = Self::derive_key(password, &salt);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| KeystoreError::Encryption(e.to_string()))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_ref())
            .map_err(|e| KeystoreError::Encryption(e.to_string()))?;

        let encrypted = EncryptedKeyFile {
            version: KEY_FILE_VERSION,
            participant: self.participant,
            salt: hex::encode(salt),
            nonce: hex::encode(nonce_bytes),
            ciphertext: hex::encode(ciphertext),
            group_public_key: public_key_package.group_key().to_hex()?,
        };

        write_json(&self.key_path, &encrypted)?;

        tracing::info!(
            participant = self.participant,
            path = %self.key_path.display(),
            "Saved encrypted key package"
        );
        Ok(())
    }

    /// Decrypt the key package and its public key package
    pub fn load(&self, password: &str) -> Result<(KeyPackage, PublicKeyPackage), KeystoreError> {
        let encrypted = self.read_file()?;

        if encrypted.participant != self.participant {
            return Err(KeystoreError::Decryption(format!(
                "participant mismatch: expected {}, got {}",
                self.participant, encrypted.participant
            )));
        }

        let salt = decode_hex(&encrypted.salt)?;
        let nonce_bytes = decode_hex(&encrypted.nonce)?;
        let ciphertext = decode_hex(&encrypted.ciphertext)?;
        if nonce_bytes.len() != 12 {
            return Err(KeystoreError::Decryption(format!(
                "nonce must be 12 bytes, got {}",
                nonce_bytes.len()
            )));
        }

        let key = Self::derive_key(password, &salt);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| KeystoreError::Decryption(e.to_string()))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| KeystoreError::InvalidPassword)?;

        let data: KeyShareData = serde_json::from_slice(&plaintext)?;
        let key_package = KeyPackage::deserialize(self.participant, &data.key_package)?;
        let public_key_package = PublicKeyPackage::deserialize(
            &data.public_key_package,
            data.min_signers,
            data.max_signers,
        )?;

        tracing::info!(
            participant = self.participant,
            path = %self.key_path.display(),
            "Loaded key package"
        );
        Ok((key_package, public_key_package))
    }

    /// Group public key (hex) from the file header, without decrypting
    pub fn group_public_key(&self) -> Result<String, KeystoreError> {
        Ok(self.read_file()?.group_public_key)
    }

    fn read_file(&self) -> Result<EncryptedKeyFile, KeystoreError> {
        if !self.exists() {
            return Err(KeystoreError::KeyNotFound(self.key_path.clone()));
        }
        let json = std::fs::read_to_string(&self.key_path)?;
        let encrypted: EncryptedKeyFile = serde_json::from_str(&json)?;
        if encrypted.version != KEY_FILE_VERSION {
            return Err(KeystoreError::UnsupportedVersion(encrypted.version));
        }
        Ok(encrypted)
    }
}

/// Write the public key package as JSON
pub fn save_public_key_package(
    path: impl AsRef<Path>,
    package: &PublicKeyPackage,
) -> Result<(), KeystoreError> {
    let file = PublicKeyFile {
        min_signers: package.min_signers(),
        max_signers: package.max_signers(),
        group_public_key: package.group_key().to_hex()?,
        public_key_package: hex::encode(package.serialize()?),
    };
    write_json(path.as_ref(), &file)
}

pub fn load_public_key_package(path: impl AsRef<Path>) -> Result<PublicKeyPackage, KeystoreError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(KeystoreError::KeyNotFound(path.to_path_buf()));
    }
    let file: PublicKeyFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let bytes = decode_hex(&file.public_key_package)?;
    let package = PublicKeyPackage::deserialize(&bytes, file.min_signers, file.max_signers)?;

    if package.group_key().to_hex()? != file.group_public_key {
        return Err(KeystoreError::Decryption(format!(
            "{}: group public key does not match the stored package",
            path.display()
        )));
    }
    Ok(package)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), KeystoreError> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, json)?;
    Ok(())
}

fn decode_hex(s: &str) -> Result<Vec<u8>, KeystoreError> {
    hex::decode(s).map_err(|e| KeystoreError::Decryption(e.to_string()))
}

// src/params/file.rs

//! Passphrase-encrypted parameter file.
//!
//! Layout (JSON):
//!
//! ```text
//! { "version": 1,
//!   "kdf": { "salt": b64, "m_cost": .., "t_cost": .., "p_cost": .. },
//!   "check": { "nonce": b64, "ciphertext": b64 },
//!   "entries": { "<hex id>": { "nonce": b64, "ciphertext": b64 } } }
//! ```
//!
//! The passphrase goes through argon2id; two independent keys are derived
//! from the result with blake3. Entry ids are a keyed hash of
//! `namespace/key`, so names are not readable from the file. Values are
//! sealed with XChaCha20-Poly1305 using the entry id as associated data.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use chacha20poly1305::aead::rand_core::RngCore;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::BoxFuture;
use crate::errors::ParameterError;
use crate::fs::FileSystem;
use crate::params::backend::{ParameterBackend, unavailable};
use crate::params::secret::SecretValue;

const FORMAT_VERSION: u32 = 1;
const SALT_LEN: usize = 16;
const CHECK_PLAINTEXT: &[u8] = b"parci parameter file";
const CHECK_AAD: &[u8] = b"check";
const NAME_KEY_CONTEXT: &str = "parci 2025 parameter file entry names";
const VALUE_KEY_CONTEXT: &str = "parci 2025 parameter file entry values";

/// argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfCost {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl KdfCost {
    /// Minimal cost; only meant for tests.
    pub const fn fast() -> Self {
        Self {
            m_cost: 8,
            t_cost: 1,
            p_cost: 1,
        }
    }
}

impl Default for KdfCost {
    fn default() -> Self {
        Self {
            m_cost: 19_456,
            t_cost: 2,
            p_cost: 1,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct KdfHeader {
    salt: String,
    #[serde(flatten)]
    cost: KdfCost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedEntry {
    nonce: String,
    ciphertext: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    kdf: KdfHeader,
    check: SealedEntry,
    #[serde(default)]
    entries: BTreeMap<String, SealedEntry>,
}

struct Keys {
    name_key: Zeroizing<[u8; 32]>,
    value_key: Zeroizing<[u8; 32]>,
}

impl Keys {
    fn derive(passphrase: &[u8], salt: &[u8], cost: KdfCost) -> Result<Self, ParameterError> {
        let params = Params::new(cost.m_cost, cost.t_cost, cost.p_cost, Some(32))
            .map_err(|e| unavailable("file", format!("invalid KDF parameters: {e}")))?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut master = Zeroizing::new([0u8; 32]);
        argon
            .hash_password_into(passphrase, salt, &mut master[..])
            .map_err(|e| unavailable("file", format!("key derivation failed: {e}")))?;

        Ok(Self {
            name_key: Zeroizing::new(blake3::derive_key(NAME_KEY_CONTEXT, &master[..])),
            value_key: Zeroizing::new(blake3::derive_key(VALUE_KEY_CONTEXT, &master[..])),
        })
    }

    fn entry_id(&self, namespace: &str, key: &str) -> String {
        let material = format!("{namespace}/{key}");
        blake3::keyed_hash(&self.name_key, material.as_bytes())
            .to_hex()
            .to_string()
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(&self.value_key[..]))
    }

    fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<SealedEntry, ParameterError> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher()
            .encrypt(&nonce, Payload { msg: plaintext, aad })
            .map_err(|_| unavailable("file", "encryption failed"))?;
        Ok(SealedEntry {
            nonce: B64.encode(nonce),
            ciphertext: B64.encode(ciphertext),
        })
    }

    /// `None` when the entry does not authenticate under these keys.
    fn open(&self, entry: &SealedEntry, aad: &[u8]) -> Result<Option<Vec<u8>>, ParameterError> {
        let nonce = B64
            .decode(&entry.nonce)
            .map_err(|_| corrupt("entry nonce is not base64"))?;
        if nonce.len() != 24 {
            return Err(corrupt("entry nonce has the wrong length"));
        }
        let ciphertext = B64
            .decode(&entry.ciphertext)
            .map_err(|_| corrupt("entry ciphertext is not base64"))?;

        Ok(self
            .cipher()
            .decrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad,
                },
            )
            .ok())
    }
}

/// Encrypted file backend.
pub struct FileBackend {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    keys: Keys,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileBackend {
    /// Create a new, empty parameter file. Refuses to overwrite.
    pub fn init(
        path: impl Into<PathBuf>,
        passphrase: &[u8],
        cost: KdfCost,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self, ParameterError> {
        let path = path.into();
        if fs.exists(&path) {
            return Err(ParameterError::AccessDenied {
                name: path.display().to_string(),
                reason: "parameter file already exists".to_string(),
            });
        }

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let keys = Keys::derive(passphrase, &salt, cost)?;

        let file = StoreFile {
            version: FORMAT_VERSION,
            kdf: KdfHeader {
                salt: B64.encode(salt),
                cost,
            },
            check: keys.seal(CHECK_PLAINTEXT, CHECK_AAD)?,
            entries: BTreeMap::new(),
        };
        write_file(fs.as_ref(), &path, &file)?;
        info!(path = %path.display(), "initialized parameter file");

        Ok(Self {
            path,
            fs,
            keys,
            lock: Mutex::new(()),
        })
    }

    /// Open an existing parameter file and verify the passphrase.
    pub fn open(
        path: impl Into<PathBuf>,
        passphrase: &[u8],
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self, ParameterError> {
        let path = path.into();
        let file = read_file(fs.as_ref(), &path)?;
        if file.version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported parameter file version {}",
                file.version
            )));
        }

        let salt = B64
            .decode(&file.kdf.salt)
            .map_err(|_| corrupt("salt is not base64"))?;
        let keys = Keys::derive(passphrase, &salt, file.kdf.cost)?;

        match keys.open(&file.check, CHECK_AAD)? {
            Some(plain) if plain == CHECK_PLAINTEXT => {}
            _ => {
                return Err(ParameterError::AccessDenied {
                    name: path.display().to_string(),
                    reason: "wrong passphrase".to_string(),
                });
            }
        }
        debug!(path = %path.display(), entries = file.entries.len(), "opened parameter file");

        Ok(Self {
            path,
            fs,
            keys,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ParameterBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<SecretValue, ParameterError>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let file = read_file(self.fs.as_ref(), &self.path)?;
            let id = self.keys.entry_id(namespace, key);

            let entry = file.entries.get(&id).ok_or_else(|| ParameterError::NotFound {
                name: key.to_string(),
            })?;
            match self.keys.open(entry, id.as_bytes())? {
                Some(plain) => Ok(SecretValue::new(plain)),
                None => Err(corrupt(format!("entry for '{key}' failed authentication"))),
            }
        })
    }

    fn put<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
        value: &'a SecretValue,
    ) -> BoxFuture<'a, Result<(), ParameterError>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut file = read_file(self.fs.as_ref(), &self.path)?;
            let id = self.keys.entry_id(namespace, key);
            let sealed = self.keys.seal(value.expose(), id.as_bytes())?;
            file.entries.insert(id, sealed);
            write_file(self.fs.as_ref(), &self.path, &file)?;
            debug!(namespace, key, "stored parameter");
            Ok(())
        })
    }

    fn delete<'a>(
        &'a self,
        namespace: &'a str,
        key: &'a str,
    ) -> BoxFuture<'a, Result<(), ParameterError>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut file = read_file(self.fs.as_ref(), &self.path)?;
            let id = self.keys.entry_id(namespace, key);
            if file.entries.remove(&id).is_none() {
                return Err(ParameterError::NotFound {
                    name: key.to_string(),
                });
            }
            write_file(self.fs.as_ref(), &self.path, &file)?;
            debug!(namespace, key, "deleted parameter");
            Ok(())
        })
    }
}

fn read_file(fs: &dyn FileSystem, path: &Path) -> Result<StoreFile, ParameterError> {
    let bytes = fs.read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => unavailable(
            "file",
            format!("parameter file not found: {}", path.display()),
        ),
        _ => unavailable("file", format!("cannot read {}: {e}", path.display())),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| corrupt(format!("invalid parameter file: {e}")))
}

fn write_file(fs: &dyn FileSystem, path: &Path, file: &StoreFile) -> Result<(), ParameterError> {
    let bytes = serde_json::to_vec_pretty(file)
        .map_err(|e| unavailable("file", format!("cannot encode parameter file: {e}")))?;
    fs.write_atomic(path, &bytes)
        .map_err(|e| unavailable("file", format!("cannot write {}: {e}", path.display())))
}

fn corrupt(reason: impl Into<String>) -> ParameterError {
    unavailable("file", reason)
}

//! [`NoteStore`] backends.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::error::ClientError;
use crate::ledger::{LedgerSnapshot, NoteStore};

pub const LEDGER_KEY_ENV: &str = "ZYLITH_LEDGER_KEY";
const LEDGER_AAD: &[u8] = b"zylith-ledger-v1";
const SEALED_VERSION: u8 = 1;

#[derive(Default)]
pub struct MemoryNoteStore {
    snapshot: Mutex<LedgerSnapshot>,
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn load(&self) -> Result<LedgerSnapshot, ClientError> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn store(&self, snapshot: &LedgerSnapshot) -> Result<(), ClientError> {
        *self.snapshot.lock().await = snapshot.clone();
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct SealedLedger {
    version: u8,
    nonce: String,
    ciphertext: String,
}

/// JSON ledger on disk, replaced atomically via a temp file and rename.
/// With a key, the file holds a XChaCha20-Poly1305 envelope instead of
/// plaintext.
pub struct FileNoteStore {
    path: PathBuf,
    key: Option<Zeroizing<[u8; 32]>>,
}

impl FileNoteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: [u8; 32]) -> Self {
        self.key = Some(Zeroizing::new(key));
        self
    }

    /// Reads a hex key from `ZYLITH_LEDGER_KEY` if set.
    pub fn from_env(path: impl Into<PathBuf>) -> Result<Self, ClientError> {
        let store = Self::new(path);
        match std::env::var(LEDGER_KEY_ENV) {
            Ok(raw) => Ok(store.with_key(parse_key(&raw)?)),
            Err(_) => Ok(store),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_sealed(&self) -> bool {
        self.key.is_some()
    }

    fn seal(&self, key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, ClientError> {
        let cipher = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| ClientError::Crypto("invalid ledger key".to_string()))?;
        let mut nonce = [0u8; 24];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: LEDGER_AAD,
                },
            )
            .map_err(|_| ClientError::Crypto("ledger encryption failed".to_string()))?;
        let sealed = SealedLedger {
            version: SEALED_VERSION,
            nonce: hex::encode(nonce),
            ciphertext: hex::encode(ciphertext),
        };
        Ok(serde_json::to_vec(&sealed)?)
    }

    fn open(&self, key: &[u8; 32], data: &[u8]) -> Result<Zeroizing<Vec<u8>>, ClientError> {
        let sealed: SealedLedger = serde_json::from_slice(data)?;
        if sealed.version != SEALED_VERSION {
            return Err(ClientError::Storage(format!(
                "unsupported ledger version {}",
                sealed.version
            )));
        }
        let nonce = hex::decode(&sealed.nonce)
            .map_err(|e| ClientError::Storage(format!("ledger nonce: {e}")))?;
        if nonce.len() != 24 {
            return Err(ClientError::Storage("ledger nonce must be 24 bytes".to_string()));
        }
        let ciphertext = hex::decode(&sealed.ciphertext)
            .map_err(|e| ClientError::Storage(format!("ledger ciphertext: {e}")))?;
        let cipher = XChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| ClientError::Crypto("invalid ledger key".to_string()))?;
        let plaintext = cipher
            .decrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: LEDGER_AAD,
                },
            )
            .map_err(|_| ClientError::Crypto("ledger decryption failed".to_string()))?;
        Ok(Zeroizing::new(plaintext))
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ledger".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl NoteStore for FileNoteStore {
    async fn load(&self) -> Result<LedgerSnapshot, ClientError> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LedgerSnapshot::default())
            }
            Err(err) => {
                return Err(ClientError::Storage(format!(
                    "failed to read {}: {err}",
                    self.path.display()
                )))
            }
        };
        match &self.key {
            Some(key) => {
                let plaintext = self.open(key, &data)?;
                Ok(serde_json::from_slice(&plaintext)?)
            }
            None => Ok(serde_json::from_slice(&data)?),
        }
    }

    async fn store(&self, snapshot: &LedgerSnapshot) -> Result<(), ClientError> {
        let plaintext = Zeroizing::new(serde_json::to_vec_pretty(snapshot)?);
        let data = match &self.key {
            Some(key) => self.seal(key, &plaintext)?,
            None => plaintext.to_vec(),
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = self.temp_path();
        write_private_file(&temp, &data).await?;
        tokio::fs::rename(&temp, &self.path).await.map_err(|e| {
            ClientError::Storage(format!("failed to replace {}: {e}", self.path.display()))
        })?;
        Ok(())
    }
}

async fn write_private_file(path: &Path, data: &[u8]) -> Result<(), ClientError> {
    use tokio::io::AsyncWriteExt;
    let mut options = tokio::fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

fn parse_key(raw: &str) -> Result<[u8; 32], ClientError> {
    let raw = raw.trim();
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = Zeroizing::new(
        hex::decode(digits).map_err(|e| ClientError::Config(format!("{LEDGER_KEY_ENV}: {e}")))?,
    );
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| ClientError::Config(format!("{LEDGER_KEY_ENV} must be 32 bytes")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::FieldHash;
    use crate::notes::{NoteKind, ShieldedNote};
    use starknet::core::types::Felt;

    fn sample() -> LedgerSnapshot {
        let mut snapshot = LedgerSnapshot::default();
        snapshot
            .notes
            .push(ShieldedNote::generate(Felt::ONE, 10, NoteKind::Swap).expect("note"));
        snapshot.spent.insert(FieldHash::from_u128(3));
        snapshot
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileNoteStore::new(dir.path().join("ledger.json"));
        let snapshot = store.load().await.expect("load");
        assert!(snapshot.notes.is_empty());
        assert!(snapshot.spent.is_empty());
    }

    #[tokio::test]
    async fn plaintext_store_persists_notes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("ledger.json");
        let store = FileNoteStore::new(&path);
        let snapshot = sample();
        store.store(&snapshot).await.expect("store");
        let loaded = FileNoteStore::new(&path).load().await.expect("load");
        assert_eq!(loaded.notes.len(), 1);
        assert_eq!(loaded.notes[0].secret, snapshot.notes[0].secret);
        assert_eq!(loaded.spent, snapshot.spent);
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn sealed_store_hides_secrets_and_needs_the_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ledger.json");
        let store = FileNoteStore::new(&path).with_key([7u8; 32]);
        let snapshot = sample();
        store.store(&snapshot).await.expect("store");

        let raw = std::fs::read_to_string(&path).expect("read");
        assert!(!raw.contains(&hex::encode(snapshot.notes[0].secret)));

        let loaded = FileNoteStore::new(&path)
            .with_key([7u8; 32])
            .load()
            .await
            .expect("load");
        assert_eq!(loaded.notes[0].note_hash, snapshot.notes[0].note_hash);

        let err = FileNoteStore::new(&path)
            .with_key([8u8; 32])
            .load()
            .await
            .expect_err("wrong key");
        assert!(matches!(err, ClientError::Crypto(_)));
    }

    #[test]
    fn ledger_key_must_be_32_bytes() {
        assert!(parse_key(&"11".repeat(32)).is_ok());
        assert!(parse_key(&format!("0x{}", "ab".repeat(32))).is_ok());
        assert!(matches!(parse_key("abcd"), Err(ClientError::Config(_))));
    }
}

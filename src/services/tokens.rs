//! Order download tokens.
//!
//! Every order directory holds one rotating 12-character seed; a download
//! token is the AEAD encryption of `seed:relative_zip_path` under a
//! process-wide secret. Verification decrypts and checks the seed against
//! the order's current one, so deleting the seed file revokes every token
//! issued for that order at once.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use rand::{Rng, RngCore, distributions::Alphanumeric, rngs::OsRng};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const SEED_LEN: usize = 12;
const SEED_FILE: &str = ".seed";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid download token")]
    InvalidToken,
    #[error("invalid token seed")]
    SeedMismatch,
    #[error("token sealing failed")]
    Crypto,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type TokenResult<T> = Result<T, TokenError>;

/// Seals and verifies download tokens under the process-wide secret.
#[derive(Clone)]
pub struct TokenVault {
    cipher: XChaCha20Poly1305,
}

impl TokenVault {
    /// Load the 32-byte secret from `path`, generating and persisting a
    /// fresh one on first use.
    pub async fn from_file(path: &Path) -> TokenResult<Self> {
        let raw = match fs::read(path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let mut key = [0u8; KEY_LEN];
                OsRng.fill_bytes(&mut key);
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(path, key).await?;
                debug!("generated new token secret at {}", path.display());
                key.to_vec()
            }
            Err(err) => return Err(err.into()),
        };

        if raw.len() < KEY_LEN {
            return Err(TokenError::Crypto);
        }
        let cipher = XChaCha20Poly1305::new_from_slice(&raw[..KEY_LEN])
            .map_err(|_| TokenError::Crypto)?;
        Ok(Self { cipher })
    }

    pub fn seed_path(order_dir: &Path) -> PathBuf {
        order_dir.join(SEED_FILE)
    }

    /// The order's current seed, generated and persisted on first use.
    pub async fn order_seed(&self, order_dir: &Path) -> TokenResult<String> {
        let seed_path = Self::seed_path(order_dir);
        match fs::read_to_string(&seed_path).await {
            Ok(seed) => Ok(seed.trim().to_string()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let seed: String = rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(SEED_LEN)
                    .map(char::from)
                    .collect();
                fs::create_dir_all(order_dir).await?;
                fs::write(&seed_path, &seed).await?;
                Ok(seed)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Drop the order's seed; all previously issued tokens stop verifying.
    pub async fn rotate_seed(&self, order_dir: &Path) -> TokenResult<()> {
        match fs::remove_file(Self::seed_path(order_dir)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Issue a token for one archive of an order.
    ///
    /// `relative_zip_path` is `<order_id>/<zip_file_name>`; it is encoded
    /// into the token and compared exactly at download time.
    pub async fn issue(&self, order_dir: &Path, relative_zip_path: &str) -> TokenResult<String> {
        let seed = self.order_seed(order_dir).await?;
        let plain = format!("{seed}:{relative_zip_path}");

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let sealed = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plain.as_bytes())
            .map_err(|_| TokenError::Crypto)?;

        let mut raw = Vec::with_capacity(NONCE_LEN + sealed.len());
        raw.extend_from_slice(&nonce);
        raw.extend_from_slice(&sealed);
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    /// Decrypt a token into its `(seed, relative_zip_path)` parts.
    pub fn open(&self, token: &str) -> TokenResult<(String, String)> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| TokenError::InvalidToken)?;
        if raw.len() <= NONCE_LEN {
            return Err(TokenError::InvalidToken);
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(XNonce::from_slice(nonce), sealed)
            .map_err(|_| TokenError::InvalidToken)?;
        let plain = String::from_utf8(plain).map_err(|_| TokenError::InvalidToken)?;
        let (seed, rel_path) = plain.split_once(':').ok_or(TokenError::InvalidToken)?;
        Ok((seed.to_string(), rel_path.to_string()))
    }

    /// Verify a token against the owning order's current seed and return
    /// the relative zip path it authorizes.
    pub async fn verify(&self, orders_root: &Path, token: &str) -> TokenResult<String> {
        let (seed, rel_path) = self.open(token)?;

        let order_id = Path::new(&rel_path)
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .ok_or(TokenError::InvalidToken)?;

        let expected = self.order_seed(&orders_root.join(order_id)).await?;
        if seed != expected {
            return Err(TokenError::SeedMismatch);
        }

        Ok(rel_path)
    }
}

//! Cookie secret generation and persistence.
//!
//! A record without a `cookie_secret` gets one generated exactly once. When a
//! [`SecretFile`] is configured the generated value is written there, so
//! restarts and replicas sharing the file keep signing with the same key.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::Rng;
use thiserror::Error;

use super::model::ProxyProviderRecord;

/// Length of a generated cookie secret.
pub const COOKIE_SECRET_LEN: usize = 32;

const COOKIE_SECRET_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a random 32-character cookie secret from the OS CSPRNG.
pub fn generate_cookie_secret() -> String {
    let mut rng = OsRng;
    (0..COOKIE_SECRET_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..COOKIE_SECRET_ALPHABET.len());
            COOKIE_SECRET_ALPHABET[idx] as char
        })
        .collect()
}

/// Random URL-safe token, used for OAuth2 `state` values and session ids.
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// The secret signing a provider's session cookies.
///
/// Debug output never shows the value.
#[derive(Clone, PartialEq, Eq)]
pub struct CookieSecret(String);

impl CookieSecret {
    pub(crate) fn new(secret: String) -> Self {
        Self(secret)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CookieSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CookieSecret(..)")
    }
}

#[derive(Debug, Error)]
pub enum SecretFileError {
    #[error("failed to access secret file `{path}`: {source}")]
    Io { path: String, source: io::Error },

    #[error("secret file `{path}` is malformed: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("failed to encode secret file: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Generated cookie secrets, keyed by provider id, kept in a TOML file.
#[derive(Debug, Clone)]
pub struct SecretFile {
    path: PathBuf,
}

impl SecretFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored secrets. A missing file holds none.
    pub fn load(&self) -> Result<BTreeMap<String, String>, SecretFileError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => return Err(self.io_error(source)),
        };
        toml::from_str(&content).map_err(|source| SecretFileError::Parse {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// Give every record without a secret its stored one, generating and
    /// persisting secrets for ids seen for the first time.
    ///
    /// Returns how many secrets were generated. The file is only written
    /// when that number is non-zero.
    pub fn fill(&self, records: &mut [ProxyProviderRecord]) -> Result<usize, SecretFileError> {
        if records.iter().all(|r| !r.cookie_secret.is_empty()) {
            return Ok(0);
        }

        let mut stored = self.load()?;
        let mut generated = 0;
        for record in records.iter_mut().filter(|r| r.cookie_secret.is_empty()) {
            let secret = stored.entry(record.id.clone()).or_insert_with(|| {
                generated += 1;
                tracing::info!(provider = %record.id, "Generated cookie secret");
                generate_cookie_secret()
            });
            record.cookie_secret = secret.clone();
        }

        if generated > 0 {
            self.store(&stored)?;
        }
        Ok(generated)
    }

    /// Write through a temporary file so readers never see a partial file.
    fn store(&self, secrets: &BTreeMap<String, String>) -> Result<(), SecretFileError> {
        let content = toml::to_string(secrets)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content).map_err(|e| self.io_error(e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))
                .map_err(|e| self.io_error(e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }

    fn io_error(&self, source: io::Error) -> SecretFileError {
        SecretFileError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

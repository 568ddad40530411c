//! Sensitive values and their encryption at rest.
//!
//! A [`Secret`] never prints its value: `Debug` and `Display` both render a
//! redaction marker, and it has no `Serialize` impl. The only way a secret
//! reaches disk is through [`StateCipher::encrypt`], which produces an age
//! passphrase-encrypted payload keyed by the scope password.

use std::fmt;

use age::secrecy::SecretString;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

use crate::consts::REDACTED;

/// scrypt work factor (log2 of N) used when sealing secrets.
pub const DEFAULT_WORK_FACTOR: u8 = 15;

/// Largest work factor accepted when opening a sealed secret.
const MAX_WORK_FACTOR: u8 = 22;

#[derive(Debug, Error)]
pub enum SecretError {
  #[error("failed to encrypt secret: {0}")]
  Encrypt(String),

  #[error("failed to decrypt secret (wrong password?): {0}")]
  Decrypt(String),

  #[error("sealed secret is not valid base64: {0}")]
  Encoding(#[source] base64::DecodeError),

  #[error("decrypted secret is not valid UTF-8")]
  NotUtf8,
}

/// A string value that must never be logged or persisted in plain form.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
  pub fn new(value: impl Into<String>) -> Self {
    Secret(value.into())
  }

  /// Read a secret from a named environment variable.
  ///
  /// Unset and empty variables both yield `None`.
  pub fn from_env(name: &str) -> Option<Self> {
    std::env::var(name).ok().filter(|v| !v.is_empty()).map(Secret)
  }

  /// Borrow the plaintext. Callers must not log the result.
  pub fn expose(&self) -> &str {
    &self.0
  }
}

impl fmt::Debug for Secret {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Secret({})", REDACTED)
  }
}

impl fmt::Display for Secret {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(REDACTED)
  }
}

/// Encrypts and decrypts secrets with the scope password.
#[derive(Clone)]
pub struct StateCipher {
  password: Secret,
  work_factor: u8,
}

impl fmt::Debug for StateCipher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StateCipher")
      .field("password", &self.password)
      .field("work_factor", &self.work_factor)
      .finish()
  }
}

impl StateCipher {
  pub fn new(password: Secret) -> Self {
    Self {
      password,
      work_factor: DEFAULT_WORK_FACTOR,
    }
  }

  /// Override the scrypt work factor used for new ciphertexts.
  ///
  /// Values are clamped to `1..=MAX_WORK_FACTOR`.
  pub fn with_work_factor(mut self, log_n: u8) -> Self {
    self.work_factor = log_n.clamp(1, MAX_WORK_FACTOR);
    self
  }

  fn passphrase(&self) -> SecretString {
    SecretString::from(self.password.expose().to_owned())
  }

  /// Seal a secret into a base64-encoded age payload.
  pub fn encrypt(&self, secret: &Secret) -> Result<String, SecretError> {
    let mut recipient = age::scrypt::Recipient::new(self.passphrase());
    recipient.set_work_factor(self.work_factor);

    let sealed = age::encrypt(&recipient, secret.expose().as_bytes()).map_err(|e| SecretError::Encrypt(e.to_string()))?;
    Ok(STANDARD.encode(sealed))
  }

  /// Open a payload produced by [`StateCipher::encrypt`].
  pub fn decrypt(&self, ciphertext: &str) -> Result<Secret, SecretError> {
    let sealed = STANDARD.decode(ciphertext).map_err(SecretError::Encoding)?;

    let mut identity = age::scrypt::Identity::new(self.passphrase());
    identity.set_max_work_factor(MAX_WORK_FACTOR);

    let plain = age::decrypt(&identity, &sealed).map_err(|e| SecretError::Decrypt(e.to_string()))?;
    String::from_utf8(plain).map(Secret).map_err(|_| SecretError::NotUtf8)
  }
}

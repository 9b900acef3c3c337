//! Shared secrets and where they come from.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CamError;

// ── Secret ───────────────────────────────────────────────────────

/// A shared secret. Wiped from memory on drop; never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret {
    bytes: Vec<u8>,
}

impl Secret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn expose(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

// ── CredentialProvider ───────────────────────────────────────────

/// Supplies the shared secret. Called once at startup.
pub trait CredentialProvider {
    fn get_secret(&self) -> Result<Secret, CamError>;
}

/// A secret known up front (tests, embedding).
#[derive(Debug, Clone)]
pub struct StaticCredential(Secret);

impl StaticCredential {
    pub fn new(secret: impl Into<Secret>) -> Self {
        Self(secret.into())
    }
}

impl CredentialProvider for StaticCredential {
    fn get_secret(&self) -> Result<Secret, CamError> {
        Ok(self.0.clone())
    }
}

/// Reads the secret from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvCredential {
    var: String,
}

impl EnvCredential {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialProvider for EnvCredential {
    fn get_secret(&self) -> Result<Secret, CamError> {
        match std::env::var(&self.var) {
            Ok(value) if !value.is_empty() => Ok(Secret::from(value)),
            Ok(_) => Err(CamError::Credential(format!("{} is empty", self.var))),
            Err(_) => Err(CamError::Credential(format!("{} is not set", self.var))),
        }
    }
}

/// Asks on the terminal without echoing.
#[derive(Debug, Clone)]
pub struct PromptCredential {
    prompt: String,
}

impl PromptCredential {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

impl Default for PromptCredential {
    fn default() -> Self {
        Self::new("Password: ")
    }
}

impl CredentialProvider for PromptCredential {
    fn get_secret(&self) -> Result<Secret, CamError> {
        let value = rpassword::prompt_password(&self.prompt)
            .map_err(|e| CamError::Credential(format!("could not read password: {e}")))?;
        if value.is_empty() {
            return Err(CamError::Credential("empty password".into()));
        }
        Ok(Secret::from(value))
    }
}

/// Tries each provider in turn and returns the first secret.
pub struct FirstAvailable {
    providers: Vec<Box<dyn CredentialProvider + Send + Sync>>,
}

impl FirstAvailable {
    pub fn new(providers: Vec<Box<dyn CredentialProvider + Send + Sync>>) -> Self {
        Self { providers }
    }
}

impl CredentialProvider for FirstAvailable {
    fn get_secret(&self) -> Result<Secret, CamError> {
        let mut last = CamError::Credential("no credential provider configured".into());
        for provider in &self.providers {
            match provider.get_secret() {
                Ok(secret) => return Ok(secret),
                Err(e) => {
                    tracing::debug!("credential provider skipped: {e}");
                    last = e;
                }
            }
        }
        Err(last)
    }
}

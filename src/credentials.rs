use crate::errors::{AppError, AppResult};
use std::sync::{Mutex, RwLock};

pub const KEYRING_SERVICE: &str = "brokerage-backoffice-console";
const KEYRING_ACCOUNT: &str = "session-token";

/// Values a browser-style store hands back when nothing was ever saved.
const SENTINEL_TOKENS: [&str; 2] = ["null", "undefined"];

/// Supplies the session token attached to authenticated requests.
pub trait CredentialProvider: Send + Sync {
    fn token(&self) -> AppResult<Option<String>>;
}

/// A usable token, or `None` for absent, blank or sentinel values.
pub fn usable_token(raw: Option<String>) -> Option<String> {
    let value = raw?;
    let trimmed = value.trim();
    if trimmed.is_empty() || SENTINEL_TOKENS.iter().any(|sentinel| trimmed.eq_ignore_ascii_case(sentinel)) {
        return None;
    }
    Some(trimmed.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeader {
    pub name: String,
    pub value: String,
}

impl AuthHeader {
    /// Builds the custom auth header, short-circuiting with
    /// `AppError::Unauthenticated` instead of sending a malformed value.
    pub fn resolve(provider: &dyn CredentialProvider, name: &str, prefix: &str) -> AppResult<Self> {
        let token = usable_token(provider.token()?)
            .ok_or_else(|| AppError::Unauthenticated("no session token stored".to_string()))?;
        Ok(Self {
            name: name.to_string(),
            value: format!("{}{}", prefix, token),
        })
    }
}

/// Token persisted in the operating system keychain.
#[derive(Debug)]
pub struct KeyringCredentialProvider {
    service: String,
    lock: Mutex<()>,
}

impl Default for KeyringCredentialProvider {
    fn default() -> Self {
        Self::new(KEYRING_SERVICE)
    }
}

impl KeyringCredentialProvider {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            lock: Mutex::new(()),
        }
    }

    fn entry(&self) -> AppResult<keyring::Entry> {
        keyring::Entry::new(&self.service, KEYRING_ACCOUNT).map_err(|error| AppError::Io(error.to_string()))
    }

    fn guard(&self) -> AppResult<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|_| AppError::Internal("keyring mutex poisoned".to_string()))
    }

    pub fn save_token(&self, token: &str) -> AppResult<()> {
        let _guard = self.guard()?;
        self.entry()?
            .set_password(token)
            .map_err(|error| AppError::Io(error.to_string()))
    }

    pub fn clear_token(&self) -> AppResult<()> {
        let _guard = self.guard()?;
        match self.entry()?.delete_credential() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(AppError::Io(error.to_string())),
        }
    }

    pub fn has_token(&self) -> AppResult<bool> {
        Ok(usable_token(self.token()?).is_some())
    }
}

impl CredentialProvider for KeyringCredentialProvider {
    fn token(&self) -> AppResult<Option<String>> {
        let _guard = self.guard()?;
        match self.entry()?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(AppError::Io(error.to_string())),
        }
    }
}

/// In-memory token holder for tests and embedded shells.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    token: RwLock<Option<String>>,
}

impl StaticCredentials {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: RwLock::new(token.map(ToString::to_string)),
        }
    }

    pub fn set(&self, token: Option<&str>) {
        if let Ok(mut writer) = self.token.write() {
            *writer = token.map(ToString::to_string);
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn token(&self) -> AppResult<Option<String>> {
        self.token
            .read()
            .map(|value| value.clone())
            .map_err(|_| AppError::Internal("credential lock poisoned".to_string()))
    }
}

use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Bearer credential issued by the external auth flow.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Returns `None` for blank input; a blank token is the same as being signed out.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into().trim().to_string();
        if raw.is_empty() { None } else { Some(Self(raw)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("AuthToken(<redacted>)")
    }
}

/// Capability that yields the current token, or `None` when the user is signed out.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<AuthToken>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<AuthToken>);

impl StaticToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(AuthToken::new(raw))
    }

    pub fn signed_out() -> Self {
        Self(None)
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<AuthToken> {
        self.0.clone()
    }
}

/// Token slot that can be replaced while the controller is running.
#[derive(Debug, Default)]
pub struct SharedToken {
    slot: RwLock<Option<AuthToken>>,
}

impl SharedToken {
    pub fn new(token: Option<AuthToken>) -> Self {
        Self {
            slot: RwLock::new(token),
        }
    }

    pub fn set(&self, token: AuthToken) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    pub fn clear(&self) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl TokenProvider for SharedToken {
    fn token(&self) -> Option<AuthToken> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

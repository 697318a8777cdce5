use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum AccountsError {
    #[error("failed to read accounts file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse accounts file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Maps a presented session token to a user id.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> Option<String>;
}

/// Answers whether a user currently holds an active subscription.
#[async_trait]
pub trait SubscriptionDirectory: Send + Sync {
    async fn is_active(&self, user_id: &str) -> bool;
}

// One line of the accounts file
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountEntry {
    pub user_id: String,
    pub token_sha256: String,
    #[serde(default)]
    pub subscription_active: bool,
}

// Hex SHA-256 of a session token, the form tokens are stored in
pub fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Accounts loaded once at startup. Tokens are only ever held as digests.
#[derive(Debug, Default)]
pub struct StaticAccounts {
    users_by_digest: HashMap<String, String>,
    subscriptions: HashMap<String, bool>,
}

impl StaticAccounts {
    pub fn new(entries: Vec<AccountEntry>) -> Self {
        let mut accounts = Self::default();
        for entry in entries {
            accounts
                .users_by_digest
                .insert(entry.token_sha256.to_ascii_lowercase(), entry.user_id.clone());
            accounts
                .subscriptions
                .insert(entry.user_id, entry.subscription_active);
        }
        accounts
    }

    pub fn from_file(path: &Path) -> Result<Self, AccountsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| AccountsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let entries: Vec<AccountEntry> =
            serde_json::from_str(&raw).map_err(|source| AccountsError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::new(entries))
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

#[async_trait]
impl SessionResolver for StaticAccounts {
    async fn resolve(&self, token: &str) -> Option<String> {
        self.users_by_digest.get(&token_digest(token)).cloned()
    }
}

#[async_trait]
impl SubscriptionDirectory for StaticAccounts {
    async fn is_active(&self, user_id: &str) -> bool {
        self.subscriptions.get(user_id).copied().unwrap_or(false)
    }
}

//! Account lookup for the login flow.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use toolbox_core::normalize_account;

use crate::config::UserConfig;

/// Where password hashes live. Emails passed in are already normalized.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn password_hash(&self, email: &str) -> anyhow::Result<Option<String>>;

    /// Stores a new account. `false` if the email is already taken.
    async fn register(&self, email: &str, password_hash: String) -> anyhow::Result<bool>;
}

#[derive(Debug, Default)]
pub struct InMemoryAccounts {
    accounts: DashMap<String, String>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_users(users: &[UserConfig]) -> Self {
        let directory = Self::new();
        for user in users {
            if let Some(email) = normalize_account(&user.email) {
                directory.accounts.insert(email, user.password_hash.clone());
            }
        }
        directory
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccounts {
    async fn password_hash(&self, email: &str) -> anyhow::Result<Option<String>> {
        Ok(self.accounts.get(email).map(|hash| hash.value().clone()))
    }

    async fn register(&self, email: &str, password_hash: String) -> anyhow::Result<bool> {
        match self.accounts.entry(email.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(password_hash);
                Ok(true)
            }
        }
    }
}

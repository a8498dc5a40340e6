//! In-memory adapters for local runs and tests, with fault injection.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::identity::{AuthAccount, AuthError, AuthService, AuthSession};
use crate::store::{DocumentStore, Fields, StoreError};

/// Every call yields once before touching data, like a network round trip,
/// so concurrent callers interleave.
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<BTreeMap<(String, String), Fields>>,
    failing_reads: Mutex<HashSet<String>>,
    failing_writes: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read of `collection` fail until [`MemoryStore::heal`].
    pub async fn fail_reads(&self, collection: &str) {
        self.failing_reads.lock().await.insert(collection.to_string());
    }

    /// Make every write (set, delete, increment) to `collection` fail.
    pub async fn fail_writes(&self, collection: &str) {
        self.failing_writes.lock().await.insert(collection.to_string());
    }

    pub async fn heal(&self) {
        self.failing_reads.lock().await.clear();
        self.failing_writes.lock().await.clear();
    }

    /// Ids of every document in `collection`, in order.
    pub async fn ids(&self, collection: &str) -> Vec<String> {
        self.documents
            .lock()
            .await
            .keys()
            .filter(|(c, _)| c == collection)
            .map(|(_, id)| id.clone())
            .collect()
    }

    async fn check_read(&self, collection: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        if self.failing_reads.lock().await.contains(collection) {
            return Err(StoreError::Backend(format!("injected read failure on {}", collection)));
        }
        Ok(())
    }

    async fn check_write(&self, collection: &str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        if self.failing_writes.lock().await.contains(collection) {
            return Err(StoreError::Backend(format!("injected write failure on {}", collection)));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, StoreError> {
        self.check_read(collection).await?;
        let documents = self.documents.lock().await;
        Ok(documents
            .get(&(collection.to_string(), id.to_string()))
            .cloned())
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        self.check_write(collection).await?;
        self.documents
            .lock()
            .await
            .insert((collection.to_string(), id.to_string()), fields);
        Ok(())
    }

    async fn query_equal(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Fields)>, StoreError> {
        self.check_read(collection).await?;
        let documents = self.documents.lock().await;
        Ok(documents
            .iter()
            .filter(|((c, _), fields)| c == collection && fields.get(field) == Some(value))
            .map(|((_, id), fields)| (id.clone(), fields.clone()))
            .collect())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.check_write(collection).await?;
        self.documents
            .lock()
            .await
            .remove(&(collection.to_string(), id.to_string()));
        Ok(())
    }

    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> Result<i64, StoreError> {
        self.check_write(collection).await?;
        let mut documents = self.documents.lock().await;
        let fields = documents
            .entry((collection.to_string(), id.to_string()))
            .or_default();
        let current = match fields.get(field) {
            None => 0,
            Some(value) => value.as_i64().ok_or_else(|| StoreError::Malformed {
                collection: collection.to_string(),
                id: id.to_string(),
                reason: format!("{} is not an integer", field),
            })?,
        };
        let next = current + delta;
        fields.insert(field.to_string(), Value::from(next));
        Ok(next)
    }
}

struct StoredAccount {
    account_id: String,
    password: String,
}

#[derive(Default)]
struct AuthState {
    accounts: HashMap<String, StoredAccount>,
    sessions: HashMap<String, AuthAccount>,
    password_resets: Vec<String>,
    issued: u64,
    fail_creates: bool,
    fail_deletes: bool,
}

/// Auth service keeping accounts in memory. Emails are unique, passwords
/// shorter than 8 characters are rejected.
#[derive(Default)]
pub struct MemoryAuth {
    state: Mutex<AuthState>,
}

impl MemoryAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn has_account(&self, email: &str) -> bool {
        self.state.lock().await.accounts.contains_key(email)
    }

    pub async fn account_count(&self) -> usize {
        self.state.lock().await.accounts.len()
    }

    /// Emails that asked for a password reset, oldest first.
    pub async fn password_resets(&self) -> Vec<String> {
        self.state.lock().await.password_resets.clone()
    }

    pub async fn fail_creates(&self, fail: bool) {
        self.state.lock().await.fail_creates = fail;
    }

    pub async fn fail_deletes(&self, fail: bool) {
        self.state.lock().await.fail_deletes = fail;
    }
}

#[async_trait]
impl AuthService for MemoryAuth {
    async fn create_account(&self, email: &str, password: &str) -> Result<AuthAccount, AuthError> {
        let mut state = self.state.lock().await;
        if state.fail_creates {
            return Err(AuthError::Backend("injected create failure".to_string()));
        }
        if !email.contains('@') {
            return Err(AuthError::InvalidParameter);
        }
        if password.len() < 8 {
            return Err(AuthError::InvalidPassword);
        }
        if state.accounts.contains_key(email) {
            return Err(AuthError::EmailInUse);
        }

        state.issued += 1;
        let account_id = format!("acct-{}", state.issued);
        state.accounts.insert(
            email.to_string(),
            StoredAccount {
                account_id: account_id.clone(),
                password: password.to_string(),
            },
        );
        Ok(AuthAccount {
            account_id,
            email: email.to_string(),
        })
    }

    async fn delete_account(&self, account: &AuthAccount) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        if state.fail_deletes {
            return Err(AuthError::Backend("injected delete failure".to_string()));
        }
        let owned = state
            .accounts
            .get(&account.email)
            .is_some_and(|stored| stored.account_id == account.account_id);
        if !owned {
            return Err(AuthError::AccountNotFound);
        }
        state.accounts.remove(&account.email);
        state.sessions.retain(|_, a| a.account_id != account.account_id);
        Ok(())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let mut state = self.state.lock().await;
        let account_id = match state.accounts.get(email) {
            Some(stored) if stored.password == password => stored.account_id.clone(),
            Some(_) => return Err(AuthError::NotAuthorized),
            None => return Err(AuthError::AccountNotFound),
        };

        state.issued += 1;
        let access_token = format!("token-{}", state.issued);
        let account = AuthAccount {
            account_id,
            email: email.to_string(),
        };
        state.sessions.insert(access_token.clone(), account.clone());

        Ok(AuthSession {
            account,
            refresh_token: format!("refresh-{}", state.issued),
            access_token,
            expires_in: 3600,
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        match self.state.lock().await.sessions.remove(access_token) {
            Some(_) => Ok(()),
            None => Err(AuthError::NotAuthorized),
        }
    }

    async fn current_account(&self, access_token: &str) -> Result<Option<AuthAccount>, AuthError> {
        Ok(self.state.lock().await.sessions.get(access_token).cloned())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let mut state = self.state.lock().await;
        if !state.accounts.contains_key(email) {
            return Err(AuthError::AccountNotFound);
        }
        state.password_resets.push(email.to_string());
        Ok(())
    }
}

//! In-memory adapter and fixtures shared by unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use time::OffsetDateTime;

use crate::adapter::Adapter;
use crate::config::{AuthOptions, Secrets};
use crate::error::BoxError;
use crate::types::{Account, NewUser, SessionRecord, SessionToken, User, UserId};

#[derive(Default)]
struct Store {
    users: HashMap<UserId, User>,
    accounts: Vec<Account>,
    sessions: HashMap<SessionToken, SessionRecord>,
    next_id: u64,
}

/// Adapter backed by a mutex-guarded map. Clones share the same store.
#[derive(Clone, Default)]
pub(crate) struct MemoryAdapter {
    store: Arc<Mutex<Store>>,
    fail_deletes: bool,
}

impl MemoryAdapter {
    /// `delete_session` fails with a storage error; everything else works.
    #[must_use]
    pub(crate) fn with_failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    pub(crate) fn insert_user(&self, email: &str) -> User {
        let mut store = self.store.lock().unwrap();
        store.next_id += 1;
        let user = User {
            id: UserId(format!("user-{}", store.next_id)),
            name: None,
            email: Some(email.to_owned()),
            email_verified: None,
            image: None,
        };
        store.users.insert(user.id.clone(), user.clone());
        user
    }

    pub(crate) fn insert_session(&self, record: SessionRecord) {
        self.store
            .lock()
            .unwrap()
            .sessions
            .insert(record.session_token.clone(), record);
    }

    pub(crate) fn session(&self, token: &SessionToken) -> Option<SessionRecord> {
        self.store.lock().unwrap().sessions.get(token).cloned()
    }

    pub(crate) fn accounts(&self) -> Vec<Account> {
        self.store.lock().unwrap().accounts.clone()
    }

    pub(crate) fn user_count(&self) -> usize {
        self.store.lock().unwrap().users.len()
    }
}

impl Adapter for MemoryAdapter {
    async fn create_user(&self, user: NewUser) -> Result<User, BoxError> {
        let mut store = self.store.lock().unwrap();
        store.next_id += 1;
        let user = User {
            id: UserId(format!("user-{}", store.next_id)),
            name: user.name,
            email: user.email,
            email_verified: user.email_verified,
            image: user.image,
        };
        store.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, BoxError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn get_user_by_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<User>, BoxError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .accounts
            .iter()
            .find(|a| a.provider == provider && a.provider_account_id == provider_account_id)
            .and_then(|a| a.user_id.as_ref())
            .and_then(|id| store.users.get(id))
            .cloned())
    }

    async fn link_account(&self, account: Account) -> Result<(), BoxError> {
        self.store.lock().unwrap().accounts.push(account);
        Ok(())
    }

    async fn create_session(&self, session: SessionRecord) -> Result<SessionRecord, BoxError> {
        self.insert_session(session.clone());
        Ok(session)
    }

    async fn get_session_and_user(
        &self,
        token: &SessionToken,
    ) -> Result<Option<(SessionRecord, User)>, BoxError> {
        let store = self.store.lock().unwrap();
        Ok(store.sessions.get(token).and_then(|record| {
            store
                .users
                .get(&record.user_id)
                .map(|user| (record.clone(), user.clone()))
        }))
    }

    async fn update_session_expiry(
        &self,
        token: &SessionToken,
        expires: OffsetDateTime,
    ) -> Result<(), BoxError> {
        let mut store = self.store.lock().unwrap();
        let record = store.sessions.get_mut(token).ok_or("no such session")?;
        record.expires = expires;
        Ok(())
    }

    async fn delete_session(&self, token: &SessionToken) -> Result<(), BoxError> {
        if self.fail_deletes {
            return Err("session store unavailable".into());
        }
        self.store.lock().unwrap().sessions.remove(token);
        Ok(())
    }
}

pub(crate) fn test_secrets() -> Secrets {
    Secrets::new(["unit-test-secret"]).unwrap()
}

/// Options for `http://localhost:3000` with no providers.
pub(crate) fn test_options() -> AuthOptions {
    AuthOptions::new("http://localhost:3000".parse().unwrap(), test_secrets())
}

/// 2048-bit RSA key used to sign ID tokens in tests.
pub(crate) const TEST_RSA_PRIVATE_KEY_PEM: &str = include_str!("../testdata/rsa_private.pem");

/// JWKS document publishing the public half of [`TEST_RSA_PRIVATE_KEY_PEM`] under kid `test-key`.
pub(crate) const TEST_JWKS: &str = include_str!("../testdata/jwks.json");

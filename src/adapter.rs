use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;

use crate::error::{BoxError, Error};
use crate::types::{Account, NewUser, SessionRecord, SessionToken, User};

/// Consumer-provided persistence for users, accounts and sessions.
///
/// Required for the `database` session strategy and for account linking.
/// Each call is awaited once per request step, bounded by the configured
/// adapter timeout, and never retried.
///
/// # Example
///
/// ```rust,ignore
/// impl Adapter for MyStore {
///     async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, BoxError> {
///         Ok(self.db.find_user_by_email(email).await?)
///     }
///     // ...
/// }
/// ```
pub trait Adapter: Send + Sync + 'static {
    /// Create a user. Returns the stored user with its assigned id.
    fn create_user(&self, user: NewUser) -> impl Future<Output = Result<User, BoxError>> + Send;

    fn get_user_by_email(
        &self,
        email: &str,
    ) -> impl Future<Output = Result<Option<User>, BoxError>> + Send;

    /// Find the user linked to `(provider, provider_account_id)`.
    fn get_user_by_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> impl Future<Output = Result<Option<User>, BoxError>> + Send;

    /// Persist the link between a user and a provider account.
    fn link_account(&self, account: Account) -> impl Future<Output = Result<(), BoxError>> + Send;

    fn create_session(
        &self,
        session: SessionRecord,
    ) -> impl Future<Output = Result<SessionRecord, BoxError>> + Send;

    /// Look up a session and its user by token.
    fn get_session_and_user(
        &self,
        token: &SessionToken,
    ) -> impl Future<Output = Result<Option<(SessionRecord, User)>, BoxError>> + Send;

    fn update_session_expiry(
        &self,
        token: &SessionToken,
        expires: OffsetDateTime,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;

    fn delete_session(
        &self,
        token: &SessionToken,
    ) -> impl Future<Output = Result<(), BoxError>> + Send;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send + 'a>>;

/// Object-safe wrapper for Adapter (needed for Arc<dyn>).
pub(crate) trait DynAdapter: Send + Sync {
    fn create_user_dyn(&self, user: NewUser) -> BoxFuture<'_, User>;
    fn get_user_by_email_dyn<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Option<User>>;
    fn get_user_by_account_dyn<'a>(
        &'a self,
        provider: &'a str,
        provider_account_id: &'a str,
    ) -> BoxFuture<'a, Option<User>>;
    fn link_account_dyn(&self, account: Account) -> BoxFuture<'_, ()>;
    fn create_session_dyn(&self, session: SessionRecord) -> BoxFuture<'_, SessionRecord>;
    fn get_session_and_user_dyn<'a>(
        &'a self,
        token: &'a SessionToken,
    ) -> BoxFuture<'a, Option<(SessionRecord, User)>>;
    fn update_session_expiry_dyn<'a>(
        &'a self,
        token: &'a SessionToken,
        expires: OffsetDateTime,
    ) -> BoxFuture<'a, ()>;
    fn delete_session_dyn<'a>(&'a self, token: &'a SessionToken) -> BoxFuture<'a, ()>;
}

impl<T: Adapter> DynAdapter for T {
    fn create_user_dyn(&self, user: NewUser) -> BoxFuture<'_, User> {
        Box::pin(self.create_user(user))
    }

    fn get_user_by_email_dyn<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Option<User>> {
        Box::pin(self.get_user_by_email(email))
    }

    fn get_user_by_account_dyn<'a>(
        &'a self,
        provider: &'a str,
        provider_account_id: &'a str,
    ) -> BoxFuture<'a, Option<User>> {
        Box::pin(self.get_user_by_account(provider, provider_account_id))
    }

    fn link_account_dyn(&self, account: Account) -> BoxFuture<'_, ()> {
        Box::pin(self.link_account(account))
    }

    fn create_session_dyn(&self, session: SessionRecord) -> BoxFuture<'_, SessionRecord> {
        Box::pin(self.create_session(session))
    }

    fn get_session_and_user_dyn<'a>(
        &'a self,
        token: &'a SessionToken,
    ) -> BoxFuture<'a, Option<(SessionRecord, User)>> {
        Box::pin(self.get_session_and_user(token))
    }

    fn update_session_expiry_dyn<'a>(
        &'a self,
        token: &'a SessionToken,
        expires: OffsetDateTime,
    ) -> BoxFuture<'a, ()> {
        Box::pin(self.update_session_expiry(token, expires))
    }

    fn delete_session_dyn<'a>(&'a self, token: &'a SessionToken) -> BoxFuture<'a, ()> {
        Box::pin(self.delete_session(token))
    }
}

/// Adapter with the per-call timeout applied and errors mapped to [`Error::Adapter`].
#[derive(Clone)]
pub(crate) struct AdapterHandle {
    inner: Arc<dyn DynAdapter>,
    timeout: Duration,
}

impl AdapterHandle {
    pub(crate) fn new<A: Adapter>(adapter: A, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(adapter),
            timeout,
        }
    }

    pub(crate) fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    async fn call<T>(&self, operation: &'static str, fut: BoxFuture<'_, T>) -> Result<T, Error> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::error!(operation, error = %e, "Adapter call failed");
                Err(Error::adapter(operation, e))
            }
            Err(_) => {
                tracing::error!(operation, timeout = ?self.timeout, "Adapter call timed out");
                Err(Error::adapter(operation, "timed out"))
            }
        }
    }

    pub(crate) async fn create_user(&self, user: NewUser) -> Result<User, Error> {
        self.call("create_user", self.inner.create_user_dyn(user))
            .await
    }

    pub(crate) async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, Error> {
        self.call("get_user_by_email", self.inner.get_user_by_email_dyn(email))
            .await
    }

    pub(crate) async fn get_user_by_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<User>, Error> {
        self.call(
            "get_user_by_account",
            self.inner
                .get_user_by_account_dyn(provider, provider_account_id),
        )
        .await
    }

    pub(crate) async fn link_account(&self, account: Account) -> Result<(), Error> {
        self.call("link_account", self.inner.link_account_dyn(account))
            .await
    }

    pub(crate) async fn create_session(
        &self,
        session: SessionRecord,
    ) -> Result<SessionRecord, Error> {
        self.call("create_session", self.inner.create_session_dyn(session))
            .await
    }

    pub(crate) async fn get_session_and_user(
        &self,
        token: &SessionToken,
    ) -> Result<Option<(SessionRecord, User)>, Error> {
        self.call(
            "get_session_and_user",
            self.inner.get_session_and_user_dyn(token),
        )
        .await
    }

    pub(crate) async fn update_session_expiry(
        &self,
        token: &SessionToken,
        expires: OffsetDateTime,
    ) -> Result<(), Error> {
        self.call(
            "update_session_expiry",
            self.inner.update_session_expiry_dyn(token, expires),
        )
        .await
    }

    pub(crate) async fn delete_session(&self, token: &SessionToken) -> Result<(), Error> {
        self.call("delete_session", self.inner.delete_session_dyn(token))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryAdapter;
    use crate::types::UserId;

    struct SlowAdapter;

    impl Adapter for SlowAdapter {
        async fn create_user(&self, _user: NewUser) -> Result<User, BoxError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Err("unreachable".into())
        }
        async fn get_user_by_email(&self, _email: &str) -> Result<Option<User>, BoxError> {
            Err("database unavailable".into())
        }
        async fn get_user_by_account(&self, _: &str, _: &str) -> Result<Option<User>, BoxError> {
            Ok(None)
        }
        async fn link_account(&self, _account: Account) -> Result<(), BoxError> {
            Ok(())
        }
        async fn create_session(&self, session: SessionRecord) -> Result<SessionRecord, BoxError> {
            Ok(session)
        }
        async fn get_session_and_user(
            &self,
            _token: &SessionToken,
        ) -> Result<Option<(SessionRecord, User)>, BoxError> {
            Ok(None)
        }
        async fn update_session_expiry(
            &self,
            _token: &SessionToken,
            _expires: OffsetDateTime,
        ) -> Result<(), BoxError> {
            Ok(())
        }
        async fn delete_session(&self, _token: &SessionToken) -> Result<(), BoxError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_adapter_error() {
        let handle = AdapterHandle::new(SlowAdapter, Duration::from_millis(20));
        let err = handle
            .create_user(NewUser {
                name: None,
                email: None,
                email_verified: None,
                image: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Adapter { operation: "create_user", .. }));
    }

    #[tokio::test]
    async fn test_adapter_failure_is_mapped() {
        let handle = AdapterHandle::new(SlowAdapter, Duration::from_secs(1));
        let err = handle.get_user_by_email("a@b.c").await.unwrap_err();
        assert!(err.to_string().contains("database unavailable"));
    }

    #[tokio::test]
    async fn test_memory_adapter_through_handle() {
        let memory = MemoryAdapter::default();
        let handle = AdapterHandle::new(memory.clone(), Duration::from_secs(1));
        let user = handle
            .create_user(NewUser {
                name: Some("Ada".into()),
                email: Some("ada@example.com".into()),
                email_verified: None,
                image: None,
            })
            .await
            .unwrap();
        let found = handle.get_user_by_email("ada@example.com").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id.clone()));
        assert_ne!(user.id, UserId(String::new()));
    }
}

//! Identity normalization and reconciliation against storage.

use serde_json::Value;

use crate::callbacks::AuthEvent;
use crate::config::AuthOptions;
use crate::error::Error;
use crate::provider::OAuthProvider;
use crate::types::{Account, NewUser, Profile, TokenSet, User};

/// Applies the provider's profile mapping. An empty id is rejected.
///
/// # Errors
///
/// Returns [`Error::OAuthCallback`] when the mapping fails or yields no id.
pub fn normalize_profile(
    provider: &OAuthProvider,
    raw: &Value,
    tokens: &TokenSet,
) -> Result<Profile, Error> {
    let profile = (provider.profile)(raw, tokens)?;
    if profile.id.trim().is_empty() {
        return Err(Error::OAuthCallback {
            operation: "profile mapping",
            status: None,
            detail: format!("provider '{}' returned an empty account id", provider.id),
        });
    }
    Ok(profile)
}

/// User to sign in as, after reconciling the provider account with storage.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub user: User,
    pub account: Account,
    pub is_new_user: bool,
}

/// Resolves which user a provider account belongs to, creating and linking
/// as needed.
///
/// Without an adapter the profile becomes the user directly.
///
/// # Errors
///
/// - [`Error::AccountNotLinked`] if the account belongs to a different user
///   than the one signed in, or if its email collides with an existing user
///   and the provider does not allow email linking.
/// - [`Error::Adapter`] if storage fails.
pub async fn reconcile(
    options: &AuthOptions,
    provider: &OAuthProvider,
    profile: &Profile,
    mut account: Account,
    current_user: Option<&User>,
) -> Result<Reconciled, Error> {
    let Some(adapter) = &options.adapter else {
        return Ok(Reconciled {
            user: User::from_profile(profile),
            account,
            is_new_user: false,
        });
    };

    if let Some(linked) = adapter
        .get_user_by_account(&account.provider, &account.provider_account_id)
        .await?
    {
        if let Some(current) = current_user
            && current.id != linked.id
        {
            tracing::warn!(provider = %account.provider, "Account is linked to another user");
            return Err(Error::AccountNotLinked);
        }
        account.user_id = Some(linked.id.clone());
        return Ok(Reconciled {
            user: linked,
            account,
            is_new_user: false,
        });
    }

    if let Some(current) = current_user {
        link(options, current, &mut account).await?;
        return Ok(Reconciled {
            user: current.clone(),
            account,
            is_new_user: false,
        });
    }

    if let Some(email) = &profile.email
        && let Some(existing) = adapter.get_user_by_email(email).await?
    {
        if !provider.allow_dangerous_email_account_linking {
            tracing::warn!(
                provider = %account.provider,
                "Email belongs to an existing user; refusing to link automatically"
            );
            return Err(Error::AccountNotLinked);
        }
        link(options, &existing, &mut account).await?;
        return Ok(Reconciled {
            user: existing,
            account,
            is_new_user: false,
        });
    }

    let user = adapter.create_user(NewUser::from(profile)).await?;
    options.events.emit(&AuthEvent::CreateUser(&user));
    link(options, &user, &mut account).await?;
    tracing::info!(provider = %account.provider, user_id = %user.id, "Created user");

    Ok(Reconciled {
        user,
        account,
        is_new_user: true,
    })
}

async fn link(options: &AuthOptions, user: &User, account: &mut Account) -> Result<(), Error> {
    let adapter = options.adapter()?;
    account.user_id = Some(user.id.clone());
    adapter.link_account(account.clone()).await?;
    options.events.emit(&AuthEvent::LinkAccount {
        user,
        account: &*account,
    });
    Ok(())
}

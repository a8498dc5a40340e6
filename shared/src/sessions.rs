//! Sign-in, sign-out and "who am I" on top of the auth service.

use serde_json::Value;

use crate::identity::{AuthAccount, AuthError, AuthService, AuthSession};
use crate::store::{from_fields, get_record, DocumentStore, StoreError, ACCOUNT_LINKS, USERS};
use crate::types::{AccountLink, User};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no user record for account {0}")]
    UserMissing(String),
    #[error("not signed in")]
    NotSignedIn,
}

impl SessionError {
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionError::Auth(e) => e.user_message(),
            SessionError::Store(_) => "Something went wrong. Please try again",
            SessionError::UserMissing(_) => {
                "Your account has no profile. Please contact your administrator"
            }
            SessionError::NotSignedIn => "Please sign in again",
        }
    }
}

/// Find the user record for an auth account: through its account link, or
/// by email when the link was never written.
pub async fn resolve_user(
    store: &dyn DocumentStore,
    account: &AuthAccount,
) -> Result<Option<User>, StoreError> {
    let link: Option<AccountLink> = get_record(store, ACCOUNT_LINKS, &account.account_id).await?;
    if let Some(link) = link {
        if let Some(user) = get_record::<User>(store, USERS, &link.user_id).await? {
            return Ok(Some(user));
        }
        tracing::warn!(
            "Account {} links to missing user {}",
            account.account_id,
            link.user_id
        );
    }

    if account.email.is_empty() {
        return Ok(None);
    }
    tracing::info!("No usable link for account {}, looking up by email", account.account_id);
    let matches = store
        .query_equal(USERS, "email", &Value::String(account.email.clone()))
        .await?;

    // Ids grow with registration order, so the highest is the newest record.
    let newest = matches.into_iter().max_by(|(a, _), (b, _)| a.cmp(b));
    match newest {
        Some((id, fields)) => from_fields(USERS, &id, fields).map(Some),
        None => Ok(None),
    }
}

pub async fn login(
    auth: &dyn AuthService,
    store: &dyn DocumentStore,
    email: &str,
    password: &str,
) -> Result<(AuthSession, User), SessionError> {
    let session = auth.sign_in(email.trim(), password).await?;
    match resolve_user(store, &session.account).await? {
        Some(user) => {
            tracing::info!("User {} signed in", user.user_id);
            Ok((session, user))
        }
        None => {
            tracing::warn!("Account {} has no user record", session.account.account_id);
            Err(SessionError::UserMissing(session.account.account_id))
        }
    }
}

pub async fn logout(auth: &dyn AuthService, access_token: &str) -> Result<(), SessionError> {
    auth.sign_out(access_token).await?;
    Ok(())
}

pub async fn current_user(
    auth: &dyn AuthService,
    store: &dyn DocumentStore,
    access_token: &str,
) -> Result<User, SessionError> {
    let account = auth
        .current_account(access_token)
        .await?
        .ok_or(SessionError::NotSignedIn)?;
    resolve_user(store, &account)
        .await?
        .ok_or(SessionError::UserMissing(account.account_id))
}

pub async fn request_password_reset(auth: &dyn AuthService, email: &str) -> Result<(), SessionError> {
    auth.send_password_reset(email.trim()).await?;
    tracing::info!("Password reset requested for {}", email.trim());
    Ok(())
}

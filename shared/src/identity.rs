//! External identity provider abstraction.

use async_trait::async_trait;

/// Account owned by the auth service. Its id is unrelated to [`crate::types::User::user_id`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAccount {
    pub account_id: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub account: AuthAccount,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("email already in use")]
    EmailInUse,
    #[error("password does not meet the policy")]
    InvalidPassword,
    #[error("invalid email or password format")]
    InvalidParameter,
    #[error("incorrect email or password")]
    NotAuthorized,
    #[error("no account found")]
    AccountNotFound,
    #[error("account not confirmed")]
    NotConfirmed,
    #[error("too many requests")]
    TooManyRequests,
    #[error("auth service is not configured: {0}")]
    Misconfigured(String),
    #[error("auth service request failed: {0}")]
    Backend(String),
}

impl AuthError {
    /// Message safe to show to the person using the app.
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::EmailInUse => "An account with this email already exists",
            AuthError::InvalidPassword => {
                "Password must contain at least 8 characters with uppercase, lowercase, number, and special character"
            }
            AuthError::InvalidParameter => "Invalid email or password format",
            AuthError::NotAuthorized => "Incorrect email or password",
            AuthError::AccountNotFound => "No account found with this email",
            AuthError::NotConfirmed => "Please verify your email before logging in",
            AuthError::TooManyRequests => "Too many attempts. Please try again later",
            AuthError::Misconfigured(_) | AuthError::Backend(_) => {
                "Something went wrong. Please try again"
            }
        }
    }
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn create_account(&self, email: &str, password: &str) -> Result<AuthAccount, AuthError>;

    async fn delete_account(&self, account: &AuthAccount) -> Result<(), AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError>;

    /// `None` when the token is unknown or expired.
    async fn current_account(&self, access_token: &str) -> Result<Option<AuthAccount>, AuthError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError>;
}

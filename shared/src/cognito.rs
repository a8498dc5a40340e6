use async_trait::async_trait;
use aws_sdk_cognitoidentityprovider::types::{AttributeType, AuthFlowType};
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::identity::{AuthAccount, AuthError, AuthService, AuthSession};

type HmacSha256 = Hmac<Sha256>;

/// [`AuthService`] backed by a Cognito user pool app client with a secret.
pub struct CognitoAuth {
    client: CognitoClient,
    client_id: String,
    client_secret: String,
    user_pool_id: Option<String>,
}

impl CognitoAuth {
    pub fn new(
        client: CognitoClient,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        user_pool_id: Option<String>,
    ) -> Self {
        Self {
            client,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            user_pool_id,
        }
    }

    fn secret_hash(&self, username: &str) -> Result<String, AuthError> {
        compute_secret_hash(username, &self.client_id, &self.client_secret)
    }

    fn user_pool_id(&self) -> Result<&str, AuthError> {
        self.user_pool_id
            .as_deref()
            .ok_or_else(|| AuthError::Misconfigured("COGNITO_USER_POOL_ID not set".to_string()))
    }

    async fn account_for_token(&self, access_token: &str) -> Result<AuthAccount, AuthError> {
        let output = self
            .client
            .get_user()
            .access_token(access_token)
            .send()
            .await
            .map_err(|e| classify(&format!("{:?}", e)))?;

        let mut subject = None;
        let mut email = None;
        for attribute in output.user_attributes() {
            match attribute.name() {
                "sub" => subject = attribute.value().map(|s| s.to_string()),
                "email" => email = attribute.value().map(|s| s.to_string()),
                _ => {}
            }
        }

        Ok(AuthAccount {
            account_id: subject.unwrap_or_else(|| output.username().to_string()),
            email: email.unwrap_or_default(),
        })
    }
}

/// Compute the SECRET_HASH for Cognito authentication
fn compute_secret_hash(
    username: &str,
    client_id: &str,
    client_secret: &str,
) -> Result<String, AuthError> {
    let message = format!("{}{}", username, client_id);
    let mut mac = HmacSha256::new_from_slice(client_secret.as_bytes())
        .map_err(|e| AuthError::Misconfigured(format!("invalid client secret: {}", e)))?;
    mac.update(message.as_bytes());
    let result = mac.finalize();
    Ok(general_purpose::STANDARD.encode(result.into_bytes()))
}

/// Map a Cognito SDK error (by its debug rendering) onto [`AuthError`].
fn classify(error_message: &str) -> AuthError {
    if error_message.contains("UsernameExistsException") {
        AuthError::EmailInUse
    } else if error_message.contains("InvalidPasswordException") {
        AuthError::InvalidPassword
    } else if error_message.contains("InvalidParameterException") {
        AuthError::InvalidParameter
    } else if error_message.contains("NotAuthorizedException") {
        AuthError::NotAuthorized
    } else if error_message.contains("UserNotFoundException") {
        AuthError::AccountNotFound
    } else if error_message.contains("UserNotConfirmedException") {
        AuthError::NotConfirmed
    } else if error_message.contains("TooManyRequestsException")
        || error_message.contains("LimitExceededException")
    {
        AuthError::TooManyRequests
    } else {
        AuthError::Backend(error_message.to_string())
    }
}

#[async_trait]
impl AuthService for CognitoAuth {
    async fn create_account(&self, email: &str, password: &str) -> Result<AuthAccount, AuthError> {
        let secret_hash = self.secret_hash(email)?;
        let email_attribute = AttributeType::builder()
            .name("email")
            .value(email)
            .build()
            .map_err(|e| AuthError::Backend(e.to_string()))?;

        let output = self
            .client
            .sign_up()
            .client_id(&self.client_id)
            .username(email)
            .password(password)
            .secret_hash(&secret_hash)
            .user_attributes(email_attribute)
            .send()
            .await
            .map_err(|e| {
                let error_message = format!("{:?}", e);
                tracing::error!("Cognito signup error: {}", error_message);
                classify(&error_message)
            })?;

        // Confirm right away; the app has no email verification step.
        match self.user_pool_id.as_deref() {
            Some(user_pool_id) => {
                if let Err(e) = self
                    .client
                    .admin_confirm_sign_up()
                    .user_pool_id(user_pool_id)
                    .username(email)
                    .send()
                    .await
                {
                    tracing::error!("Failed to auto-confirm account {}: {:?}", email, e);
                }
            }
            None => tracing::warn!("COGNITO_USER_POOL_ID not set; skipping auto-confirm"),
        }

        Ok(AuthAccount {
            account_id: output.user_sub().to_string(),
            email: email.to_string(),
        })
    }

    async fn delete_account(&self, account: &AuthAccount) -> Result<(), AuthError> {
        let user_pool_id = self.user_pool_id()?;
        self.client
            .admin_delete_user()
            .user_pool_id(user_pool_id)
            .username(&account.email)
            .send()
            .await
            .map_err(|e| classify(&format!("{:?}", e)))?;
        Ok(())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let secret_hash = self.secret_hash(email)?;
        let response = self
            .client
            .initiate_auth()
            .auth_flow(AuthFlowType::UserPasswordAuth)
            .client_id(&self.client_id)
            .auth_parameters("USERNAME", email)
            .auth_parameters("PASSWORD", password)
            .auth_parameters("SECRET_HASH", &secret_hash)
            .send()
            .await
            .map_err(|e| {
                let error_message = format!("{:?}", e);
                tracing::error!("Cognito authentication error: {}", error_message);
                classify(&error_message)
            })?;

        let auth_result = response.authentication_result().ok_or_else(|| {
            // A challenge (e.g. NEW_PASSWORD_REQUIRED) instead of tokens.
            AuthError::Backend(format!(
                "no authentication result, challenge: {:?}",
                response.challenge_name()
            ))
        })?;

        let access_token = auth_result.access_token().unwrap_or_default().to_string();
        let account = self.account_for_token(&access_token).await?;

        Ok(AuthSession {
            account,
            access_token,
            refresh_token: auth_result.refresh_token().unwrap_or_default().to_string(),
            expires_in: auth_result.expires_in(),
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthError> {
        self.client
            .global_sign_out()
            .access_token(access_token)
            .send()
            .await
            .map_err(|e| classify(&format!("{:?}", e)))?;
        Ok(())
    }

    async fn current_account(&self, access_token: &str) -> Result<Option<AuthAccount>, AuthError> {
        match self.account_for_token(access_token).await {
            Ok(account) => Ok(Some(account)),
            Err(AuthError::NotAuthorized) | Err(AuthError::AccountNotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let secret_hash = self.secret_hash(email)?;
        self.client
            .forgot_password()
            .client_id(&self.client_id)
            .username(email)
            .secret_hash(&secret_hash)
            .send()
            .await
            .map_err(|e| classify(&format!("{:?}", e)))?;
        Ok(())
    }
}

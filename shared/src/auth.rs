use lambda_http::{http::StatusCode, Body, Error, Response};

use crate::identity::AuthError;
use crate::registration::{Registrar, RegistrationError};
use crate::responses;
use crate::sessions::{self, SessionError};
use crate::types::{LoginRequest, LoginResponse, PasswordResetRequest, RegistrationRequest};

fn registration_status(error: &RegistrationError) -> (StatusCode, &'static str) {
    match error {
        RegistrationError::Account(AuthError::EmailInUse) => (StatusCode::CONFLICT, "SignupFailed"),
        RegistrationError::Account(AuthError::InvalidPassword)
        | RegistrationError::Account(AuthError::InvalidParameter) => {
            (StatusCode::BAD_REQUEST, "SignupFailed")
        }
        RegistrationError::Account(AuthError::TooManyRequests) => {
            (StatusCode::TOO_MANY_REQUESTS, "SignupFailed")
        }
        RegistrationError::Account(_) => (StatusCode::BAD_GATEWAY, "SignupFailed"),
        RegistrationError::CommunityNotFound { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "CommunityNotFound")
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "RegistrationFailed"),
    }
}

fn session_status(error: &SessionError) -> (StatusCode, &'static str) {
    match error {
        SessionError::Auth(AuthError::TooManyRequests) => {
            (StatusCode::TOO_MANY_REQUESTS, "AuthenticationFailed")
        }
        SessionError::Auth(AuthError::Misconfigured(_)) | SessionError::Auth(AuthError::Backend(_)) => {
            (StatusCode::BAD_GATEWAY, "AuthenticationFailed")
        }
        SessionError::Auth(_) | SessionError::NotSignedIn => {
            (StatusCode::UNAUTHORIZED, "AuthenticationFailed")
        }
        SessionError::UserMissing(_) => (StatusCode::NOT_FOUND, "ProfileNotFound"),
        SessionError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ProfileFetchFailed"),
    }
}

pub(crate) fn session_error_response(error: &SessionError) -> Result<Response<Body>, Error> {
    let (status, code) = session_status(error);
    responses::error(status, code, error.user_message())
}

/// Register a user (and a community for admins without one)
pub async fn register(registrar: &Registrar, body: &Body) -> Result<Response<Body>, Error> {
    tracing::info!("Registration request received");

    let request: RegistrationRequest = match responses::parse_body(body) {
        Ok(req) => req,
        Err(message) => return responses::invalid_request(&message),
    };
    if request.name.trim().is_empty() {
        return responses::invalid_request("Name is required");
    }

    match registrar.register(&request).await {
        Ok(user) => {
            tracing::info!("Registered {} as {}", user.email, user.user_id);
            responses::json(StatusCode::CREATED, &user)
        }
        Err(e) => {
            tracing::error!(
                "Registration failed while {} (compensated: {}): {}",
                e.stage(),
                e.compensated(),
                e
            );
            let (status, code) = registration_status(&e);
            responses::error(status, code, e.user_message())
        }
    }
}

/// Sign in and return tokens plus the user record
pub async fn login(registrar: &Registrar, body: &Body) -> Result<Response<Body>, Error> {
    tracing::info!("Login request received");

    let request: LoginRequest = match responses::parse_body(body) {
        Ok(req) => req,
        Err(message) => return responses::invalid_request(&message),
    };

    match sessions::login(
        registrar.auth().as_ref(),
        registrar.store().as_ref(),
        &request.email,
        &request.password,
    )
    .await
    {
        Ok((session, user)) => responses::json(
            StatusCode::OK,
            &LoginResponse {
                access_token: session.access_token,
                refresh_token: session.refresh_token,
                expires_in: session.expires_in,
                user,
            },
        ),
        Err(e) => {
            tracing::error!("Login failed for {}: {}", request.email, e);
            session_error_response(&e)
        }
    }
}

pub async fn logout(registrar: &Registrar, access_token: Option<&str>) -> Result<Response<Body>, Error> {
    let Some(access_token) = access_token else {
        return responses::unauthorized();
    };
    match sessions::logout(registrar.auth().as_ref(), access_token).await {
        Ok(()) => responses::json(StatusCode::OK, &serde_json::json!({"message": "Signed out"})),
        Err(e) => {
            tracing::error!("Logout failed: {}", e);
            session_error_response(&e)
        }
    }
}

/// Start password recovery. Unknown emails get the same answer as known ones.
pub async fn password_reset(registrar: &Registrar, body: &Body) -> Result<Response<Body>, Error> {
    let request: PasswordResetRequest = match responses::parse_body(body) {
        Ok(req) => req,
        Err(message) => return responses::invalid_request(&message),
    };

    let accepted = serde_json::json!({
        "message": "If an account exists for this email, a reset code has been sent"
    });
    match sessions::request_password_reset(registrar.auth().as_ref(), &request.email).await {
        Ok(()) | Err(SessionError::Auth(AuthError::AccountNotFound)) => {
            responses::json(StatusCode::OK, &accepted)
        }
        Err(e) => {
            tracing::error!("Password reset failed for {}: {}", request.email, e);
            session_error_response(&e)
        }
    }
}

use lambda_http::{http::StatusCode, Body, Error, Response};

use crate::auth::session_error_response;
use crate::registration::Registrar;
use crate::responses;
use crate::sessions;

/// Get the user record of the signed-in account
pub async fn get_current_user(
    registrar: &Registrar,
    access_token: Option<&str>,
) -> Result<Response<Body>, Error> {
    let Some(access_token) = access_token else {
        return responses::unauthorized();
    };

    match sessions::current_user(
        registrar.auth().as_ref(),
        registrar.store().as_ref(),
        access_token,
    )
    .await
    {
        Ok(user) => responses::json(StatusCode::OK, &user),
        Err(e) => {
            tracing::warn!("Current user lookup failed: {}", e);
            session_error_response(&e)
        }
    }
}

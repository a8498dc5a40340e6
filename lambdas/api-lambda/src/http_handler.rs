use habitat_shared::{auth, communities, responses, users, AppState};
use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, Response,
};
use std::sync::Arc;

/// Token from an `Authorization: Bearer <token>` header.
fn bearer_token(event: &Request) -> Option<&str> {
    event
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Main Lambda handler - routes requests to auth, user and community endpoints
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path().trim_end_matches('/');
    let body = event.body();
    let registrar = &state.registrar;
    tracing::info!("Habitat API invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if *method == Method::OPTIONS {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "GET,POST,OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type,Authorization")
            .body(Body::Empty)
            .map_err(Box::new)?);
    }

    match path {
        "/register" => match *method {
            Method::POST => auth::register(registrar, body).await,
            _ => responses::method_not_allowed(),
        },
        "/login" => match *method {
            Method::POST => auth::login(registrar, body).await,
            _ => responses::method_not_allowed(),
        },
        "/logout" => match *method {
            Method::POST => auth::logout(registrar, bearer_token(&event)).await,
            _ => responses::method_not_allowed(),
        },
        "/password-reset" => match *method {
            Method::POST => auth::password_reset(registrar, body).await,
            _ => responses::method_not_allowed(),
        },
        "/users/me" => match *method {
            Method::GET => users::get_current_user(registrar, bearer_token(&event)).await,
            _ => responses::method_not_allowed(),
        },
        "/communities" => match *method {
            Method::POST => {
                communities::create_community(registrar, bearer_token(&event), body).await
            }
            _ => responses::method_not_allowed(),
        },
        _ => match path.strip_prefix("/communities/") {
            Some(community_id) if !community_id.contains('/') => match *method {
                Method::GET => {
                    communities::get_community(registrar.store().as_ref(), community_id).await
                }
                _ => responses::method_not_allowed(),
            },
            _ => responses::error(StatusCode::NOT_FOUND, "NotFound", "Not found"),
        },
    }
}

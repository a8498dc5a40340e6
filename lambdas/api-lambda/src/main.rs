use lambda_http::{run, service_fn, tracing, Error, Request};
use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use habitat_shared::config::Config;
use habitat_shared::AppState;
use std::sync::Arc;

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::init_default_subscriber();

    let config = Config::from_env()?;
    tracing::info!(
        "Starting with table {} (counter mode {:?}, compensation {:?}, follow-ups {:?})",
        config.table_name,
        config.registration.counter_mode,
        config.registration.compensation,
        config.follow_up_mode
    );

    // Initialize AWS clients once at startup
    let aws_config = aws_config::load_from_env().await;
    let state = AppState::new(
        CognitoClient::new(&aws_config),
        DynamoClient::new(&aws_config),
        config,
    );

    run(service_fn(move |event: Request| {
        let state = Arc::clone(&state);
        async move {
            let response = http_handler::function_handler(event, Arc::clone(&state)).await;
            // Queued follow-ups must land before the environment is frozen
            state.registrar.flush_follow_ups().await;
            response
        }
    }))
    .await
}

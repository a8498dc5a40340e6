pub mod types;
pub mod config;
pub mod store;
pub mod dynamo;
pub mod identity;
pub mod cognito;
pub mod memory;
pub mod ids;
pub mod followups;
pub mod registration;
pub mod communities;
pub mod sessions;
pub mod responses;
pub mod auth;
pub mod users;

use aws_sdk_cognitoidentityprovider::Client as CognitoClient;
use aws_sdk_dynamodb::Client as DynamoClient;
use std::sync::Arc;

use crate::cognito::CognitoAuth;
use crate::config::{Config, FollowUpMode};
use crate::dynamo::DynamoStore;
use crate::identity::AuthService;
use crate::registration::Registrar;
use crate::store::DocumentStore;

/// Shared application state
pub struct AppState {
    pub registrar: Registrar,
    pub config: Config,
}

impl AppState {
    /// State backed by Cognito and DynamoDB.
    pub fn new(cognito_client: CognitoClient, dynamo_client: DynamoClient, config: Config) -> Arc<Self> {
        let auth = CognitoAuth::new(
            cognito_client,
            config.cognito_client_id.clone(),
            config.cognito_client_secret.clone(),
            config.cognito_user_pool_id.clone(),
        );
        let store = DynamoStore::new(dynamo_client, config.table_name.clone());
        Self::from_parts(Arc::new(auth), Arc::new(store), config)
    }

    /// State over any backends. Spawns the follow-up worker when the config
    /// asks for queued follow-ups, so it must run inside a Tokio runtime.
    pub fn from_parts(
        auth: Arc<dyn AuthService>,
        store: Arc<dyn DocumentStore>,
        config: Config,
    ) -> Arc<Self> {
        let registrar = Registrar::new(auth, store, config.registration);
        // The worker lives as long as the registrar holds its queue.
        let registrar = match config.follow_up_mode {
            FollowUpMode::Inline => registrar,
            FollowUpMode::Queued => {
                let (queue, _worker) = followups::spawn_worker(registrar.follow_up_runner());
                registrar.with_follow_up_queue(queue)
            }
        };

        Arc::new(Self { registrar, config })
    }
}

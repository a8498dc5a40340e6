use lambda_http::{http::StatusCode, Body, Error, Response};

use crate::followups::{FollowUp, FollowUpRunner};
use crate::identity::AuthService;
use crate::ids::{AllocationError, CounterKind, IdAllocator};
use crate::registration::Registrar;
use crate::responses;
use crate::store::{get_record, put_record, DocumentStore, StoreError, COMMUNITIES};
use crate::types::{Community, CreateCommunityRequest};

#[derive(Debug, thiserror::Error)]
pub enum CommunityError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Allocate an id and write a new community. The counter is committed right
/// away (best-effort) so a later failure in the caller cannot hand the same
/// id out again.
pub async fn insert_community(
    ids: &IdAllocator,
    store: &dyn DocumentStore,
    runner: &FollowUpRunner,
    name: &str,
    address: &str,
    image_url: &str,
) -> Result<Community, CommunityError> {
    let allocated = ids.next(CounterKind::Communities).await?;
    let community = Community {
        community_id: allocated.id.clone(),
        name: name.to_string(),
        address: address.to_string(),
        image_url: image_url.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    put_record(store, COMMUNITIES, &community.community_id, &community).await?;
    tracing::info!("Created community {} ({})", community.community_id, community.name);

    if !allocated.committed {
        runner.run(&FollowUp::CommitCounter(allocated)).await;
    }
    Ok(community)
}

pub async fn find_community(
    store: &dyn DocumentStore,
    community_id: &str,
) -> Result<Option<Community>, StoreError> {
    get_record(store, COMMUNITIES, community_id).await
}

/// Create a community (requires a signed-in account)
pub async fn create_community(
    registrar: &Registrar,
    access_token: Option<&str>,
    body: &Body,
) -> Result<Response<Body>, Error> {
    let Some(access_token) = access_token else {
        return responses::unauthorized();
    };
    match registrar.auth().current_account(access_token).await {
        Ok(Some(_)) => {}
        Ok(None) => return responses::unauthorized(),
        Err(e) => {
            tracing::error!("Failed to check session: {}", e);
            return responses::error(StatusCode::BAD_GATEWAY, "AuthUnavailable", e.user_message());
        }
    }

    let request: CreateCommunityRequest = match responses::parse_body(body) {
        Ok(req) => req,
        Err(message) => return responses::invalid_request(&message),
    };
    if request.name.trim().is_empty() {
        return responses::invalid_request("Community name is required");
    }

    match registrar.create_community(&request).await {
        Ok(community) => responses::json(StatusCode::CREATED, &community),
        Err(e) => {
            tracing::error!("Failed to create community: {}", e);
            responses::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "CommunityCreationFailed",
                "Failed to create community",
            )
        }
    }
}

/// Get a community by id
pub async fn get_community(
    store: &dyn DocumentStore,
    community_id: &str,
) -> Result<Response<Body>, Error> {
    match find_community(store, community_id).await {
        Ok(Some(community)) => responses::json(StatusCode::OK, &community),
        Ok(None) => responses::error(StatusCode::NOT_FOUND, "NotFound", "Community not found"),
        Err(e) => {
            tracing::error!("Failed to get community {}: {}", community_id, e);
            responses::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "CommunityFetchFailed",
                "Failed to fetch community",
            )
        }
    }
}

//! Registration of a new user, and of a new community when an admin signs
//! up without one.
//!
//! The flow is a short saga: every completed step that created something
//! outside this process records how to undo it. Which failures actually run
//! those undo steps is decided by [`Compensation`].

use std::fmt;
use std::sync::Arc;

use crate::communities::{self, CommunityError};
use crate::followups::{FollowUp, FollowUpDispatch, FollowUpQueue, FollowUpRunner, RetryPolicy};
use crate::identity::{AuthAccount, AuthError, AuthService};
use crate::ids::{AllocationError, CounterKind, CounterMode, IdAllocator};
use crate::store::{put_record, DocumentStore, StoreError, COMMUNITIES, USERS};
use crate::types::{AccountLink, Community, CreateCommunityRequest, RegistrationRequest, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compensation {
    /// Only a failed user write deletes the new auth account. Any other
    /// failure after account creation leaves the account in place.
    #[default]
    PersistOnly,
    /// Any failure after account creation undoes every completed step in
    /// reverse order.
    AllSteps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStage {
    CreatingAuthAccount,
    AllocatingId,
    ResolvingCommunity,
    PersistingUser,
    WritingAuxiliaries,
    Succeeded,
}

impl fmt::Display for RegistrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationStage::CreatingAuthAccount => "creating auth account",
            RegistrationStage::AllocatingId => "allocating id",
            RegistrationStage::ResolvingCommunity => "resolving community",
            RegistrationStage::PersistingUser => "persisting user",
            RegistrationStage::WritingAuxiliaries => "writing auxiliaries",
            RegistrationStage::Succeeded => "succeeded",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("could not create account: {0}")]
    Account(#[source] AuthError),
    #[error("could not allocate user id: {source}")]
    Allocation {
        #[source]
        source: AllocationError,
        compensated: bool,
    },
    #[error("community {community_id} does not exist")]
    CommunityNotFound {
        community_id: String,
        compensated: bool,
    },
    #[error("could not resolve community: {source}")]
    Community {
        #[source]
        source: CommunityError,
        compensated: bool,
    },
    #[error("failed to persist user: {source}")]
    PersistUser {
        #[source]
        source: StoreError,
        compensated: bool,
    },
}

impl RegistrationError {
    /// Whether the steps completed before the failure were undone.
    pub fn compensated(&self) -> bool {
        match self {
            RegistrationError::Account(_) => false,
            RegistrationError::Allocation { compensated, .. }
            | RegistrationError::CommunityNotFound { compensated, .. }
            | RegistrationError::Community { compensated, .. }
            | RegistrationError::PersistUser { compensated, .. } => *compensated,
        }
    }

    pub fn stage(&self) -> RegistrationStage {
        match self {
            RegistrationError::Account(_) => RegistrationStage::CreatingAuthAccount,
            RegistrationError::Allocation { .. } => RegistrationStage::AllocatingId,
            RegistrationError::CommunityNotFound { .. } | RegistrationError::Community { .. } => {
                RegistrationStage::ResolvingCommunity
            }
            RegistrationError::PersistUser { .. } => RegistrationStage::PersistingUser,
        }
    }

    /// Message safe to show to the person registering.
    pub fn user_message(&self) -> &'static str {
        match self {
            RegistrationError::Account(e) => e.user_message(),
            RegistrationError::CommunityNotFound { .. } => {
                "The community code does not exist. Check it with your administrator"
            }
            _ => "Registration failed. Please try again",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegistrationOptions {
    pub counter_mode: CounterMode,
    pub compensation: Compensation,
    pub follow_up_retry: RetryPolicy,
}

enum Undo {
    DeleteAccount(AuthAccount),
    DeleteCommunity(String),
}

struct Saga {
    email: String,
    stage: RegistrationStage,
    completed: Vec<Undo>,
}

impl Saga {
    fn new(email: &str) -> Self {
        Self {
            email: email.to_string(),
            stage: RegistrationStage::CreatingAuthAccount,
            completed: Vec::new(),
        }
    }

    fn enter(&mut self, stage: RegistrationStage) {
        tracing::info!("Registration of {}: {}", self.email, stage);
        self.stage = stage;
    }

    fn record(&mut self, undo: Undo) {
        self.completed.push(undo);
    }
}

enum CommunityChoice {
    Create,
    Verify(String),
    Unverified(String),
}

fn choose_community(request: &RegistrationRequest) -> CommunityChoice {
    let community_id = request.community_id.trim();
    match (request.is_admin, community_id.is_empty()) {
        (true, true) => CommunityChoice::Create,
        (false, false) => CommunityChoice::Verify(community_id.to_string()),
        _ => CommunityChoice::Unverified(community_id.to_string()),
    }
}

#[derive(Clone)]
pub struct Registrar {
    auth: Arc<dyn AuthService>,
    store: Arc<dyn DocumentStore>,
    ids: IdAllocator,
    compensation: Compensation,
    runner: FollowUpRunner,
    follow_ups: FollowUpDispatch,
}

impl Registrar {
    /// Follow-ups run inline until [`Registrar::with_follow_up_queue`] is used.
    pub fn new(
        auth: Arc<dyn AuthService>,
        store: Arc<dyn DocumentStore>,
        options: RegistrationOptions,
    ) -> Self {
        let ids = IdAllocator::new(store.clone(), options.counter_mode);
        let runner = FollowUpRunner::new(store.clone(), ids.clone(), options.follow_up_retry);
        Self {
            auth,
            store,
            ids,
            compensation: options.compensation,
            follow_ups: FollowUpDispatch::Inline(runner.clone()),
            runner,
        }
    }

    /// Send account links to a background worker. Counter write-backs stay
    /// in the request path so the next registration reads the new count.
    pub fn with_follow_up_queue(mut self, queue: FollowUpQueue) -> Self {
        self.follow_ups = FollowUpDispatch::Queued(queue);
        self
    }

    /// Wait for queued follow-ups to be written.
    pub async fn flush_follow_ups(&self) {
        self.follow_ups.flush().await;
    }

    pub fn follow_up_runner(&self) -> FollowUpRunner {
        self.runner.clone()
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn auth(&self) -> &Arc<dyn AuthService> {
        &self.auth
    }

    /// Create a community on its own, outside of any registration.
    pub async fn create_community(
        &self,
        request: &CreateCommunityRequest,
    ) -> Result<Community, CommunityError> {
        communities::insert_community(
            &self.ids,
            self.store.as_ref(),
            &self.runner,
            request.name.trim(),
            request.address.trim(),
            request.image_url.trim(),
        )
        .await
    }

    pub async fn register(&self, request: &RegistrationRequest) -> Result<User, RegistrationError> {
        let email = request.email.trim();
        let mut saga = Saga::new(email);

        saga.enter(RegistrationStage::CreatingAuthAccount);
        let account = self
            .auth
            .create_account(email, &request.password)
            .await
            .map_err(|e| {
                tracing::warn!("Account creation failed for {}: {}", email, e);
                RegistrationError::Account(e)
            })?;
        saga.record(Undo::DeleteAccount(account.clone()));

        saga.enter(RegistrationStage::AllocatingId);
        let allocated = match self.ids.next(CounterKind::Users).await {
            Ok(allocated) => allocated,
            Err(source) => {
                let compensated = self.unwind(saga).await;
                return Err(RegistrationError::Allocation { source, compensated });
            }
        };

        saga.enter(RegistrationStage::ResolvingCommunity);
        let community_id = match choose_community(request) {
            CommunityChoice::Create => {
                match communities::insert_community(
                    &self.ids,
                    self.store.as_ref(),
                    &self.runner,
                    request.name.trim(),
                    "",
                    "",
                )
                .await
                {
                    Ok(community) => {
                        saga.record(Undo::DeleteCommunity(community.community_id.clone()));
                        community.community_id
                    }
                    Err(source) => {
                        let compensated = self.unwind(saga).await;
                        return Err(RegistrationError::Community { source, compensated });
                    }
                }
            }
            CommunityChoice::Verify(community_id) => {
                match self.store.get(COMMUNITIES, &community_id).await {
                    Ok(Some(_)) => community_id,
                    Ok(None) => {
                        tracing::warn!("Community {} does not exist", community_id);
                        let compensated = self.unwind(saga).await;
                        return Err(RegistrationError::CommunityNotFound {
                            community_id,
                            compensated,
                        });
                    }
                    Err(e) => {
                        let compensated = self.unwind(saga).await;
                        return Err(RegistrationError::Community {
                            source: CommunityError::Store(e),
                            compensated,
                        });
                    }
                }
            }
            CommunityChoice::Unverified(community_id) => {
                if !community_id.is_empty() {
                    tracing::info!("Using community {} without checking it exists", community_id);
                }
                community_id
            }
        };

        saga.enter(RegistrationStage::PersistingUser);
        let user = User {
            user_id: allocated.id.clone(),
            name: request.name.trim().to_string(),
            email: email.to_string(),
            phone: request.phone.trim().to_string(),
            photo_url: String::new(),
            registered_at: chrono::Utc::now().to_rfc3339(),
            community_id,
            is_admin: request.is_admin,
        };
        if let Err(source) = put_record(self.store.as_ref(), USERS, &user.user_id, &user).await {
            tracing::error!("Failed to persist user {}: {}", user.user_id, source);
            let compensated = self.unwind(saga).await;
            return Err(RegistrationError::PersistUser { source, compensated });
        }

        saga.enter(RegistrationStage::WritingAuxiliaries);
        self.follow_ups
            .dispatch(FollowUp::LinkAccount {
                account_id: account.account_id.clone(),
                link: AccountLink {
                    user_id: user.user_id.clone(),
                    email: user.email.clone(),
                },
            })
            .await;
        if !allocated.committed {
            self.runner.run(&FollowUp::CommitCounter(allocated)).await;
        }

        saga.enter(RegistrationStage::Succeeded);
        Ok(user)
    }

    /// Run the undo steps the policy allows for a failure at `saga.stage`,
    /// newest first. Returns true only if at least one step ran and all of
    /// them succeeded.
    async fn unwind(&self, saga: Saga) -> bool {
        tracing::error!("Registration of {} failed while {}", saga.email, saga.stage);
        let applies = match self.compensation {
            Compensation::AllSteps => true,
            Compensation::PersistOnly => saga.stage == RegistrationStage::PersistingUser,
        };
        if !applies {
            tracing::warn!(
                "Leaving earlier steps of {}'s registration in place",
                saga.email
            );
            return false;
        }

        let mut ran = false;
        let mut all_ok = true;
        for undo in saga.completed.into_iter().rev() {
            let result = match &undo {
                Undo::DeleteAccount(account) => {
                    self.auth.delete_account(account).await.map_err(|e| e.to_string())
                }
                Undo::DeleteCommunity(community_id) if self.compensation == Compensation::AllSteps => {
                    self.store
                        .delete(COMMUNITIES, community_id)
                        .await
                        .map_err(|e| e.to_string())
                }
                Undo::DeleteCommunity(_) => continue,
            };
            ran = true;
            if let Err(e) = result {
                all_ok = false;
                match undo {
                    Undo::DeleteAccount(account) => tracing::error!(
                        "Could not delete orphaned account {} ({}): {}",
                        account.account_id,
                        account.email,
                        e
                    ),
                    Undo::DeleteCommunity(community_id) => tracing::error!(
                        "Could not delete community {}: {}",
                        community_id,
                        e
                    ),
                }
            }
        }
        ran && all_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(is_admin: bool, community_id: &str) -> RegistrationRequest {
        RegistrationRequest {
            name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
            password: "Secreto123!".to_string(),
            phone: String::new(),
            community_id: community_id.to_string(),
            is_admin,
        }
    }

    #[test]
    fn admin_without_community_creates_one() {
        assert!(matches!(choose_community(&request(true, "")), CommunityChoice::Create));
    }

    #[test]
    fn resident_with_community_is_verified() {
        assert!(matches!(
            choose_community(&request(false, " Cs0000001a ")),
            CommunityChoice::Verify(id) if id == "Cs0000001a"
        ));
    }

    #[test]
    fn remaining_combinations_pass_through() {
        assert!(matches!(
            choose_community(&request(true, "Cs0000009a")),
            CommunityChoice::Unverified(id) if id == "Cs0000009a"
        ));
        assert!(matches!(
            choose_community(&request(false, "")),
            CommunityChoice::Unverified(id) if id.is_empty()
        ));
    }

    #[test]
    fn community_errors_point_at_resolution_stage() {
        let err = RegistrationError::CommunityNotFound {
            community_id: "Cs0000001a".to_string(),
            compensated: false,
        };
        assert_eq!(err.stage(), RegistrationStage::ResolvingCommunity);
        assert!(!err.compensated());
        assert!(err.user_message().contains("does not exist"));
    }
}

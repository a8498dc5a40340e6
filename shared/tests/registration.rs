use std::sync::Arc;

use habitat_shared::followups::{spawn_worker, RetryPolicy};
use habitat_shared::identity::{AuthError, AuthService};
use habitat_shared::ids::CounterMode;
use habitat_shared::memory::{MemoryAuth, MemoryStore};
use habitat_shared::registration::{
    Compensation, Registrar, RegistrationError, RegistrationOptions, RegistrationStage,
};
use habitat_shared::sessions;
use habitat_shared::store::{
    get_record, put_record, DocumentStore, ACCOUNT_LINKS, COMMUNITIES, COUNTERS, USERS,
};
use habitat_shared::types::{AccountLink, Community, RegistrationRequest, User};
use serde_json::json;

struct Harness {
    auth: Arc<MemoryAuth>,
    store: Arc<MemoryStore>,
    registrar: Registrar,
}

fn harness_with(counter_mode: CounterMode, compensation: Compensation) -> Harness {
    let auth = Arc::new(MemoryAuth::new());
    let store = Arc::new(MemoryStore::new());
    let registrar = Registrar::new(
        auth.clone(),
        store.clone(),
        RegistrationOptions {
            counter_mode,
            compensation,
            follow_up_retry: RetryPolicy::once(),
        },
    );
    Harness {
        auth,
        store,
        registrar,
    }
}

fn harness() -> Harness {
    harness_with(CounterMode::ReadThenWrite, Compensation::PersistOnly)
}

fn resident(email: &str, community_id: &str) -> RegistrationRequest {
    RegistrationRequest {
        name: "Luis Pérez".to_string(),
        email: email.to_string(),
        password: "Secreto123!".to_string(),
        phone: "+34 600 000 000".to_string(),
        community_id: community_id.to_string(),
        is_admin: false,
    }
}

fn admin(email: &str) -> RegistrationRequest {
    RegistrationRequest {
        name: "Ana Gómez".to_string(),
        is_admin: true,
        ..resident(email, "")
    }
}

async fn seed_community(store: &MemoryStore, community_id: &str) {
    let community = Community {
        community_id: community_id.to_string(),
        name: "Los Pinos".to_string(),
        address: "Calle Mayor 1".to_string(),
        image_url: String::new(),
        created_at: "2026-01-01T00:00:00+00:00".to_string(),
    };
    put_record(store, COMMUNITIES, community_id, &community).await.unwrap();
}

#[tokio::test]
async fn first_user_gets_first_id() {
    let h = harness();
    let user = h.registrar.register(&admin("ana@example.com")).await.unwrap();

    assert_eq!(user.user_id, "Us0000001a");
    assert!(user.is_admin);
    let stored: Option<User> = get_record(h.store.as_ref(), USERS, "Us0000001a").await.unwrap();
    assert_eq!(stored, Some(user));
}

#[tokio::test]
async fn sequential_registrations_get_increasing_ids() {
    let h = harness();
    seed_community(&h.store, "Cs0000001a").await;

    let mut ids = Vec::new();
    for n in 0..5 {
        let email = format!("vecino{}@example.com", n);
        let user = h.registrar.register(&resident(&email, "Cs0000001a")).await.unwrap();
        ids.push(user.user_id);
    }

    assert_eq!(
        ids,
        vec!["Us0000001a", "Us0000002a", "Us0000003a", "Us0000004a", "Us0000005a"]
    );
    let counter = h.store.get(COUNTERS, "users").await.unwrap().unwrap();
    assert_eq!(counter.get("count"), Some(&json!(5)));
}

#[tokio::test]
async fn admin_without_community_creates_exactly_one() {
    let h = harness();
    h.store
        .set(COUNTERS, "communities", json!({"count": 41}).as_object().cloned().unwrap())
        .await
        .unwrap();

    let user = h.registrar.register(&admin("ana@example.com")).await.unwrap();

    assert_eq!(h.store.ids(COMMUNITIES).await, vec!["Cs0000042a".to_string()]);
    assert_eq!(user.community_id, "Cs0000042a");
    let community: Community = get_record(h.store.as_ref(), COMMUNITIES, "Cs0000042a")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(community.name, "Ana Gómez");
}

#[tokio::test]
async fn admin_with_explicit_community_is_not_verified() {
    let h = harness();
    let mut request = admin("ana@example.com");
    request.community_id = "Cs0000077a".to_string();

    let user = h.registrar.register(&request).await.unwrap();

    assert_eq!(user.community_id, "Cs0000077a");
    assert!(h.store.ids(COMMUNITIES).await.is_empty());
}

#[tokio::test]
async fn resident_without_community_is_stored_unassigned() {
    let h = harness();
    let user = h.registrar.register(&resident("luis@example.com", "")).await.unwrap();
    assert!(user.community_id.is_empty());
    assert!(!user.is_admin);
}

#[tokio::test]
async fn resident_with_existing_community_joins_it() {
    let h = harness();
    seed_community(&h.store, "Cs0000003a").await;

    let user = h
        .registrar
        .register(&resident("luis@example.com", "Cs0000003a"))
        .await
        .unwrap();
    assert_eq!(user.community_id, "Cs0000003a");
}

#[tokio::test]
async fn missing_community_leaves_the_auth_account_behind() {
    let h = harness();

    let err = h
        .registrar
        .register(&resident("luis@example.com", "Cs0000099a"))
        .await
        .unwrap_err();

    assert!(matches!(
        &err,
        RegistrationError::CommunityNotFound { community_id, compensated: false }
            if community_id == "Cs0000099a"
    ));
    assert!(h.store.ids(USERS).await.is_empty());
    assert!(h.auth.has_account("luis@example.com").await);
}

#[tokio::test]
async fn missing_community_is_undone_when_all_steps_compensate() {
    let h = harness_with(CounterMode::ReadThenWrite, Compensation::AllSteps);

    let err = h
        .registrar
        .register(&resident("luis@example.com", "Cs0000099a"))
        .await
        .unwrap_err();

    assert!(err.compensated());
    assert!(!h.auth.has_account("luis@example.com").await);
}

#[tokio::test]
async fn failed_user_write_deletes_the_account() {
    let h = harness();
    h.store.fail_writes(USERS).await;

    let err = h.registrar.register(&admin("ana@example.com")).await.unwrap_err();

    assert_eq!(err.stage(), RegistrationStage::PersistingUser);
    assert!(matches!(err, RegistrationError::PersistUser { compensated: true, .. }));
    assert_eq!(h.auth.account_count().await, 0);
    // persist-only leaves the community created in this attempt
    assert_eq!(h.store.ids(COMMUNITIES).await.len(), 1);
}

#[tokio::test]
async fn all_steps_also_removes_the_new_community() {
    let h = harness_with(CounterMode::ReadThenWrite, Compensation::AllSteps);
    h.store.fail_writes(USERS).await;

    let err = h.registrar.register(&admin("ana@example.com")).await.unwrap_err();

    assert!(err.compensated());
    assert_eq!(h.auth.account_count().await, 0);
    assert!(h.store.ids(COMMUNITIES).await.is_empty());
}

#[tokio::test]
async fn failed_compensation_is_reported_but_not_retried() {
    let h = harness();
    h.store.fail_writes(USERS).await;
    h.auth.fail_deletes(true).await;

    let err = h.registrar.register(&admin("ana@example.com")).await.unwrap_err();

    assert!(matches!(err, RegistrationError::PersistUser { compensated: false, .. }));
    assert!(h.auth.has_account("ana@example.com").await);
}

#[tokio::test]
async fn account_conflicts_stop_before_any_write() {
    let h = harness();
    h.auth.create_account("ana@example.com", "Secreto123!").await.unwrap();

    let err = h.registrar.register(&admin("ana@example.com")).await.unwrap_err();

    assert!(matches!(err, RegistrationError::Account(AuthError::EmailInUse)));
    assert_eq!(err.stage(), RegistrationStage::CreatingAuthAccount);
    assert!(h.store.ids(COUNTERS).await.is_empty());
    assert!(h.store.ids(USERS).await.is_empty());
}

#[tokio::test]
async fn counter_read_failure_is_fatal() {
    let h = harness();
    h.store.fail_reads(COUNTERS).await;

    let err = h.registrar.register(&admin("ana@example.com")).await.unwrap_err();
    assert!(matches!(err, RegistrationError::Allocation { compensated: false, .. }));
}

#[tokio::test]
async fn auxiliary_failures_do_not_fail_registration() {
    let h = harness();
    h.store.fail_writes(ACCOUNT_LINKS).await;
    h.store.fail_writes(COUNTERS).await;

    let user = h.registrar.register(&admin("ana@example.com")).await.unwrap();

    assert_eq!(user.user_id, "Us0000001a");
    assert!(h.store.ids(ACCOUNT_LINKS).await.is_empty());
    // the counter never advanced, so the next allocation reuses the slot
    h.store.heal().await;
    let next = h
        .registrar
        .register(&resident("luis@example.com", ""))
        .await
        .unwrap();
    assert_eq!(next.user_id, "Us0000001a");
}

#[tokio::test]
async fn successful_registration_links_the_account() {
    let h = harness();
    let user = h.registrar.register(&admin("ana@example.com")).await.unwrap();

    let links = h.store.ids(ACCOUNT_LINKS).await;
    assert_eq!(links.len(), 1);
    let link: AccountLink = get_record(h.store.as_ref(), ACCOUNT_LINKS, &links[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(link.user_id, user.user_id);
    assert_eq!(link.email, "ana@example.com");
}

#[tokio::test]
async fn repeating_a_registration_is_never_deduplicated() {
    let h = harness();
    let request = resident("luis@example.com", "");
    let first = h.registrar.register(&request).await.unwrap();

    // the auth service refuses the same email twice; nothing else is written
    let err = h.registrar.register(&request).await.unwrap_err();
    assert!(matches!(err, RegistrationError::Account(AuthError::EmailInUse)));

    // once the provider lets the email through again, a second record appears
    let session = h.auth.sign_in("luis@example.com", "Secreto123!").await.unwrap();
    h.auth.delete_account(&session.account).await.unwrap();
    let second = h.registrar.register(&request).await.unwrap();

    assert_ne!(first.user_id, second.user_id);
    assert_eq!(h.store.ids(USERS).await.len(), 2);
}

#[tokio::test]
async fn atomic_counters_advance_without_write_back() {
    let h = harness_with(CounterMode::Atomic, Compensation::PersistOnly);
    h.store.fail_writes(ACCOUNT_LINKS).await;

    let first = h.registrar.register(&admin("ana@example.com")).await.unwrap();
    let second = h.registrar.register(&admin("eva@example.com")).await.unwrap();

    assert_eq!(first.user_id, "Us0000001a");
    assert_eq!(second.user_id, "Us0000002a");
    assert_eq!(second.community_id, "Cs0000002a");
}

#[tokio::test]
async fn concurrent_read_then_write_registrations_can_collide() {
    let h = harness();
    // both allocations read the counter before either writes it back
    let (uno, dos) = (
        resident("uno@example.com", ""),
        resident("dos@example.com", ""),
    );
    let (a, b) = tokio::join!(h.registrar.register(&uno), h.registrar.register(&dos),);
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.user_id, b.user_id);
    assert_eq!(h.store.ids(USERS).await.len(), 1);
}

#[tokio::test]
async fn concurrent_atomic_registrations_get_distinct_ids() {
    let h = harness_with(CounterMode::Atomic, Compensation::PersistOnly);
    let (uno, dos) = (
        resident("uno@example.com", ""),
        resident("dos@example.com", ""),
    );
    let (a, b) = tokio::join!(h.registrar.register(&uno), h.registrar.register(&dos),);
    assert_ne!(a.unwrap().user_id, b.unwrap().user_id);
    assert_eq!(h.store.ids(USERS).await.len(), 2);
}

#[tokio::test]
async fn queued_follow_ups_are_written_by_the_worker() {
    let h = harness();
    let (queue, worker) = spawn_worker(h.registrar.follow_up_runner());
    let registrar = h.registrar.clone().with_follow_up_queue(queue);

    let user = registrar.register(&admin("ana@example.com")).await.unwrap();
    drop(registrar);
    worker.await.unwrap();

    let counter = h.store.get(COUNTERS, "users").await.unwrap().unwrap();
    assert_eq!(counter.get("count"), Some(&json!(1)));
    assert_eq!(h.store.ids(ACCOUNT_LINKS).await.len(), 1);
    assert_eq!(user.user_id, "Us0000001a");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queued_registrations_in_sequence_get_increasing_ids() {
    let h = harness();
    let (queue, _worker) = spawn_worker(h.registrar.follow_up_runner());
    let registrar = h.registrar.clone().with_follow_up_queue(queue);

    let mut ids = Vec::new();
    for email in ["uno@example.com", "dos@example.com", "tres@example.com"] {
        ids.push(registrar.register(&resident(email, "")).await.unwrap().user_id);
    }

    assert_eq!(ids, vec!["Us0000001a", "Us0000002a", "Us0000003a"]);
    assert_eq!(h.store.ids(USERS).await.len(), 3);

    registrar.flush_follow_ups().await;
    assert_eq!(h.store.ids(ACCOUNT_LINKS).await.len(), 3);
}

#[tokio::test]
async fn failed_community_write_leaves_admin_account_behind() {
    let h = harness();
    h.store.fail_writes(COMMUNITIES).await;

    let err = h.registrar.register(&admin("ana@example.com")).await.unwrap_err();

    assert!(matches!(err, RegistrationError::Community { compensated: false, .. }));
    assert_eq!(err.stage(), RegistrationStage::ResolvingCommunity);
    assert!(h.auth.has_account("ana@example.com").await);
    assert!(h.store.ids(USERS).await.is_empty());
}

#[tokio::test]
async fn login_finds_the_registered_user() {
    let h = harness();
    let user = h.registrar.register(&admin("ana@example.com")).await.unwrap();

    let (session, found) = sessions::login(
        h.auth.as_ref(),
        h.store.as_ref(),
        "ana@example.com",
        "Secreto123!",
    )
    .await
    .unwrap();
    assert_eq!(found, user);

    let current = sessions::current_user(h.auth.as_ref(), h.store.as_ref(), &session.access_token)
        .await
        .unwrap();
    assert_eq!(current.user_id, user.user_id);
}

#[tokio::test]
async fn login_falls_back_to_email_without_a_link() {
    let h = harness();
    h.store.fail_writes(ACCOUNT_LINKS).await;
    let user = h.registrar.register(&admin("ana@example.com")).await.unwrap();

    let (_, found) = sessions::login(
        h.auth.as_ref(),
        h.store.as_ref(),
        "ana@example.com",
        "Secreto123!",
    )
    .await
    .unwrap();
    assert_eq!(found.user_id, user.user_id);
}

#[tokio::test]
async fn orphaned_accounts_cannot_log_in() {
    let h = harness();
    let _ = h
        .registrar
        .register(&resident("luis@example.com", "Cs0000099a"))
        .await
        .unwrap_err();

    let err = sessions::login(
        h.auth.as_ref(),
        h.store.as_ref(),
        "luis@example.com",
        "Secreto123!",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, sessions::SessionError::UserMissing(_)));
}

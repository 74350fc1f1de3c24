use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use identity_gate::auth::{
    ConsumedToken, InMemoryRefreshTokenStore, RefreshTokenStore, TokenIssuer,
};
use identity_gate::configuration::JwtSettings;
use identity_gate::coordinator::AuthCoordinator;
use identity_gate::directory::{
    InMemoryUserDirectory, NewUser, User, UserDirectory, UserPatch, DEFAULT_ROLE,
};
use identity_gate::error::{AppError, AuthError, ConflictError, InfrastructureError, TokenError};
use uuid::Uuid;

const PASSWORD: &str = "Sw0rdFish!";

fn database_down() -> AppError {
    InfrastructureError::Database("connection reset".to_string()).into()
}

/// Delegating store that counts issued tokens, can stall `consume` and can
/// be switched to fail `issue` or the revocations.
struct ObservedStore {
    inner: InMemoryRefreshTokenStore,
    issued: AtomicUsize,
    consume_delay: Option<Duration>,
    fail_issue: AtomicBool,
    fail_revoke: AtomicBool,
}

impl ObservedStore {
    fn new(ttl: chrono::Duration) -> Self {
        Self {
            inner: InMemoryRefreshTokenStore::new(ttl),
            issued: AtomicUsize::new(0),
            consume_delay: None,
            fail_issue: AtomicBool::new(false),
            fail_revoke: AtomicBool::new(false),
        }
    }

    fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RefreshTokenStore for ObservedStore {
    async fn issue(&self, user_id: Uuid) -> Result<String, AppError> {
        if self.fail_issue.load(Ordering::SeqCst) {
            return Err(database_down());
        }
        self.issued.fetch_add(1, Ordering::SeqCst);
        self.inner.issue(user_id).await
    }

    async fn consume(&self, token: &str) -> Result<Option<ConsumedToken>, AppError> {
        if let Some(delay) = self.consume_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.consume(token).await
    }

    async fn is_active(&self, token: &str) -> Result<bool, AppError> {
        self.inner.is_active(token).await
    }

    async fn revoke_for_user(&self, user_id: Uuid, token: &str) -> Result<bool, AppError> {
        if self.fail_revoke.load(Ordering::SeqCst) {
            return Err(database_down());
        }
        self.inner.revoke_for_user(user_id, token).await
    }

    async fn revoke_all_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        if self.fail_revoke.load(Ordering::SeqCst) {
            return Err(database_down());
        }
        self.inner.revoke_all_for_user(user_id).await
    }
}

/// Delegating directory with switches to fail `create` or `assign_role`.
/// Also counts the password checks made for identifiers that matched nobody.
struct FlakyDirectory {
    inner: InMemoryUserDirectory,
    fail_create: AtomicBool,
    fail_assign_role: AtomicBool,
    unknown_user_checks: AtomicUsize,
}

impl FlakyDirectory {
    fn new() -> Self {
        Self {
            inner: InMemoryUserDirectory::new(4),
            fail_create: AtomicBool::new(false),
            fail_assign_role: AtomicBool::new(false),
            unknown_user_checks: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl UserDirectory for FlakyDirectory {
    async fn find_by_username_or_email(&self, identifier: &str) -> Result<Option<User>, AppError> {
        self.inner.find_by_username_or_email(identifier).await
    }

    async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        self.inner.find_by_id(user_id).await
    }

    async fn username_exists(&self, username: &str) -> Result<bool, AppError> {
        self.inner.username_exists(username).await
    }

    async fn email_exists(&self, email: &str) -> Result<bool, AppError> {
        self.inner.email_exists(email).await
    }

    async fn create(&self, new_user: NewUser) -> Result<User, AppError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(database_down());
        }
        self.inner.create(new_user).await
    }

    async fn assign_role(&self, user_id: Uuid, role_name: &str) -> Result<(), AppError> {
        if self.fail_assign_role.load(Ordering::SeqCst) {
            return Err(database_down());
        }
        self.inner.assign_role(user_id, role_name).await
    }

    async fn roles_of(&self, user_id: Uuid) -> Result<Vec<String>, AppError> {
        self.inner.roles_of(user_id).await
    }

    async fn update(&self, user_id: Uuid, patch: UserPatch) -> Result<Option<User>, AppError> {
        self.inner.update(user_id, patch).await
    }

    async fn deactivate(&self, user_id: Uuid) -> Result<bool, AppError> {
        self.inner.deactivate(user_id).await
    }

    async fn list_active(&self, page: u32, page_size: u32) -> Result<Vec<User>, AppError> {
        self.inner.list_active(page, page_size).await
    }

    async fn verify_password_for_unknown_user(&self, password: &str) -> Result<(), AppError> {
        self.unknown_user_checks.fetch_add(1, Ordering::SeqCst);
        self.inner.verify_password_for_unknown_user(password).await
    }
}

struct Harness {
    coordinator: AuthCoordinator,
    directory: Arc<FlakyDirectory>,
    tokens: Arc<ObservedStore>,
}

fn jwt_settings() -> JwtSettings {
    JwtSettings {
        secret: "coordinator-test-secret-at-least-32-bytes".to_string(),
        issuer: "identity-gate".to_string(),
        audience: "gateway".to_string(),
        access_token_expiry_minutes: 60,
        refresh_token_expiry_days: 7,
    }
}

fn harness_with(store: ObservedStore, store_timeout: Duration) -> Harness {
    let directory = Arc::new(FlakyDirectory::new());
    let tokens = Arc::new(store);
    let coordinator = AuthCoordinator::new(
        directory.clone(),
        tokens.clone(),
        Arc::new(TokenIssuer::new(&jwt_settings())),
        store_timeout,
    );
    Harness {
        coordinator,
        directory,
        tokens,
    }
}

fn harness() -> Harness {
    harness_with(
        ObservedStore::new(chrono::Duration::days(7)),
        Duration::from_secs(5),
    )
}

fn new_user(username: &str) -> NewUser {
    NewUser {
        username: username.to_string(),
        email: format!("{}@example.com", username),
        password: PASSWORD.to_string(),
        first_name: None,
        last_name: None,
        phone_number: None,
    }
}

#[tokio::test]
async fn registering_a_taken_username_creates_nothing() {
    let h = harness();
    h.coordinator.register(new_user("alice")).await.unwrap();

    let mut duplicate = new_user("Alice");
    duplicate.email = "someone-else@example.com".to_string();
    let result = h.coordinator.register(duplicate).await;

    assert!(matches!(
        result,
        Err(AppError::Conflict(ConflictError::UsernameTaken))
    ));
    assert!(!h
        .directory
        .email_exists("someone-else@example.com")
        .await
        .unwrap());
}

#[tokio::test]
async fn registered_user_has_the_default_role() {
    let h = harness();

    let session = h.coordinator.register(new_user("alice")).await.unwrap();
    let user = h.coordinator.get_user(session.user.id).await.unwrap();

    assert!(user.roles.contains(&"User".to_string()));
    let claims = h
        .coordinator
        .issuer()
        .validate(&session.access_token)
        .unwrap();
    assert!(claims.has_role("User"));
    assert_eq!(claims.user_id().unwrap(), user.id);
}

#[tokio::test]
async fn registration_does_not_depend_on_a_separate_role_assignment() {
    let h = harness();
    h.directory.fail_assign_role.store(true, Ordering::SeqCst);

    let session = h.coordinator.register(new_user("alice")).await.unwrap();

    assert_eq!(session.user.roles, vec![DEFAULT_ROLE.to_string()]);
    let login = h.coordinator.login("alice", PASSWORD).await.unwrap();
    assert!(h
        .coordinator
        .issuer()
        .validate(&login.access_token)
        .unwrap()
        .has_role(DEFAULT_ROLE));
}

#[tokio::test]
async fn failed_registration_leaves_nothing_behind_and_can_be_retried() {
    let h = harness();
    h.directory.fail_create.store(true, Ordering::SeqCst);

    let result = h.coordinator.register(new_user("alice")).await;

    assert!(matches!(
        result,
        Err(AppError::Infrastructure(InfrastructureError::Database(_)))
    ));
    assert!(!h.directory.username_exists("alice").await.unwrap());
    assert_eq!(h.tokens.issued(), 0);

    h.directory.fail_create.store(false, Ordering::SeqCst);
    let session = h.coordinator.register(new_user("alice")).await.unwrap();
    assert_eq!(session.user.roles, vec![DEFAULT_ROLE.to_string()]);
}

#[tokio::test]
async fn wrong_password_issues_no_refresh_token() {
    let h = harness();
    h.coordinator.register(new_user("alice")).await.unwrap();
    let issued_before = h.tokens.issued();

    let result = h.coordinator.login("alice", "Wr0ngPassword").await;

    assert!(matches!(
        result,
        Err(AppError::Auth(AuthError::InvalidCredentials))
    ));
    assert_eq!(h.tokens.issued(), issued_before);
}

#[tokio::test]
async fn unknown_identifier_looks_like_wrong_password() {
    let h = harness();

    let result = h.coordinator.login("nobody", PASSWORD).await;

    assert!(matches!(
        result,
        Err(AppError::Auth(AuthError::InvalidCredentials))
    ));
    assert_eq!(h.tokens.issued(), 0);
    // Still pays for a bcrypt round, like a wrong password does.
    assert_eq!(h.directory.unknown_user_checks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_refreshes_of_one_token_have_a_single_winner() {
    let h = harness();
    h.coordinator.register(new_user("alice")).await.unwrap();
    let session = h.coordinator.login("alice", PASSWORD).await.unwrap();

    let first = h.coordinator.clone();
    let second = h.coordinator.clone();
    let token_a = session.refresh_token.clone();
    let token_b = session.refresh_token.clone();

    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.refresh(&token_a).await }),
        tokio::spawn(async move { second.refresh(&token_b).await }),
    );
    let outcomes = [a.unwrap(), b.unwrap()];

    let winners = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(AppError::Token(TokenError::RefreshInvalid)))));
    assert!(!h.tokens.is_active(&session.refresh_token).await.unwrap());
}

#[tokio::test]
async fn expired_refresh_token_is_rejected_and_user_untouched() {
    let h = harness_with(
        ObservedStore::new(chrono::Duration::seconds(-1)),
        Duration::from_secs(5),
    );
    let session = h.coordinator.register(new_user("alice")).await.unwrap();

    let result = h.coordinator.refresh(&session.refresh_token).await;

    assert!(matches!(
        result,
        Err(AppError::Token(TokenError::RefreshExpired))
    ));
    // Consumed on the way: a second attempt no longer even finds it.
    assert!(matches!(
        h.coordinator.refresh(&session.refresh_token).await,
        Err(AppError::Token(TokenError::RefreshInvalid))
    ));
    let user = h.directory.find_by_id(session.user.id).await.unwrap().unwrap();
    assert!(user.is_active);
}

#[tokio::test]
async fn refresh_burns_the_token_even_when_the_user_is_gone() {
    let h = harness();
    let session = h.coordinator.register(new_user("alice")).await.unwrap();
    h.directory.deactivate(session.user.id).await.unwrap();

    let result = h.coordinator.refresh(&session.refresh_token).await;

    assert!(matches!(
        result,
        Err(AppError::Auth(AuthError::UserUnavailable))
    ));
    assert!(!h.tokens.is_active(&session.refresh_token).await.unwrap());
}

#[tokio::test]
async fn logout_of_unknown_user_returns_false() {
    let h = harness();

    assert!(!h
        .coordinator
        .logout(Uuid::new_v4(), None, false)
        .await
        .unwrap());
}

#[tokio::test]
async fn logout_revokes_only_the_presented_token() {
    let h = harness();
    let first = h.coordinator.register(new_user("alice")).await.unwrap();
    let second = h.coordinator.login("alice", PASSWORD).await.unwrap();

    let signed_out = h
        .coordinator
        .logout(first.user.id, Some(&first.refresh_token), false)
        .await
        .unwrap();

    assert!(signed_out);
    assert!(!h.tokens.is_active(&first.refresh_token).await.unwrap());
    assert!(h.tokens.is_active(&second.refresh_token).await.unwrap());

    h.coordinator
        .logout(first.user.id, None, true)
        .await
        .unwrap();
    assert!(!h.tokens.is_active(&second.refresh_token).await.unwrap());
}

#[tokio::test]
async fn logout_with_another_users_token_leaves_it_active() {
    let h = harness();
    let alice = h.coordinator.register(new_user("alice")).await.unwrap();
    let bob = h.coordinator.register(new_user("bob")).await.unwrap();

    let signed_out = h
        .coordinator
        .logout(alice.user.id, Some(&bob.refresh_token), false)
        .await
        .unwrap();

    assert!(signed_out);
    assert!(h.tokens.is_active(&bob.refresh_token).await.unwrap());
    assert!(h.tokens.is_active(&alice.refresh_token).await.unwrap());
    let rotated = h.coordinator.refresh(&bob.refresh_token).await.unwrap();
    assert_eq!(rotated.user.id, bob.user.id);
}

#[tokio::test]
async fn failed_revocation_is_reported_and_the_token_survives() {
    let h = harness();
    let session = h.coordinator.register(new_user("alice")).await.unwrap();
    h.tokens.fail_revoke.store(true, Ordering::SeqCst);

    let result = h
        .coordinator
        .logout(session.user.id, Some(&session.refresh_token), false)
        .await;

    assert!(matches!(result, Err(AppError::Infrastructure(_))));
    assert!(h.tokens.is_active(&session.refresh_token).await.unwrap());
}

#[tokio::test]
async fn refresh_that_cannot_issue_leaves_the_old_token_spent() {
    let h = harness();
    let session = h.coordinator.register(new_user("alice")).await.unwrap();
    h.tokens.fail_issue.store(true, Ordering::SeqCst);

    let result = h.coordinator.refresh(&session.refresh_token).await;

    assert!(matches!(
        result,
        Err(AppError::Infrastructure(InfrastructureError::Database(_)))
    ));
    assert!(!h.tokens.is_active(&session.refresh_token).await.unwrap());

    h.tokens.fail_issue.store(false, Ordering::SeqCst);
    assert!(matches!(
        h.coordinator.refresh(&session.refresh_token).await,
        Err(AppError::Token(TokenError::RefreshInvalid))
    ));
    assert!(h.coordinator.login("alice", PASSWORD).await.is_ok());
}

#[tokio::test]
async fn deactivation_cascades_to_refresh_tokens() {
    let h = harness();
    let session = h.coordinator.register(new_user("alice")).await.unwrap();

    h.coordinator.deactivate(session.user.id).await.unwrap();

    assert!(!h.tokens.is_active(&session.refresh_token).await.unwrap());
    assert!(matches!(
        h.coordinator.get_user(session.user.id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        h.coordinator.deactivate(session.user.id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        h.coordinator.login("alice", PASSWORD).await,
        Err(AppError::Auth(AuthError::AccountInactive))
    ));
}

#[tokio::test]
async fn profile_update_keeps_unset_fields() {
    let h = harness();
    let mut alice = new_user("alice");
    alice.first_name = Some("Alice".to_string());
    let session = h.coordinator.register(alice).await.unwrap();

    let updated = h
        .coordinator
        .update_profile(
            session.user.id,
            UserPatch {
                last_name: Some("Liddell".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.first_name.as_deref(), Some("Alice"));
    assert_eq!(updated.last_name.as_deref(), Some("Liddell"));
    assert!(matches!(
        h.coordinator
            .update_profile(Uuid::new_v4(), UserPatch::default())
            .await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn list_users_validates_paging() {
    let h = harness();
    h.coordinator.register(new_user("alice")).await.unwrap();

    assert_eq!(h.coordinator.list_users(1, 20).await.unwrap().len(), 1);
    match h.coordinator.list_users(0, 0).await {
        Err(AppError::Validation(errors)) => assert_eq!(errors.len(), 2),
        other => panic!("Expected validation error, got {:?}", other.map(|u| u.len())),
    }
}

#[tokio::test]
async fn slow_store_yields_retryable_timeout() {
    let mut store = ObservedStore::new(chrono::Duration::days(7));
    store.consume_delay = Some(Duration::from_millis(200));
    let h = harness_with(store, Duration::from_millis(20));

    match h.coordinator.refresh("whatever").await {
        Err(AppError::Infrastructure(e)) => {
            assert_eq!(
                e,
                InfrastructureError::Timeout {
                    operation: "consume_refresh_token"
                }
            );
            assert!(e.is_retryable());
        }
        other => panic!("Expected timeout, got {:?}", other.map(|s| s.user.id)),
    }
}

//! Start-up verification, guards and login/logout against a mock backend.

use std::sync::Arc;

use serde_json::json;
use tally_core::{GuardKind, GuardState, GuardView, Navigator, Resource, SessionState};
use tally_types::Role;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    RecordingNavigator, TOKEN, credential_path, dashboard, mount_identity, store_credential,
};

#[tokio::test]
async fn valid_credential_renders_dashboard_without_redirect() {
    let server = MockServer::start().await;
    mount_identity(&server, TOKEN).await;
    let dir = tempfile::tempdir().unwrap();
    store_credential(&dir, TOKEN);

    let dashboard = dashboard(&server, &dir);
    let navigator = RecordingNavigator::new();
    let guard = dashboard.guard("/dashboard", Arc::clone(&navigator) as Arc<dyn Navigator>);
    assert_eq!(guard.render(), GuardView::Placeholder);

    let state = dashboard.start().await.unwrap();

    let identity = state.identity().unwrap();
    assert_eq!(identity.id().as_str(), "u1");
    assert_eq!(identity.role(), Role::Member);
    assert_eq!(guard.render(), GuardView::Children);
    assert_eq!(guard.redirects(), 0);
    assert!(navigator.routes().is_empty());
}

#[tokio::test]
async fn absent_credential_redirects_to_sign_in_once() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let dashboard = dashboard(&server, &dir);
    let navigator = RecordingNavigator::new();
    let guard = dashboard.guard("/dashboard", Arc::clone(&navigator) as Arc<dyn Navigator>);

    // Still unresolved: a protected guard must not navigate yet.
    assert_eq!(guard.state(), GuardState::Loading);
    assert!(navigator.routes().is_empty());

    let state = dashboard.start().await.unwrap();
    assert_eq!(state, SessionState::Resolved(None));

    for _ in 0..3 {
        assert_eq!(guard.render(), GuardView::Nothing);
    }
    assert_eq!(navigator.routes(), vec!["/sign-in".to_string()]);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn signed_in_user_is_bounced_off_sign_in() {
    let server = MockServer::start().await;
    mount_identity(&server, TOKEN).await;
    let dir = tempfile::tempdir().unwrap();
    store_credential(&dir, TOKEN);

    let dashboard = dashboard(&server, &dir);
    dashboard.start().await.unwrap();

    let navigator = RecordingNavigator::new();
    let guard = dashboard.guard("/sign-in", Arc::clone(&navigator) as Arc<dyn Navigator>);

    assert_eq!(guard.kind(), GuardKind::AuthOnly);
    assert_eq!(guard.render(), GuardView::Nothing);
    assert_eq!(navigator.routes(), vec!["/dashboard".to_string()]);
}

#[tokio::test]
async fn rejected_credential_signs_out_and_is_forgotten() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "revoked"})))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    store_credential(&dir, "revoked-token");

    let dashboard = dashboard(&server, &dir);
    let state = dashboard.start().await.unwrap();

    assert_eq!(state, SessionState::Resolved(None));
    assert!(!credential_path(&dir).exists());
    assert!(dashboard.client().credential().is_none());
}

#[tokio::test]
async fn unreachable_backend_leaves_session_unresolved() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    store_credential(&dir, TOKEN);

    let dashboard = dashboard(&server, &dir);
    let navigator = RecordingNavigator::new();
    let guard = dashboard.guard("/dashboard", Arc::clone(&navigator) as Arc<dyn Navigator>);

    assert!(dashboard.start().await.is_err());

    assert_eq!(dashboard.session(), SessionState::Unresolved);
    assert_eq!(guard.render(), GuardView::Placeholder);
    assert!(navigator.routes().is_empty());
    assert!(credential_path(&dir).exists(), "credential kept for a later retry");
}

#[tokio::test]
async fn login_persists_credential_and_unblocks_guard() {
    let server = MockServer::start().await;
    mount_identity(&server, TOKEN).await;
    let dir = tempfile::tempdir().unwrap();

    let dashboard = dashboard(&server, &dir);
    dashboard.start().await.unwrap();

    let navigator = RecordingNavigator::new();
    let guard = dashboard.guard("/dashboard", Arc::clone(&navigator) as Arc<dyn Navigator>);
    assert_eq!(guard.state(), GuardState::Blocked);

    let identity = dashboard.login(TOKEN).await.unwrap();

    assert_eq!(identity.email(), "u1@example.com");
    assert_eq!(guard.render(), GuardView::Children);
    assert_eq!(
        std::fs::read_to_string(credential_path(&dir)).unwrap(),
        TOKEN
    );
    assert_eq!(
        dashboard.client().credential().map(|c| c.as_str().to_string()),
        Some(TOKEN.to_string())
    );
}

#[tokio::test]
async fn failed_login_stores_nothing() {
    let server = MockServer::start().await;
    mount_identity(&server, TOKEN).await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();

    let dashboard = dashboard(&server, &dir);
    assert!(dashboard.login("wrong").await.is_err());

    assert_eq!(dashboard.session(), SessionState::Resolved(None));
    assert!(!credential_path(&dir).exists());
}

#[tokio::test]
async fn rejected_login_signs_out_previous_user() {
    let server = MockServer::start().await;
    mount_identity(&server, TOKEN).await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "bad token"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/expenses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    store_credential(&dir, TOKEN);

    let dashboard = dashboard(&server, &dir);
    dashboard.start().await.unwrap();
    dashboard.list(Resource::Expenses, None).await.unwrap();
    let navigator = RecordingNavigator::new();
    let guard = dashboard.guard("/dashboard", Arc::clone(&navigator) as Arc<dyn Navigator>);
    assert_eq!(guard.render(), GuardView::Children);

    assert!(dashboard.login("wrong").await.is_err());

    assert_eq!(dashboard.session(), SessionState::Resolved(None));
    assert_eq!(guard.render(), GuardView::Nothing);
    assert_eq!(navigator.routes(), vec!["/sign-in".to_string()]);
    assert!(dashboard.client().credential().is_none());
    assert!(!credential_path(&dir).exists());
    assert!(dashboard.cache().is_empty());
}

#[tokio::test]
async fn login_that_cannot_complete_keeps_current_user() {
    let server = MockServer::start().await;
    mount_identity(&server, TOKEN).await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("authorization", "Bearer tok-u2"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/expenses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    store_credential(&dir, TOKEN);

    let dashboard = dashboard(&server, &dir);
    dashboard.start().await.unwrap();
    dashboard.list(Resource::Expenses, None).await.unwrap();

    assert!(dashboard.login("tok-u2").await.is_err());

    assert!(dashboard.session().is_authenticated());
    assert_eq!(dashboard.cache().len(), 1);
    assert_eq!(
        dashboard.client().credential().map(|c| c.as_str().to_string()),
        Some(TOKEN.to_string())
    );
    assert_eq!(
        std::fs::read_to_string(credential_path(&dir)).unwrap(),
        TOKEN
    );
    dashboard.list(Resource::Expenses, None).await.unwrap();
}

#[tokio::test]
async fn unsendable_stored_credential_is_forgotten() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    store_credential(&dir, "tok\u{7}bad");

    let dashboard = dashboard(&server, &dir);
    let state = dashboard.start().await.unwrap();

    assert_eq!(state, SessionState::Resolved(None));
    assert!(!credential_path(&dir).exists());
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn logout_rechecks_and_redirects_once() {
    let server = MockServer::start().await;
    mount_identity(&server, TOKEN).await;
    let dir = tempfile::tempdir().unwrap();
    store_credential(&dir, TOKEN);

    let dashboard = dashboard(&server, &dir);
    dashboard.start().await.unwrap();

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let _subscription = dashboard.store().subscribe({
        let seen = Arc::clone(&seen);
        move |state: &SessionState| seen.lock().unwrap().push(state.clone())
    });

    let navigator = RecordingNavigator::new();
    let guard = dashboard.guard("/dashboard", Arc::clone(&navigator) as Arc<dyn Navigator>);
    assert_eq!(guard.render(), GuardView::Children);

    dashboard.logout().unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![SessionState::Unresolved, SessionState::Resolved(None)]
    );
    assert_eq!(guard.render(), GuardView::Nothing);
    assert_eq!(navigator.routes(), vec!["/sign-in".to_string()]);
    assert!(!credential_path(&dir).exists());
}

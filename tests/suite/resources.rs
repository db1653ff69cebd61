//! Resource reads and writes routed through the query cache.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tally_core::{ApiError, CacheStatus, GuardView, Navigator, Resource, SessionState};
use tally_types::QueryKey;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    RecordingNavigator, TOKEN, credential_path, dashboard, mount_identity, mount_identity_as,
    store_credential,
};

async fn signed_in(server: &MockServer, dir: &tempfile::TempDir) -> tally_core::Dashboard {
    mount_identity(server, TOKEN).await;
    store_credential(dir, TOKEN);
    let dashboard = dashboard(server, dir);
    let state = dashboard.start().await.unwrap();
    assert!(state.is_authenticated());
    dashboard
}

#[tokio::test]
async fn concurrent_reads_share_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/expenses"))
        .and(header("authorization", "Bearer tok-u1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"id": 1, "amount": 12.5}]))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let dashboard = signed_in(&server, &dir).await;

    let (a, b, c) = tokio::join!(
        dashboard.list(Resource::Expenses, None),
        dashboard.list(Resource::Expenses, None),
        dashboard.list(Resource::Expenses, None),
    );

    let expected = json!([{"id": 1, "amount": 12.5}]);
    assert_eq!(a.unwrap(), expected);
    assert_eq!(b.unwrap(), expected);
    assert_eq!(c.unwrap(), expected);
}

#[tokio::test]
async fn fresh_read_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/contacts"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "c1"}])))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let dashboard = signed_in(&server, &dir).await;

    dashboard.list(Resource::Contacts, Some(2)).await.unwrap();
    dashboard.list(Resource::Contacts, Some(2)).await.unwrap();

    let key = QueryKey::new("contacts").with("page", 2);
    assert_eq!(dashboard.cache().status(&key), Some(CacheStatus::Fresh));
}

#[tokio::test]
async fn write_invalidates_resource_reads() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/expenses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/expenses"))
        .and(body_json(json!({"amount": 40})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9, "amount": 40})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/contacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let dashboard = signed_in(&server, &dir).await;

    dashboard.list(Resource::Expenses, None).await.unwrap();
    dashboard.list(Resource::Contacts, None).await.unwrap();

    let created = dashboard
        .create(Resource::Expenses, json!({"amount": 40}))
        .await
        .unwrap();
    assert_eq!(created["id"], 9);

    // Expenses refetch; contacts were not touched by the write.
    dashboard.list(Resource::Expenses, None).await.unwrap();
    dashboard.list(Resource::Contacts, None).await.unwrap();
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/expenses/404"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "no such expense"})))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let dashboard = signed_in(&server, &dir).await;

    let err = dashboard.get(Resource::Expenses, "404").await.unwrap_err();

    assert_eq!(
        err,
        ApiError::Client {
            status: 404,
            message: "no such expense".to_string()
        }
    );
    assert!(dashboard.session().is_authenticated());
}

#[tokio::test]
async fn bad_gateway_is_retried_within_read_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/settings"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let dashboard = signed_in(&server, &dir).await;

    let err = dashboard.list(Resource::Settings, None).await.unwrap_err();

    assert!(matches!(err, ApiError::Server { status: 502, .. }));
    assert_eq!(
        dashboard.cache().status(&QueryKey::new("settings")),
        Some(CacheStatus::Error)
    );
}

#[tokio::test]
async fn failed_write_is_retried_once() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/contacts/c1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let dashboard = signed_in(&server, &dir).await;

    let err = dashboard.delete(Resource::Contacts, "c1").await.unwrap_err();
    assert!(matches!(err, ApiError::Server { status: 500, .. }));
}

#[tokio::test]
async fn unauthorized_data_call_signs_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/settings"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "expired"})))
        .expect(1)
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let dashboard = signed_in(&server, &dir).await;

    let navigator = RecordingNavigator::new();
    let guard = dashboard.guard("/dashboard", Arc::clone(&navigator) as Arc<dyn Navigator>);
    assert_eq!(guard.render(), GuardView::Children);

    let err = dashboard.list(Resource::Settings, None).await.unwrap_err();

    assert!(err.is_unauthorized());
    assert_eq!(dashboard.session(), SessionState::Resolved(None));
    assert_eq!(guard.render(), GuardView::Nothing);
    assert_eq!(navigator.routes(), vec!["/sign-in".to_string()]);
    assert!(!credential_path(&dir).exists());
    assert!(dashboard.cache().is_empty());
}

#[tokio::test]
async fn late_rejection_of_replaced_credential_keeps_new_user() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/settings"))
        .and(header("authorization", "Bearer tok-u1"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"message": "expired"}))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_identity_as(&server, "tok-u2", "u2").await;
    let dir = tempfile::tempdir().unwrap();
    let dashboard = signed_in(&server, &dir).await;

    let (stale, login) = tokio::join!(dashboard.list(Resource::Settings, None), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        dashboard.login("tok-u2").await
    });

    assert!(stale.unwrap_err().is_unauthorized());
    assert_eq!(login.unwrap().id().as_str(), "u2");
    let identity = dashboard.session().identity().cloned().unwrap();
    assert_eq!(identity.id().as_str(), "u2");
    assert_eq!(
        dashboard.client().credential().map(|c| c.as_str().to_string()),
        Some("tok-u2".to_string())
    );
    assert_eq!(
        std::fs::read_to_string(credential_path(&dir)).unwrap(),
        "tok-u2"
    );
}

#[tokio::test]
async fn logout_drops_cached_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/expenses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .mount(&server)
        .await;
    let dir = tempfile::tempdir().unwrap();
    let dashboard = signed_in(&server, &dir).await;

    dashboard.list(Resource::Expenses, None).await.unwrap();
    assert_eq!(dashboard.cache().len(), 1);

    dashboard.logout().unwrap();

    assert!(dashboard.cache().is_empty());
    assert!(dashboard.client().credential().is_none());
}

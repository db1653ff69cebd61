//! Shared test utilities and fixtures
//!
//! A mock backend plus a dashboard pointed at it, with its own session store
//! and credential file so tests never share state.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::json;
use tally_config::{ResolvedConfig, TallyConfig};
use tally_core::Dashboard;
use tally_session::{Navigator, SessionStore};
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "tok-u1";

/// Config pointed at `server`, storing the credential under `dir`, with
/// millisecond retry delays.
pub fn test_config(server: &MockServer, dir: &tempfile::TempDir) -> ResolvedConfig {
    let mut config = TallyConfig::default().resolve().expect("default config resolves");
    config.api.base_url = Url::parse(&server.uri()).expect("mock server uri");
    config.api.timeout = Duration::from_secs(5);
    config.session.credential_path = credential_path(dir);
    config.query.retry_initial_delay = Duration::from_millis(1);
    config.query.retry_max_delay = Duration::from_millis(10);
    config
}

pub fn credential_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("credential")
}

pub fn store_credential(dir: &tempfile::TempDir, token: &str) {
    std::fs::write(credential_path(dir), token).expect("write credential");
}

pub fn dashboard(server: &MockServer, dir: &tempfile::TempDir) -> Dashboard {
    Dashboard::with_store(test_config(server, dir), SessionStore::new()).expect("dashboard builds")
}

/// Identity endpoint accepting exactly `token` as user `u1`.
pub async fn mount_identity(server: &MockServer, token: &str) {
    mount_identity_as(server, token, "u1").await;
}

/// Identity endpoint accepting exactly `token` as user `user`.
pub async fn mount_identity_as(server: &MockServer, token: &str, user: &str) {
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": user,
            "email": format!("{user}@example.com"),
            "role": "member",
            "verified": true
        })))
        .mount(server)
        .await;
}

/// Navigator that records every redirect.
#[derive(Default)]
pub struct RecordingNavigator {
    routes: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn routes(&self) -> Vec<String> {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: &str) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(route.to_string());
    }
}

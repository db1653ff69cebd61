//! The assembled client core.
//!
//! One [`Dashboard`] owns the REST client, the query cache, the credential
//! file and the token verifier, all pointed at a single [`SessionStore`].

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tally_client::{ApiClient, HttpIdentityAuthority, Method};
use tally_config::ResolvedConfig;
use tally_query::{QueryCache, QueryCacheConfig, RetryPolicy};
use tally_session::{
    CredentialStore, GuardKind, GuardRoutes, Navigator, RouteGuard, SessionStore, TokenVerifier,
    VerifyError,
};
use tally_types::{ApiError, Credential, Identity, QueryKey, SessionState};
use tokio::task::JoinHandle;

use crate::resource::Resource;

type JsonFuture = BoxFuture<'static, Result<Value, ApiError>>;

pub struct Dashboard {
    config: ResolvedConfig,
    store: Arc<SessionStore>,
    cache: QueryCache<Value>,
    client: ApiClient,
    credentials: CredentialStore,
    verifier: TokenVerifier<HttpIdentityAuthority>,
}

impl Dashboard {
    /// Build against the process-wide session store.
    pub fn new(config: ResolvedConfig) -> Result<Self> {
        Self::with_store(config, Arc::clone(SessionStore::global()))
    }

    pub fn with_store(config: ResolvedConfig, store: Arc<SessionStore>) -> Result<Self> {
        let client = ApiClient::new(config.api.base_url.clone(), config.api.timeout)
            .context("failed to create API client")?;
        let authority =
            HttpIdentityAuthority::new(client.clone(), config.session.identity_path.clone());
        let verifier = TokenVerifier::new(authority, Arc::clone(&store));
        let cache = QueryCache::new(cache_config(&config));
        let credentials = CredentialStore::new(config.session.credential_path.clone());

        Ok(Self {
            config,
            store,
            cache,
            client,
            credentials,
            verifier,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    #[must_use]
    pub fn cache(&self) -> &QueryCache<Value> {
        &self.cache
    }

    #[must_use]
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    #[must_use]
    pub fn session(&self) -> SessionState {
        self.store.read()
    }

    /// Read the persisted credential once and settle the session.
    ///
    /// A rejected or expired credential resolves the session signed out and
    /// is removed from disk. A check that cannot complete leaves the session
    /// unresolved and is returned as an error.
    pub async fn start(&self) -> Result<SessionState> {
        let credential = self.initial_credential()?;
        self.client.set_credential(credential.clone());

        match self.verifier.verify(credential.as_ref()).await {
            Ok(_) => {}
            Err(VerifyError::Unauthorized(reason)) => {
                tracing::info!(%reason, "Starting signed out");
                self.client.set_credential(None);
                if credential.is_some() && self.config.api.token.is_none() {
                    self.forget_credential();
                }
            }
            Err(err @ VerifyError::Network(_)) => {
                return Err(anyhow::Error::new(err).context("could not verify stored credential"));
            }
        }

        Ok(self.store.read())
    }

    fn initial_credential(&self) -> Result<Option<Credential>> {
        if let Some(token) = &self.config.api.token
            && let Ok(credential) = Credential::new(token.as_str())
        {
            tracing::debug!("Using credential from configuration");
            return Ok(Some(credential));
        }
        self.credentials
            .load()
            .context("failed to load stored credential")
    }

    /// Verify `token` and, if accepted, persist it as the credential.
    ///
    /// A rejected token signs out whoever was signed in before. A check that
    /// cannot complete changes nothing.
    pub async fn login(&self, token: &str) -> Result<Identity> {
        let credential = Credential::new(token).context("token must not be empty")?;

        let identity = match self.verifier.verify(Some(&credential)).await {
            Ok(identity) => identity,
            Err(err @ VerifyError::Unauthorized(_)) => {
                self.sign_out_locally();
                return Err(anyhow::Error::new(err).context("sign-in failed"));
            }
            Err(err @ VerifyError::Network(_)) => {
                return Err(anyhow::Error::new(err).context("sign-in failed"));
            }
        };

        // Nothing fetched for a previous user may be served to the next one.
        self.cache.clear();
        self.credentials
            .save(&credential)
            .context("failed to store credential")?;
        self.client.set_credential(Some(credential));
        Ok(identity)
    }

    /// Drop the credential and all cached data, then recheck: the session
    /// passes through `Unresolved` and settles signed out.
    pub fn logout(&self) -> Result<()> {
        self.credentials
            .clear()
            .context("failed to remove stored credential")?;
        self.client.set_credential(None);
        self.cache.clear();
        self.store
            .begin_recheck()
            .context("failed to begin session recheck")?;
        self.store
            .resolve(None)
            .context("failed to resolve signed-out session")?;
        tracing::info!("Signed out");
        Ok(())
    }

    /// Mount a guard for `route`: auth-only for the configured sign-in style
    /// routes, protected for everything else.
    pub fn guard(&self, route: &str, navigator: Arc<dyn Navigator>) -> RouteGuard {
        let kind = if self.config.routes.is_auth_only(route) {
            GuardKind::AuthOnly
        } else {
            GuardKind::Protected
        };
        self.guard_with_kind(kind, navigator)
    }

    pub fn guard_with_kind(&self, kind: GuardKind, navigator: Arc<dyn Navigator>) -> RouteGuard {
        let routes = GuardRoutes::new(
            self.config.routes.sign_in.clone(),
            self.config.routes.landing.clone(),
        );
        RouteGuard::mount(&self.store, kind, &routes, navigator)
    }

    pub fn spawn_gc(&self) -> JoinHandle<()> {
        self.cache.spawn_gc(self.config.query.gc_interval)
    }

    pub async fn list(&self, resource: Resource, page: Option<u32>) -> Result<Value, ApiError> {
        let sent_with = self.client.credential();
        let result = self
            .cache
            .fetch(resource.list_key(page), self.reader(resource.list_path(page)))
            .await;
        self.check_authorized(result, sent_with.as_ref())
    }

    pub async fn get(&self, resource: Resource, id: &str) -> Result<Value, ApiError> {
        let sent_with = self.client.credential();
        let result = self
            .cache
            .fetch(resource.item_key(id), self.reader(resource.item_path(id)))
            .await;
        self.check_authorized(result, sent_with.as_ref())
    }

    pub async fn create(&self, resource: Resource, body: Value) -> Result<Value, ApiError> {
        self.write(
            resource,
            resource.all_keys().with("op", "create"),
            Method::POST,
            resource.list_path(None),
            Some(body),
        )
        .await
    }

    pub async fn update(&self, resource: Resource, id: &str, body: Value) -> Result<Value, ApiError> {
        self.write(
            resource,
            resource.item_key(id).with("op", "update"),
            Method::PUT,
            resource.item_path(id),
            Some(body),
        )
        .await
    }

    pub async fn delete(&self, resource: Resource, id: &str) -> Result<Value, ApiError> {
        self.write(
            resource,
            resource.item_key(id).with("op", "delete"),
            Method::DELETE,
            resource.item_path(id),
            None,
        )
        .await
    }

    async fn write(
        &self,
        resource: Resource,
        key: QueryKey,
        method: Method,
        path: String,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let sent_with = self.client.credential();
        let result = self
            .cache
            .mutate(key, vec![resource.all_keys()], self.writer(method, path, body))
            .await;
        self.check_authorized(result, sent_with.as_ref())
    }

    fn reader(&self, path: String) -> impl Fn() -> JsonFuture + Send + Sync + 'static {
        let client = self.client.clone();
        move || {
            let client = client.clone();
            let path = path.clone();
            async move { client.get::<Value>(&path).await }.boxed()
        }
    }

    fn writer(
        &self,
        method: Method,
        path: String,
        body: Option<Value>,
    ) -> impl Fn() -> JsonFuture + Send + Sync + 'static {
        let client = self.client.clone();
        move || {
            let client = client.clone();
            let method = method.clone();
            let path = path.clone();
            let body = body.clone();
            async move { client.request::<Value>(method, &path, body.as_ref()).await }.boxed()
        }
    }

    /// A data call the backend refused means the credential is dead: sign
    /// out so every protected guard redirects. A refusal of a credential that
    /// has since been replaced says nothing about the current one.
    fn check_authorized<T>(
        &self,
        result: Result<T, ApiError>,
        sent_with: Option<&Credential>,
    ) -> Result<T, ApiError> {
        if let Err(err) = &result
            && err.is_unauthorized()
        {
            if self.client.credential().as_ref() == sent_with {
                tracing::warn!(error = %err, "Backend rejected the credential; signing out");
                self.sign_out_locally();
                if let Err(err) = self.store.resolve(None) {
                    tracing::warn!(error = %err, "Failed to resolve signed-out session");
                }
            } else {
                tracing::debug!(error = %err, "Ignoring rejection of a replaced credential");
            }
        }
        result
    }

    /// Forget the credential and cached data after a rejection. Settling the
    /// session is left to the caller.
    fn sign_out_locally(&self) {
        self.forget_credential();
        self.client.set_credential(None);
        self.cache.clear();
    }

    fn forget_credential(&self) {
        if let Err(err) = self.credentials.clear() {
            tracing::warn!(error = %err, "Failed to remove rejected credential");
        }
    }
}

fn cache_config(config: &ResolvedConfig) -> QueryCacheConfig {
    let query = &config.query;
    QueryCacheConfig {
        stale_time: query.stale_time,
        gc_horizon: query.gc_horizon,
        read_retry: RetryPolicy::reads()
            .with_max_retries(query.read_retries)
            .with_delays(query.retry_initial_delay, query.retry_max_delay),
        mutation_retry: RetryPolicy::mutations()
            .with_max_retries(query.mutation_retries)
            .with_delays(query.retry_initial_delay, query.retry_max_delay),
    }
}

use reqwest::Method;
use tally_session::IdentityAuthority;
use tally_types::{ApiError, Credential, Identity};

use crate::ApiClient;

/// Asks the backend who a credential belongs to: `GET <identity_path>`
/// authorized with exactly that credential.
#[derive(Debug, Clone)]
pub struct HttpIdentityAuthority {
    client: ApiClient,
    path: String,
}

impl HttpIdentityAuthority {
    pub fn new(client: ApiClient, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl IdentityAuthority for HttpIdentityAuthority {
    async fn identify(&self, credential: &Credential) -> Result<Identity, ApiError> {
        self.client
            .send(Method::GET, &self.path, None, Some(credential))
            .await
    }
}

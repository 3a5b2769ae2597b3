//! Remote page generation over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use url::Url;

use crate::application::error::error_chain_message;
use crate::application::generate::{GenerateError, GenerationOutcome, GeneratorKind, PageGenerator};
use crate::config::GeneratorSettings;
use crate::domain::site_uri::{SiteUri, SiteUrls};

use super::error::InfraError;

const SOURCE: &str = "pagerefresh::remote";

/// Query parameter carrying the bypass token.
pub const TOKEN_PARAM: &str = "pagerefresh_token";
/// Request header carrying the bypass token.
pub const TOKEN_HEADER: &str = "x-pagerefresh-token";

/// Regenerates pages by requesting them from the live site with a bypass token.
pub struct RemoteGenerator {
    sites: SiteUrls,
    token: String,
    timeout: Duration,
    user_agent: String,
    client: OnceCell<Client>,
}

impl RemoteGenerator {
    pub fn new(sites: SiteUrls, settings: &GeneratorSettings) -> Self {
        Self {
            sites,
            token: settings.bypass_token.clone(),
            timeout: settings.timeout,
            user_agent: settings.user_agent.clone(),
            client: OnceCell::new(),
        }
    }

    fn build_client(&self) -> Result<Client, InfraError> {
        Client::builder()
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .build()
            .map_err(|err| InfraError::http_client(error_chain_message(&err)))
    }

    async fn client(&self) -> Result<&Client, GenerateError> {
        self.client
            .get_or_try_init(|| async { self.build_client() })
            .await
            .map_err(|err| GenerateError::prepare(err.to_string()))
    }

    /// Page URL with the bypass token appended.
    pub fn request_url(&self, uri: &SiteUri) -> Result<Url, GenerateError> {
        let mut url = uri
            .url(&self.sites)
            .map_err(|source| GenerateError::url(uri, source))?;
        url.query_pairs_mut().append_pair(TOKEN_PARAM, &self.token);
        Ok(url)
    }
}

#[async_trait]
impl PageGenerator for RemoteGenerator {
    fn kind(&self) -> GeneratorKind {
        GeneratorKind::Remote
    }

    async fn prepare(&self) -> Result<(), GenerateError> {
        self.client().await.map(|_| ())
    }

    async fn generate(&self, uri: &SiteUri) -> Result<GenerationOutcome, GenerateError> {
        let client = self.client().await?;
        let url = self.request_url(uri)?;

        let response = client
            .get(url.clone())
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|err| GenerateError::transport(url.as_str(), error_chain_message(&err)))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            warn!(
                target: SOURCE,
                url = %url,
                status = status.as_u16(),
                reason = status.canonical_reason().unwrap_or(""),
                "regeneration request rejected"
            );
            return Err(GenerateError::status(
                url.as_str(),
                status.as_u16(),
                status.canonical_reason().unwrap_or("unknown"),
            ));
        }

        // Drain the body before counting the page as generated.
        response
            .bytes()
            .await
            .map_err(|err| GenerateError::transport(url.as_str(), error_chain_message(&err)))?;

        debug!(target: SOURCE, site_uri = %uri, "page regenerated");
        Ok(GenerationOutcome::generated(uri, Some(status.as_u16())))
    }
}

//! In-process page generation.
//!
//! Renders each page through a [`PageRenderer`] and writes the body straight
//! into [`CacheStorage`], without going through the network.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, trace};
use url::Url;

use super::{GenerateError, GenerationOutcome, GeneratorKind, PageGenerator};
use crate::cache::{CacheStorage, DependencyRegistry, deps};
use crate::domain::site_uri::{SiteUri, SiteUrls};

const SOURCE: &str = "pagerefresh::local";

/// Header that marks a render as coming from the generator.
pub const GENERATOR_HEADER: &str = "x-pagerefresh-generator";

/// Request as the renderer sees it. Built fresh for every page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    pub site_uri: SiteUri,
    pub url: Url,
    pub scheme: String,
    /// Host including a non-default port.
    pub host: String,
    /// Request path of `url`, including any base URL prefix.
    pub path: String,
    /// Query string, `p=<path>` with the path trimmed of slashes.
    pub query: String,
    pub headers: Vec<(String, String)>,
}

impl RenderContext {
    pub fn new(site_uri: &SiteUri, url: Url) -> Self {
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };

        Self {
            site_uri: site_uri.clone(),
            scheme: url.scheme().to_string(),
            host,
            path: url.path().to_string(),
            query: format!("p={}", url.path().trim_matches('/')),
            headers: vec![(
                GENERATOR_HEADER.to_string(),
                GeneratorKind::Local.as_str().to_string(),
            )],
            url,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub status: u16,
    pub body: Bytes,
}

impl RenderedPage {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("page not found")]
    NotFound,
    #[error("render failed: {message}")]
    Failed { message: String },
}

impl RenderError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// The application's request pipeline, invoked in-process.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, context: RenderContext) -> Result<RenderedPage, RenderError>;
}

/// Caching policy: which pages may be cached at all.
pub trait CacheEligibility: Send + Sync {
    fn is_cacheable_site_uri(&self, uri: &SiteUri) -> bool;
}

/// Every page is cacheable.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllCacheable;

impl CacheEligibility for AllCacheable {
    fn is_cacheable_site_uri(&self, _uri: &SiteUri) -> bool {
        true
    }
}

pub struct LocalGenerator {
    sites: SiteUrls,
    storage: Arc<dyn CacheStorage>,
    renderer: Arc<dyn PageRenderer>,
    eligibility: Arc<dyn CacheEligibility>,
    registry: Option<Arc<DependencyRegistry>>,
}

impl LocalGenerator {
    pub fn new(
        sites: SiteUrls,
        storage: Arc<dyn CacheStorage>,
        renderer: Arc<dyn PageRenderer>,
    ) -> Self {
        Self {
            sites,
            storage,
            renderer,
            eligibility: Arc::new(AllCacheable),
            registry: None,
        }
    }

    pub fn with_eligibility(mut self, eligibility: Arc<dyn CacheEligibility>) -> Self {
        self.eligibility = eligibility;
        self
    }

    /// Register what each rendered page read.
    pub fn with_registry(mut self, registry: Arc<DependencyRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }
}

#[async_trait]
impl PageGenerator for LocalGenerator {
    fn kind(&self) -> GeneratorKind {
        GeneratorKind::Local
    }

    async fn generate(&self, uri: &SiteUri) -> Result<GenerationOutcome, GenerateError> {
        if let Some(body) = self.storage.get(uri).await?
            && !body.is_empty()
        {
            trace!(target: SOURCE, site_uri = %uri, "already cached");
            return Ok(GenerationOutcome::already_cached(uri));
        }

        let url = uri
            .url(&self.sites)
            .map_err(|source| GenerateError::url(uri, source))?;
        let context = RenderContext::new(uri, url);

        if !self.eligibility.is_cacheable_site_uri(uri) {
            debug!(target: SOURCE, site_uri = %uri, "not cacheable, skipped");
            return Ok(GenerationOutcome::skipped(uri));
        }

        let (rendered, dependencies) = deps::with_collector(self.renderer.render(context)).await;
        let page = rendered.map_err(|source| GenerateError::Render {
            uri: uri.clone(),
            source,
        })?;

        if !page.is_ok() {
            return Err(GenerateError::status(uri.to_string(), page.status, "render"));
        }
        if page.body.is_empty() {
            return Err(GenerateError::EmptyBody { uri: uri.clone() });
        }

        self.storage.put(uri, page.body).await?;
        if let Some(registry) = &self.registry {
            registry.register(uri.clone(), dependencies);
        }

        debug!(target: SOURCE, site_uri = %uri, status = page.status, "page generated");
        Ok(GenerationOutcome::generated(uri, Some(page.status)))
    }
}

//! Page regeneration.
//!
//! A [`PageGenerator`] re-populates the cache for one page. The
//! [`RegenerationPipeline`] drives a generator over a list of pages.

mod local;
mod pipeline;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::error::error_chain_message;
use crate::cache::StorageError;
use crate::domain::error::DomainError;
use crate::domain::site_uri::SiteUri;

pub use local::{
    AllCacheable, CacheEligibility, GENERATOR_HEADER, LocalGenerator, PageRenderer, RenderContext,
    RenderError, RenderedPage,
};
pub use pipeline::{
    BeforeGenerate, GenerateListener, GenerateOptions, ProgressCallback, RegenerationPipeline,
    RunReport, RunStatus, progress_label,
};

/// Which generation strategy to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorKind {
    /// HTTP requests against the live site.
    Remote,
    /// In-process rendering straight into cache storage.
    Local,
}

impl GeneratorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Up to the configured concurrency in flight at once.
    Concurrent,
    /// One page at a time.
    Sequential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Generated,
    AlreadyCached,
    /// Not cacheable; neither a success nor a failure.
    Skipped,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::AlreadyCached => "already_cached",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Generated | Self::AlreadyCached)
    }
}

/// Result of regenerating one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub uri: SiteUri,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenerationOutcome {
    pub fn generated(uri: &SiteUri, http_status: Option<u16>) -> Self {
        Self::new(uri, OutcomeStatus::Generated, http_status, None)
    }

    pub fn already_cached(uri: &SiteUri) -> Self {
        Self::new(uri, OutcomeStatus::AlreadyCached, None, None)
    }

    pub fn skipped(uri: &SiteUri) -> Self {
        Self::new(uri, OutcomeStatus::Skipped, None, None)
    }

    pub fn failed(uri: &SiteUri, error: &GenerateError) -> Self {
        Self::new(
            uri,
            OutcomeStatus::Failed,
            error.http_status(),
            Some(error_chain_message(error)),
        )
    }

    fn new(
        uri: &SiteUri,
        status: OutcomeStatus,
        http_status: Option<u16>,
        error: Option<String>,
    ) -> Self {
        Self {
            uri: uri.clone(),
            status,
            http_status,
            error,
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("no url for `{uri}`")]
    Url {
        uri: SiteUri,
        #[source]
        source: DomainError,
    },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("{target} answered {status} {reason}")]
    Status {
        target: String,
        status: u16,
        reason: String,
    },
    #[error("rendering `{uri}` failed")]
    Render {
        uri: SiteUri,
        #[source]
        source: RenderError,
    },
    #[error("rendering `{uri}` produced an empty body")]
    EmptyBody { uri: SiteUri },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("generator could not be prepared: {message}")]
    Prepare { message: String },
    #[error("generating `{uri}` panicked")]
    Panicked { uri: SiteUri },
    #[error("no generator registered for `{kind}`")]
    MissingGenerator { kind: GeneratorKind },
}

impl GenerateError {
    pub fn url(uri: &SiteUri, source: DomainError) -> Self {
        Self::Url {
            uri: uri.clone(),
            source,
        }
    }

    pub fn transport(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn status(target: impl Into<String>, status: u16, reason: impl Into<String>) -> Self {
        Self::Status {
            target: target.into(),
            status,
            reason: reason.into(),
        }
    }

    pub fn prepare(message: impl Into<String>) -> Self {
        Self::Prepare {
            message: message.into(),
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Strategy that regenerates a single page.
#[async_trait]
pub trait PageGenerator: Send + Sync {
    fn kind(&self) -> GeneratorKind;

    fn mode(&self) -> ExecutionMode {
        match self.kind() {
            GeneratorKind::Remote => ExecutionMode::Concurrent,
            GeneratorKind::Local => ExecutionMode::Sequential,
        }
    }

    /// Batch-level setup, run once before any page of a run.
    async fn prepare(&self) -> Result<(), GenerateError> {
        Ok(())
    }

    /// Regenerate one page. An `Err` is counted as a failed page.
    async fn generate(&self, uri: &SiteUri) -> Result<GenerationOutcome, GenerateError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_outcome_keeps_status_and_chain() {
        let uri = SiteUri::new(1, "missing");
        let err = GenerateError::status("https://example.com/missing", 404, "Not Found");
        let outcome = GenerationOutcome::failed(&uri, &err);

        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(outcome.http_status, Some(404));
        assert_eq!(
            outcome.error.as_deref(),
            Some("https://example.com/missing answered 404 Not Found")
        );
    }

    #[test]
    fn only_generated_and_cached_count_as_success() {
        assert!(OutcomeStatus::Generated.is_success());
        assert!(OutcomeStatus::AlreadyCached.is_success());
        assert!(!OutcomeStatus::Skipped.is_success());
        assert!(!OutcomeStatus::Failed.is_success());
    }

    #[test]
    fn generator_kind_serializes_snake_case() {
        let json = serde_json::to_string(&GeneratorKind::Remote).unwrap();
        assert_eq!(json, "\"remote\"");
    }
}

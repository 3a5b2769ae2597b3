//! Invalidation resolution.
//!
//! Maps the change records of a finished unit of work to the set of cached
//! pages that must be regenerated.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use super::tracker::{ChangeRecord, ChangeTracker};
use crate::domain::entities::{EntityId, EntityKey, EntityType, SourceId};
use crate::domain::site_uri::SiteUri;

const SOURCE: &str = "pagerefresh::resolver";

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("dependency lookup failed: {message}")]
    Backend { message: String },
    #[error("dependency lookup is not available")]
    Unavailable,
}

impl LookupError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Cross-reference from entities to the cached pages that read them.
#[async_trait]
pub trait DependencyLookup: Send + Sync {
    /// Cached pages whose content was produced from the given entity.
    async fn cached_uris_depending_on(
        &self,
        entity_type: &EntityType,
        entity_id: EntityId,
        source_id: Option<SourceId>,
    ) -> Result<Vec<SiteUri>, LookupError>;

    /// Cached listing pages over a source. Consulted when an entity appears
    /// or disappears, since that changes listings it was never rendered on.
    async fn listing_uris(
        &self,
        entity_type: &EntityType,
        source_id: SourceId,
    ) -> Result<Vec<SiteUri>, LookupError>;

    /// Whether this change invalidates the whole cache.
    fn requires_full_clear(&self, _record: &ChangeRecord) -> bool {
        false
    }
}

/// Pages affected by one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanGroup {
    pub key: EntityKey,
    pub uris: Vec<SiteUri>,
}

/// Output of resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshPlan {
    pub groups: Vec<PlanGroup>,
    pub clear_all: bool,
}

impl RefreshPlan {
    /// Deduplicated union of every group, in first-seen order.
    pub fn uris(&self) -> Vec<SiteUri> {
        let mut seen = HashSet::new();
        self.groups
            .iter()
            .flat_map(|group| group.uris.iter())
            .filter(|uri| seen.insert(*uri))
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        !self.clear_all && self.groups.iter().all(|group| group.uris.is_empty())
    }
}

impl fmt::Display for RefreshPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RefreshPlan {{ groups: {}, uris: {}, clear_all: {} }}",
            self.groups.len(),
            self.uris().len(),
            self.clear_all,
        )
    }
}

pub struct InvalidationResolver {
    lookup: Arc<dyn DependencyLookup>,
}

impl InvalidationResolver {
    pub fn new(lookup: Arc<dyn DependencyLookup>) -> Self {
        Self { lookup }
    }

    /// Resolve and clear the tracker.
    pub async fn resolve(&self, tracker: &mut ChangeTracker) -> RefreshPlan {
        let records = tracker.take_records();
        self.resolve_records(&records).await
    }

    pub async fn resolve_records(&self, records: &[ChangeRecord]) -> RefreshPlan {
        let mut plan = RefreshPlan::default();

        for record in records {
            if self.lookup.requires_full_clear(record) {
                debug!(target: SOURCE, entity = %record.key(), "change requires full cache clear");
                plan.clear_all = true;
            }

            match self.uris_for(record).await {
                Ok(uris) if uris.is_empty() => {}
                Ok(uris) => plan.groups.push(PlanGroup {
                    key: record.key(),
                    uris,
                }),
                Err(err) => {
                    metrics::counter!("pagerefresh_lookup_failures_total").increment(1);
                    warn!(
                        target: SOURCE,
                        entity = %record.key(),
                        error = %err,
                        "dependency lookup failed, skipping record"
                    );
                }
            }
        }

        debug!(target: SOURCE, %plan, "invalidation resolved");
        plan
    }

    async fn uris_for(&self, record: &ChangeRecord) -> Result<Vec<SiteUri>, LookupError> {
        let mut uris = self
            .lookup
            .cached_uris_depending_on(&record.entity_type, record.entity_id, record.source_id)
            .await?;

        if record.status_changed
            && let Some(source_id) = record.source_id
        {
            match self.lookup.listing_uris(&record.entity_type, source_id).await {
                Ok(listings) => uris.extend(listings),
                Err(err) => {
                    metrics::counter!("pagerefresh_lookup_failures_total").increment(1);
                    warn!(
                        target: SOURCE,
                        entity = %record.key(),
                        source_id,
                        error = %err,
                        "listing lookup failed, keeping dependent pages"
                    );
                }
            }
        }

        let mut seen = HashSet::new();
        uris.retain(|uri| seen.insert(uri.clone()));
        Ok(uris)
    }
}

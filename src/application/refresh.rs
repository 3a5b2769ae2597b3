//! Unit-of-work boundary.
//!
//! Turns the changes tracked during one request or job into cache clears and
//! regeneration runs.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::application::error::error_chain_message;
use crate::application::generate::{GenerateOptions, GeneratorKind, RegenerationPipeline, RunStatus};
use crate::cache::{
    CacheStorage, ChangeTracker, DependencyRegistry, InvalidationResolver, RefreshConfig,
};
use crate::domain::site_uri::SiteUri;

const SOURCE: &str = "pagerefresh::refresh";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Nothing was tracked.
    Unchanged,
    Refreshed {
        uris: Vec<SiteUri>,
        cleared: bool,
        runs: Vec<RunStatus>,
    },
}

pub struct RefreshService {
    config: RefreshConfig,
    resolver: InvalidationResolver,
    storage: Arc<dyn CacheStorage>,
    pipeline: Arc<RegenerationPipeline>,
    generator: GeneratorKind,
    registry: Option<Arc<DependencyRegistry>>,
}

impl RefreshService {
    pub fn new(
        config: RefreshConfig,
        resolver: InvalidationResolver,
        storage: Arc<dyn CacheStorage>,
        pipeline: Arc<RegenerationPipeline>,
        generator: GeneratorKind,
    ) -> Self {
        Self {
            config,
            resolver,
            storage,
            pipeline,
            generator,
            registry: None,
        }
    }

    /// Forget the recorded dependencies of pages this service expires.
    pub fn with_registry(mut self, registry: Arc<DependencyRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Tracker for a new unit of work, carrying the configured batch mode.
    pub fn tracker(&self) -> ChangeTracker {
        ChangeTracker::with_batch_mode(self.config.batch_mode)
    }

    /// Resolve, expire and regenerate for everything `tracker` recorded.
    ///
    /// Affected pages are removed from storage before regeneration; a plan
    /// that asks for a full clear empties storage instead. Always leaves the
    /// tracker empty.
    pub async fn complete_unit_of_work(&self, tracker: &mut ChangeTracker) -> RefreshOutcome {
        if tracker.is_empty() {
            debug!(target: SOURCE, "unit of work finished without changes");
            return RefreshOutcome::Unchanged;
        }

        let batch = tracker.batch_mode() || self.config.batch_mode;
        let plan = self.resolver.resolve(tracker).await;
        tracker.reset();

        let cleared = plan.clear_all && self.clear_storage().await;
        let uris = plan.uris();
        if !cleared {
            self.expire(&uris).await;
        }
        let mut runs = Vec::new();

        if batch {
            let options = GenerateOptions {
                queue: true,
                ..GenerateOptions::from_config(&self.config)
            };
            runs.push(self.pipeline.run(uris.clone(), self.generator, options).await);
        } else {
            let mut scheduled: HashSet<SiteUri> = HashSet::new();
            for group in &plan.groups {
                let pending: Vec<SiteUri> = group
                    .uris
                    .iter()
                    .filter(|uri| scheduled.insert((*uri).clone()))
                    .cloned()
                    .collect();
                if pending.is_empty() {
                    continue;
                }

                debug!(target: SOURCE, entity = %group.key, pages = pending.len(), "regenerating for entity");
                let options = GenerateOptions::from_config(&self.config);
                runs.push(self.pipeline.run(pending, self.generator, options).await);
            }
        }

        info!(
            target: SOURCE,
            pages = uris.len(),
            cleared,
            batch,
            runs = runs.len(),
            "unit of work refreshed"
        );
        RefreshOutcome::Refreshed {
            uris,
            cleared,
            runs,
        }
    }

    /// Drop stale copies so the local strategy renders them again.
    async fn expire(&self, uris: &[SiteUri]) {
        if uris.is_empty() {
            return;
        }
        if let Some(registry) = &self.registry {
            for uri in uris {
                registry.unregister(uri);
            }
        }
        if let Err(err) = self.storage.delete(uris).await {
            error!(target: SOURCE, pages = uris.len(), error = %error_chain_message(&err), "failed to expire cached pages");
        }
    }

    async fn clear_storage(&self) -> bool {
        match self.storage.delete_all().await {
            Ok(()) => {
                if let Some(registry) = &self.registry {
                    registry.clear();
                }
                true
            }
            Err(err) => {
                error!(target: SOURCE, error = %error_chain_message(&err), "failed to clear cache storage");
                false
            }
        }
    }
}

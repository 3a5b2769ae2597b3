//! Bidirectional page dependency registry.
//!
//! Tracks which entities each cached page was rendered from, so a change to an
//! entity can be mapped back to the pages that must be regenerated.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use super::lock::{rw_read, rw_write};
use super::resolver::{DependencyLookup, LookupError};
use crate::domain::entities::{EntityId, EntityKey, EntityType, SourceId};
use crate::domain::site_uri::SiteUri;

const SOURCE: &str = "pagerefresh::registry";

/// Something a rendered page read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// A single entity.
    Entity(EntityKey),
    /// A listing over every entity of a type in one source.
    Listing {
        entity_type: EntityType,
        source_id: SourceId,
    },
}

/// Maps dependency → pages and page → dependencies.
#[derive(Default)]
pub struct DependencyRegistry {
    dependency_to_pages: RwLock<HashMap<Dependency, HashSet<SiteUri>>>,
    page_to_dependencies: RwLock<HashMap<SiteUri, HashSet<Dependency>>>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the dependencies of a freshly rendered page.
    ///
    /// Replaces whatever the page was registered with before.
    pub fn register(&self, uri: SiteUri, dependencies: HashSet<Dependency>) {
        let mut d2p = rw_write(&self.dependency_to_pages, SOURCE, "register");
        let mut p2d = rw_write(&self.page_to_dependencies, SOURCE, "register");

        if let Some(stale) = p2d.remove(&uri) {
            detach(&mut d2p, &uri, stale);
        }
        for dependency in &dependencies {
            d2p.entry(dependency.clone())
                .or_default()
                .insert(uri.clone());
        }
        p2d.insert(uri, dependencies);
    }

    pub fn uris_for(&self, dependency: &Dependency) -> HashSet<SiteUri> {
        rw_read(&self.dependency_to_pages, SOURCE, "uris_for")
            .get(dependency)
            .cloned()
            .unwrap_or_default()
    }

    pub fn dependencies_for(&self, uri: &SiteUri) -> HashSet<Dependency> {
        rw_read(&self.page_to_dependencies, SOURCE, "dependencies_for")
            .get(uri)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget a page, e.g. after it was evicted from storage.
    pub fn unregister(&self, uri: &SiteUri) {
        let mut d2p = rw_write(&self.dependency_to_pages, SOURCE, "unregister");
        let mut p2d = rw_write(&self.page_to_dependencies, SOURCE, "unregister");

        if let Some(dependencies) = p2d.remove(uri) {
            detach(&mut d2p, uri, dependencies);
        }
    }

    pub fn clear(&self) {
        rw_write(&self.dependency_to_pages, SOURCE, "clear").clear();
        rw_write(&self.page_to_dependencies, SOURCE, "clear").clear();
    }

    pub fn dependency_count(&self) -> usize {
        rw_read(&self.dependency_to_pages, SOURCE, "dependency_count").len()
    }

    pub fn page_count(&self) -> usize {
        rw_read(&self.page_to_dependencies, SOURCE, "page_count").len()
    }
}

fn detach(
    d2p: &mut HashMap<Dependency, HashSet<SiteUri>>,
    uri: &SiteUri,
    dependencies: HashSet<Dependency>,
) {
    for dependency in dependencies {
        if let Some(pages) = d2p.get_mut(&dependency) {
            pages.remove(uri);
            if pages.is_empty() {
                d2p.remove(&dependency);
            }
        }
    }
}

fn sorted(uris: HashSet<SiteUri>) -> Vec<SiteUri> {
    let mut uris: Vec<_> = uris.into_iter().collect();
    uris.sort();
    uris
}

#[async_trait]
impl DependencyLookup for DependencyRegistry {
    async fn cached_uris_depending_on(
        &self,
        entity_type: &EntityType,
        entity_id: EntityId,
        _source_id: Option<SourceId>,
    ) -> Result<Vec<SiteUri>, LookupError> {
        let key = EntityKey::new(entity_type.clone(), entity_id);
        Ok(sorted(self.uris_for(&Dependency::Entity(key))))
    }

    async fn listing_uris(
        &self,
        entity_type: &EntityType,
        source_id: SourceId,
    ) -> Result<Vec<SiteUri>, LookupError> {
        Ok(sorted(self.uris_for(&Dependency::Listing {
            entity_type: entity_type.clone(),
            source_id,
        })))
    }
}

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use pagerefresh::application::generate::{
    GenerateOptions, GeneratorKind, LocalGenerator, OutcomeStatus, PageRenderer,
    RegenerationPipeline, RenderContext, RenderError, RenderedPage, RunStatus,
};
use pagerefresh::cache::{
    CacheStorage, ChangeTracker, Dependency, DependencyRegistry, InvalidationResolver,
    MemoryStorage, deps,
};
use pagerefresh::domain::entities::{
    ContentEntity, EntityKey, EntitySnapshot, EntityType, MutationIntent, TrackedEntity,
};
use pagerefresh::domain::site_uri::{SiteUri, SiteUrls};

/// Renders every page as its path and reads entry 1 plus the section 5 listing.
#[derive(Default)]
struct EchoRenderer {
    renders: AtomicUsize,
}

#[async_trait]
impl PageRenderer for EchoRenderer {
    async fn render(&self, context: RenderContext) -> Result<RenderedPage, RenderError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        deps::record_entity(EntityType::ENTRY, 1);
        deps::record_listing(EntityType::ENTRY, 5);
        Ok(RenderedPage::ok(format!("<p>{}</p>", context.path)))
    }
}

fn sites() -> SiteUrls {
    SiteUrls::new()
        .with_site(1, "https://example.com")
        .expect("valid base url")
}

#[tokio::test]
async fn pages_already_in_storage_are_not_rendered_again() {
    let storage = Arc::new(MemoryStorage::new(NonZeroUsize::new(16).unwrap()));
    storage
        .put(&SiteUri::new(1, "cached"), Bytes::from("cached body"))
        .await
        .unwrap();

    let renderer = Arc::new(EchoRenderer::default());
    let generator = LocalGenerator::new(sites(), storage.clone(), renderer.clone());
    let pipeline = RegenerationPipeline::new().with_generator(Arc::new(generator));

    let status = pipeline
        .run(
            vec![SiteUri::new(1, "cached"), SiteUri::new(1, "fresh")],
            GeneratorKind::Local,
            GenerateOptions::default(),
        )
        .await;
    let RunStatus::Completed(report) = status else {
        panic!("expected an inline run, got {status:?}");
    };

    let statuses: Vec<_> = report.outcomes.iter().map(|outcome| outcome.status).collect();
    assert_eq!(statuses, vec![OutcomeStatus::AlreadyCached, OutcomeStatus::Generated]);
    assert_eq!(report.succeeded, 2);
    assert_eq!(renderer.renders.load(Ordering::SeqCst), 1);
    assert_eq!(
        storage.get(&SiteUri::new(1, "fresh")).await.unwrap(),
        Some(Bytes::from("<p>/fresh</p>"))
    );
}

#[tokio::test]
async fn rendered_dependencies_drive_the_next_invalidation() {
    let storage = Arc::new(MemoryStorage::new(NonZeroUsize::new(16).unwrap()));
    let registry = Arc::new(DependencyRegistry::new());
    let generator = LocalGenerator::new(sites(), storage, Arc::new(EchoRenderer::default()))
        .with_registry(registry.clone());
    let pipeline = RegenerationPipeline::new().with_generator(Arc::new(generator));

    pipeline
        .run(
            vec![SiteUri::home(1), SiteUri::new(1, "news")],
            GeneratorKind::Local,
            GenerateOptions::default(),
        )
        .await;

    assert_eq!(
        registry.dependencies_for(&SiteUri::home(1)),
        HashSet::from([
            Dependency::Entity(EntityKey::new(EntityType::ENTRY, 1)),
            Dependency::Listing {
                entity_type: EntityType::ENTRY,
                source_id: 5,
            },
        ])
    );

    // Disabling entry 2 in section 5 touches only the listing.
    let mut entry = ContentEntity::entry(2, 5, EntitySnapshot::new(true));
    let before = entry.snapshot();
    entry.set_enabled(false);

    let mut tracker = ChangeTracker::new();
    tracker.record(&entry, &before, MutationIntent::Save);

    let plan = InvalidationResolver::new(registry).resolve(&mut tracker).await;
    assert!(tracker.is_empty());
    assert!(!plan.clear_all);
    assert_eq!(plan.uris(), vec![SiteUri::home(1), SiteUri::new(1, "news")]);
}

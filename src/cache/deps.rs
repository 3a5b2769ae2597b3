//! Dependency collector for rendered pages.
//!
//! Uses `tokio::task_local!` to record which entities a page render read.
//! Renderers call [`record`]; the local generator wraps each render in
//! [`with_collector`] and registers the result with the dependency registry.

use std::cell::RefCell;
use std::collections::HashSet;
use std::future::Future;

use super::registry::Dependency;
use crate::domain::entities::{EntityId, EntityKey, EntityType, SourceId};

tokio::task_local! {
    static DEPS: RefCell<HashSet<Dependency>>;
}

/// Record a dependency of the page currently being rendered.
///
/// Silently ignored when no collector is active.
pub fn record(dependency: Dependency) {
    let _ = DEPS.try_with(|deps| {
        deps.borrow_mut().insert(dependency);
    });
}

/// Shorthand for recording a single entity read.
pub fn record_entity(entity_type: EntityType, id: EntityId) {
    record(Dependency::Entity(EntityKey::new(entity_type, id)));
}

/// Shorthand for recording a listing over a source (section, volume, ...).
pub fn record_listing(entity_type: EntityType, source_id: SourceId) {
    record(Dependency::Listing {
        entity_type,
        source_id,
    });
}

/// Run `f` with a fresh collector and return its output plus everything recorded.
///
/// The set is drained inside the scope, before the task-local is torn down.
pub async fn with_collector<F, R>(f: F) -> (R, HashSet<Dependency>)
where
    F: Future<Output = R>,
{
    DEPS.scope(RefCell::new(HashSet::new()), async move {
        let output = f.await;
        let collected = DEPS.try_with(RefCell::take).unwrap_or_default();
        (output, collected)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_without_collector_is_no_op() {
        record_entity(EntityType::ENTRY, 1);
    }

    #[tokio::test]
    async fn with_collector_captures_dependencies() {
        let (value, deps) = with_collector(async {
            record_entity(EntityType::ENTRY, 1);
            record_entity(EntityType::ASSET, 2);
            record_listing(EntityType::ENTRY, 4);
            42
        })
        .await;

        assert_eq!(value, 42);
        assert_eq!(deps.len(), 3);
        assert!(deps.contains(&Dependency::Listing {
            entity_type: EntityType::ENTRY,
            source_id: 4,
        }));
    }

    #[tokio::test]
    async fn record_deduplicates() {
        let (_, deps) = with_collector(async {
            record_entity(EntityType::ENTRY, 1);
            record_entity(EntityType::ENTRY, 1);
        })
        .await;

        assert_eq!(deps.len(), 1);
    }

    #[tokio::test]
    async fn collectors_do_not_leak_between_scopes() {
        let (_, first) = with_collector(async { record_entity(EntityType::TAG, 1) }).await;
        let (_, second) = with_collector(async {}).await;

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }
}

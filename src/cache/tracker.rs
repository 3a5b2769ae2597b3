//! Per-unit-of-work change tracking.
//!
//! A [`ChangeTracker`] is owned by exactly one request or job. Callers take an
//! [`EntitySnapshot`] before mutating an entity and hand both the snapshot and
//! the mutated entity to [`ChangeTracker::record`], which works out what
//! changed and merges it into the tracking set.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;
use tracing::{debug, trace};

use crate::domain::entities::{
    EntityId, EntityKey, EntitySnapshot, EntityType, MutationIntent, SourceId, TrackedEntity,
};

const SOURCE: &str = "pagerefresh::tracker";

/// What changed on one entity during the current unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub source_id: Option<SourceId>,
    pub changed_attributes: BTreeSet<String>,
    pub changed_fields: BTreeSet<String>,
    pub status_changed: bool,
    pub file_changed: bool,
}

impl ChangeRecord {
    /// Compare an entity against its pre-mutation snapshot.
    ///
    /// Returns `None` when nothing differs.
    pub fn diff<E>(entity: &E, previous: &EntitySnapshot, intent: MutationIntent) -> Option<Self>
    where
        E: TrackedEntity + ?Sized,
    {
        let current = entity.snapshot();

        let record = Self {
            entity_type: entity.entity_type(),
            entity_id: entity.id(),
            source_id: entity.source_id(),
            changed_attributes: changed_keys(&previous.attributes, &current.attributes),
            changed_fields: changed_keys(&previous.fields, &current.fields),
            status_changed: previous.enabled != current.enabled,
            file_changed: entity.is_file_backed() && intent == MutationIntent::ReplaceFile,
        };

        record.has_changes().then_some(record)
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.entity_id)
    }

    pub fn has_changes(&self) -> bool {
        self.status_changed
            || self.file_changed
            || !self.changed_attributes.is_empty()
            || !self.changed_fields.is_empty()
    }

    /// Only attributes changed: no fields, no status flip, no new file.
    pub fn is_changed_by_attributes(&self) -> bool {
        !self.status_changed
            && !self.file_changed
            && !self.changed_attributes.is_empty()
            && self.changed_fields.is_empty()
    }

    /// Only fields changed: no attributes, no status flip, no new file.
    pub fn is_changed_by_fields(&self) -> bool {
        !self.status_changed
            && !self.file_changed
            && self.changed_attributes.is_empty()
            && !self.changed_fields.is_empty()
    }

    fn merge(&mut self, other: ChangeRecord) {
        if other.source_id.is_some() {
            self.source_id = other.source_id;
        }
        self.changed_attributes.extend(other.changed_attributes);
        self.changed_fields.extend(other.changed_fields);
        self.status_changed |= other.status_changed;
        self.file_changed |= other.file_changed;
    }
}

/// Names whose values differ between two maps.
///
/// A name present on only one side counts as changed.
fn changed_keys(previous: &BTreeMap<String, Value>, current: &BTreeMap<String, Value>) -> BTreeSet<String> {
    previous
        .keys()
        .chain(current.keys())
        .filter(|name| previous.get(*name) != current.get(*name))
        .cloned()
        .collect()
}

/// Tracking set for one unit of work.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    records: HashMap<EntityKey, ChangeRecord>,
    batch_mode: bool,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_mode(batch_mode: bool) -> Self {
        Self {
            records: HashMap::new(),
            batch_mode,
        }
    }

    pub fn batch_mode(&self) -> bool {
        self.batch_mode
    }

    pub fn set_batch_mode(&mut self, batch_mode: bool) {
        self.batch_mode = batch_mode;
    }

    /// Record a mutation of `entity`.
    ///
    /// Returns `true` when something changed and the tracking set was updated.
    pub fn record<E>(&mut self, entity: &E, previous: &EntitySnapshot, intent: MutationIntent) -> bool
    where
        E: TrackedEntity + ?Sized,
    {
        let Some(record) = ChangeRecord::diff(entity, previous, intent) else {
            trace!(
                target: SOURCE,
                entity_type = %entity.entity_type(),
                entity_id = entity.id(),
                "entity unchanged, not tracked"
            );
            return false;
        };

        debug!(
            target: SOURCE,
            entity_type = %record.entity_type,
            entity_id = record.entity_id,
            status_changed = record.status_changed,
            file_changed = record.file_changed,
            attributes = ?record.changed_attributes,
            fields = ?record.changed_fields,
            "entity change tracked"
        );

        match self.records.get_mut(&record.key()) {
            Some(existing) => existing.merge(record),
            None => {
                self.records.insert(record.key(), record);
            }
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn get(&self, key: &EntityKey) -> Option<&ChangeRecord> {
        self.records.get(key)
    }

    pub fn records(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.records.values()
    }

    /// Drain the tracking set, ordered by entity key.
    pub fn take_records(&mut self) -> Vec<ChangeRecord> {
        let mut records: Vec<_> = self.records.drain().map(|(_, record)| record).collect();
        records.sort_by(|a, b| a.key().cmp(&b.key()));
        records
    }

    pub fn reset(&mut self) {
        self.records.clear();
    }

    pub fn element_ids(&self, entity_type: &EntityType) -> Vec<EntityId> {
        let ids: BTreeSet<_> = self
            .of_type(entity_type)
            .map(|record| record.entity_id)
            .collect();
        ids.into_iter().collect()
    }

    pub fn source_ids(&self, entity_type: &EntityType) -> Vec<SourceId> {
        let ids: BTreeSet<_> = self
            .of_type(entity_type)
            .filter_map(|record| record.source_id)
            .collect();
        ids.into_iter().collect()
    }

    pub fn changed_attributes(&self, entity_type: &EntityType, id: EntityId) -> Vec<String> {
        self.lookup(entity_type, id)
            .map(|record| record.changed_attributes.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn changed_fields(&self, entity_type: &EntityType, id: EntityId) -> Vec<String> {
        self.lookup(entity_type, id)
            .map(|record| record.changed_fields.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_changed_by_attributes(&self, entity_type: &EntityType, id: EntityId) -> bool {
        self.lookup(entity_type, id)
            .is_some_and(ChangeRecord::is_changed_by_attributes)
    }

    pub fn is_changed_by_fields(&self, entity_type: &EntityType, id: EntityId) -> bool {
        self.lookup(entity_type, id)
            .is_some_and(ChangeRecord::is_changed_by_fields)
    }

    /// Ids of file-backed entities whose binary content was replaced.
    pub fn assets_changed_by_file(&self) -> Vec<EntityId> {
        let ids: BTreeSet<_> = self
            .records
            .values()
            .filter(|record| record.file_changed)
            .map(|record| record.entity_id)
            .collect();
        ids.into_iter().collect()
    }

    fn of_type<'a>(&'a self, entity_type: &'a EntityType) -> impl Iterator<Item = &'a ChangeRecord> {
        self.records
            .values()
            .filter(move |record| &record.entity_type == entity_type)
    }

    fn lookup(&self, entity_type: &EntityType, id: EntityId) -> Option<&ChangeRecord> {
        self.records.get(&EntityKey::new(entity_type.clone(), id))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::entities::ContentEntity;

    const SECTION: SourceId = 4;

    fn entry() -> (ContentEntity, EntitySnapshot) {
        let state = EntitySnapshot::new(true)
            .with_attribute("title", json!("Hello"))
            .with_attribute("slug", json!("hello"))
            .with_field("plain_text", json!("Body"));
        let entity = ContentEntity::entry(11, SECTION, state);
        let snapshot = entity.snapshot();
        (entity, snapshot)
    }

    #[test]
    fn unchanged_entity_is_not_tracked() {
        let (entity, before) = entry();
        let mut tracker = ChangeTracker::new();

        assert!(!tracker.record(&entity, &before, MutationIntent::Save));
        assert!(tracker.is_empty());
    }

    #[test]
    fn status_change_is_tracked_without_classification() {
        let (mut entity, before) = entry();
        entity.set_enabled(false);

        let mut tracker = ChangeTracker::new();
        tracker.record(&entity, &before, MutationIntent::Save);

        let record = tracker.get(&entity.key()).expect("record");
        assert!(record.status_changed);
        assert!(record.changed_attributes.is_empty());
        assert!(!tracker.is_changed_by_attributes(&EntityType::ENTRY, 11));
        assert!(!tracker.is_changed_by_fields(&EntityType::ENTRY, 11));
        assert_eq!(tracker.element_ids(&EntityType::ENTRY), vec![11]);
        assert_eq!(tracker.source_ids(&EntityType::ENTRY), vec![SECTION]);
    }

    #[test]
    fn attribute_change_is_classified() {
        let (mut entity, before) = entry();
        entity.set_attribute("title", "Title123");

        let mut tracker = ChangeTracker::new();
        tracker.record(&entity, &before, MutationIntent::Save);

        assert_eq!(
            tracker.changed_attributes(&EntityType::ENTRY, 11),
            vec!["title".to_string()]
        );
        assert!(tracker.changed_fields(&EntityType::ENTRY, 11).is_empty());
        assert!(tracker.is_changed_by_attributes(&EntityType::ENTRY, 11));
        assert!(!tracker.is_changed_by_fields(&EntityType::ENTRY, 11));
    }

    #[test]
    fn field_change_is_classified() {
        let (mut entity, before) = entry();
        entity.set_field("plain_text", "Text123");

        let mut tracker = ChangeTracker::new();
        tracker.record(&entity, &before, MutationIntent::Save);

        assert!(tracker.changed_attributes(&EntityType::ENTRY, 11).is_empty());
        assert_eq!(
            tracker.changed_fields(&EntityType::ENTRY, 11),
            vec!["plain_text".to_string()]
        );
        assert!(!tracker.is_changed_by_attributes(&EntityType::ENTRY, 11));
        assert!(tracker.is_changed_by_fields(&EntityType::ENTRY, 11));
    }

    #[test]
    fn attribute_and_field_change_is_unclassified() {
        let (mut entity, before) = entry();
        entity.set_attribute("title", "Title123");
        entity.set_field("plain_text", "Text123");

        let mut tracker = ChangeTracker::new();
        tracker.record(&entity, &before, MutationIntent::Save);

        assert_eq!(tracker.changed_attributes(&EntityType::ENTRY, 11), vec!["title"]);
        assert_eq!(tracker.changed_fields(&EntityType::ENTRY, 11), vec!["plain_text"]);
        assert!(!tracker.is_changed_by_attributes(&EntityType::ENTRY, 11));
        assert!(!tracker.is_changed_by_fields(&EntityType::ENTRY, 11));
    }

    #[test]
    fn status_attribute_and_field_change_is_unclassified() {
        let (mut entity, before) = entry();
        entity.set_enabled(false);
        entity.set_attribute("title", "Title123");
        entity.set_field("plain_text", "Text123");

        let mut tracker = ChangeTracker::new();
        tracker.record(&entity, &before, MutationIntent::Save);

        let record = tracker.get(&entity.key()).expect("record");
        assert!(record.status_changed);
        assert_eq!(tracker.changed_attributes(&EntityType::ENTRY, 11), vec!["title"]);
        assert_eq!(tracker.changed_fields(&EntityType::ENTRY, 11), vec!["plain_text"]);
        assert!(!tracker.is_changed_by_attributes(&EntityType::ENTRY, 11));
        assert!(!tracker.is_changed_by_fields(&EntityType::ENTRY, 11));
    }

    #[test]
    fn status_with_single_attribute_is_unclassified() {
        let (mut entity, before) = entry();
        entity.set_enabled(false);
        entity.set_attribute("title", "Title123");

        let mut tracker = ChangeTracker::new();
        tracker.record(&entity, &before, MutationIntent::Save);

        assert!(!tracker.is_changed_by_attributes(&EntityType::ENTRY, 11));
    }

    #[test]
    fn replaced_file_is_tracked() {
        let asset = ContentEntity::asset(21, 1, EntitySnapshot::new(true));
        let before = asset.snapshot();

        let mut tracker = ChangeTracker::new();
        assert!(tracker.record(&asset, &before, MutationIntent::ReplaceFile));

        assert_eq!(tracker.element_ids(&EntityType::ASSET), vec![21]);
        assert_eq!(tracker.assets_changed_by_file(), vec![21]);
        assert!(!tracker.is_changed_by_attributes(&EntityType::ASSET, 21));
        assert!(!tracker.is_changed_by_fields(&EntityType::ASSET, 21));
    }

    #[test]
    fn replace_intent_on_plain_entity_is_ignored() {
        let (entity, before) = entry();
        let mut tracker = ChangeTracker::new();

        assert!(!tracker.record(&entity, &before, MutationIntent::ReplaceFile));
        assert!(tracker.assets_changed_by_file().is_empty());
    }

    #[test]
    fn null_and_empty_string_differ() {
        let mut entity = ContentEntity::entry(
            3,
            SECTION,
            EntitySnapshot::new(true).with_attribute("uri", Value::Null),
        );
        let before = entity.snapshot();
        entity.set_attribute("uri", "");

        let mut tracker = ChangeTracker::new();
        tracker.record(&entity, &before, MutationIntent::Save);
        assert_eq!(tracker.changed_attributes(&EntityType::ENTRY, 3), vec!["uri"]);
    }

    #[test]
    fn field_missing_from_snapshot_counts_as_changed() {
        let (mut entity, _) = entry();
        let before = EntitySnapshot::new(true)
            .with_attribute("title", json!("Hello"))
            .with_attribute("slug", json!("hello"));
        entity.set_field("plain_text", "Body");

        let mut tracker = ChangeTracker::new();
        tracker.record(&entity, &before, MutationIntent::Save);
        assert_eq!(tracker.changed_fields(&EntityType::ENTRY, 11), vec!["plain_text"]);
    }

    #[test]
    fn second_record_merges_into_first() {
        let (mut entity, before) = entry();
        entity.set_attribute("title", "Title123");

        let mut tracker = ChangeTracker::new();
        tracker.record(&entity, &before, MutationIntent::Save);

        let before = entity.snapshot();
        entity.set_field("plain_text", "Text123");
        entity.set_enabled(false);
        tracker.record(&entity, &before, MutationIntent::Save);

        assert_eq!(tracker.len(), 1);
        let record = tracker.get(&entity.key()).expect("record");
        assert!(record.status_changed);
        assert_eq!(tracker.changed_attributes(&EntityType::ENTRY, 11), vec!["title"]);
        assert_eq!(tracker.changed_fields(&EntityType::ENTRY, 11), vec!["plain_text"]);
    }

    #[test]
    fn reset_clears_everything() {
        let (mut entity, before) = entry();
        entity.set_attribute("title", "Title123");

        let mut tracker = ChangeTracker::new();
        tracker.record(&entity, &before, MutationIntent::Save);
        tracker.reset();

        assert!(tracker.is_empty());
        assert!(tracker.element_ids(&EntityType::ENTRY).is_empty());
        assert!(tracker.changed_attributes(&EntityType::ENTRY, 11).is_empty());
        assert!(!tracker.is_changed_by_attributes(&EntityType::ENTRY, 11));
        assert!(tracker.assets_changed_by_file().is_empty());
    }

    #[test]
    fn take_records_drains_in_key_order() {
        let mut tracker = ChangeTracker::new();
        for id in [9, 2, 5] {
            let mut entity = ContentEntity::entry(id, SECTION, EntitySnapshot::new(true));
            let before = entity.snapshot();
            entity.set_enabled(false);
            tracker.record(&entity, &before, MutationIntent::Save);
        }

        let ids: Vec<_> = tracker.take_records().iter().map(|r| r.entity_id).collect();
        assert_eq!(ids, vec![2, 5, 9]);
        assert!(tracker.is_empty());
    }
}

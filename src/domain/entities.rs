//! Content entities as seen by the change tracker.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type EntityId = u64;
pub type SourceId = u64;

/// Discriminator for the kind of content entity (entry, asset, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityType(Cow<'static, str>);

impl EntityType {
    pub const ENTRY: Self = Self(Cow::Borrowed("entry"));
    pub const ASSET: Self = Self(Cow::Borrowed("asset"));
    pub const CATEGORY: Self = Self(Cow::Borrowed("category"));
    pub const TAG: Self = Self(Cow::Borrowed("tag"));
    pub const USER: Self = Self(Cow::Borrowed("user"));
    pub const GLOBAL_SET: Self = Self(Cow::Borrowed("global_set"));

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one entity instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub id: EntityId,
}

impl EntityKey {
    pub fn new(entity_type: EntityType, id: EntityId) -> Self {
        Self { entity_type, id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.id)
    }
}

/// Attribute and field values of an entity at one point in time.
///
/// `null` and `""` are different values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub enabled: bool,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl EntitySnapshot {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_field(mut self, handle: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(handle.into(), value.into());
        self
    }
}

/// What the caller declares a mutation to be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationIntent {
    #[default]
    Save,
    /// The binary content of a file-backed entity is being replaced.
    ReplaceFile,
}

/// Read access the change tracker needs from a content entity.
pub trait TrackedEntity {
    fn entity_type(&self) -> EntityType;

    fn id(&self) -> EntityId;

    /// Structural container (section, volume, group) the entity lives in.
    fn source_id(&self) -> Option<SourceId> {
        None
    }

    /// Current in-memory state.
    fn snapshot(&self) -> EntitySnapshot;

    fn is_file_backed(&self) -> bool {
        false
    }

    fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type(), self.id())
    }
}

/// Plain-data entity, for callers that do not have their own model type.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentEntity {
    pub entity_type: EntityType,
    pub id: EntityId,
    pub source_id: Option<SourceId>,
    pub file_backed: bool,
    pub state: EntitySnapshot,
}

impl ContentEntity {
    pub fn entry(id: EntityId, section_id: SourceId, state: EntitySnapshot) -> Self {
        Self {
            entity_type: EntityType::ENTRY,
            id,
            source_id: Some(section_id),
            file_backed: false,
            state,
        }
    }

    pub fn asset(id: EntityId, volume_id: SourceId, state: EntitySnapshot) -> Self {
        Self {
            entity_type: EntityType::ASSET,
            id,
            source_id: Some(volume_id),
            file_backed: true,
            state,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.state.enabled = enabled;
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.state.attributes.insert(name.into(), value.into());
    }

    pub fn set_field(&mut self, handle: impl Into<String>, value: impl Into<Value>) {
        self.state.fields.insert(handle.into(), value.into());
    }
}

impl TrackedEntity for ContentEntity {
    fn entity_type(&self) -> EntityType {
        self.entity_type.clone()
    }

    fn id(&self) -> EntityId {
        self.id
    }

    fn source_id(&self) -> Option<SourceId> {
        self.source_id
    }

    fn snapshot(&self) -> EntitySnapshot {
        self.state.clone()
    }

    fn is_file_backed(&self) -> bool {
        self.file_backed
    }
}

//! Schema lookup seam.

use parking_lot::RwLock;
use std::collections::HashMap;
use tidesync_protocol::TypeTag;

/// Property type lookup supplied by the object-relational layer.
///
/// The sync engine uses it to tag outgoing payloads and to find relationship
/// targets that gate incoming changes.
pub trait SchemaRegistry: Send + Sync {
    /// Returns the type tag of `property` on `entity`, if known.
    fn property_type(&self, entity: &str, property: &str) -> Option<TypeTag>;

    /// Returns the entity a relationship property points at, if `property`
    /// is a relationship.
    fn relationship_target(&self, entity: &str, property: &str) -> Option<String>;

    /// Returns true if `entity` is registered.
    fn has_entity(&self, entity: &str) -> bool;
}

/// Schema of one entity.
#[derive(Debug, Clone, Default)]
pub struct EntitySchema {
    /// Property name to type tag.
    pub properties: HashMap<String, TypeTag>,
    /// Relationship property name to target entity.
    pub relationships: HashMap<String, String>,
}

/// In-memory schema registry.
///
/// # Example
///
/// ```ignore
/// let schema = MemorySchema::new()
///     .with_property("Person", "name", TypeTag::Text)
///     .with_relationship("Person", "department", "Department", TypeTag::EntityNumeric);
/// ```
#[derive(Debug, Default)]
pub struct MemorySchema {
    entities: RwLock<HashMap<String, EntitySchema>>,
}

impl MemorySchema {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a property.
    #[must_use]
    pub fn with_property(self, entity: &str, property: &str, tag: TypeTag) -> Self {
        self.set_property(entity, property, tag);
        self
    }

    /// Registers a relationship property pointing at `target`.
    #[must_use]
    pub fn with_relationship(self, entity: &str, property: &str, target: &str, tag: TypeTag) -> Self {
        self.set_property(entity, property, tag);
        self.entities
            .write()
            .entry(entity.to_string())
            .or_default()
            .relationships
            .insert(property.to_string(), target.to_string());
        self
    }

    /// Registers an entity with no properties.
    #[must_use]
    pub fn with_entity(self, entity: &str) -> Self {
        self.entities.write().entry(entity.to_string()).or_default();
        self
    }

    /// Adds or replaces a property at runtime.
    pub fn set_property(&self, entity: &str, property: &str, tag: TypeTag) {
        self.entities
            .write()
            .entry(entity.to_string())
            .or_default()
            .properties
            .insert(property.to_string(), tag);
    }

    /// Returns a copy of one entity's schema.
    pub fn entity(&self, entity: &str) -> Option<EntitySchema> {
        self.entities.read().get(entity).cloned()
    }
}

impl SchemaRegistry for MemorySchema {
    fn property_type(&self, entity: &str, property: &str) -> Option<TypeTag> {
        self.entities
            .read()
            .get(entity)
            .and_then(|schema| schema.properties.get(property).copied())
    }

    fn relationship_target(&self, entity: &str, property: &str) -> Option<String> {
        self.entities
            .read()
            .get(entity)
            .and_then(|schema| schema.relationships.get(property).cloned())
    }

    fn has_entity(&self, entity: &str) -> bool {
        self.entities.read().contains_key(entity)
    }
}

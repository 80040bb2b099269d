//! # Layers
//!
//! Layer properties live in an entity store owned by the host application. This crate only needs
//! to read and write three properties of a layer entity: its [`Blend`] (which carries opacity),
//! its visibility, and its [`Similarity`] transform.

use crate::{blend::Blend, transform::Similarity};

/// Opaque handle to a layer entity in the host's entity store.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct EntityId(pub u64);

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerError {
    #[error("layer entity {0:?} not found")]
    UnknownEntity(EntityId),
}

/// The slice of the host's entity store used by the canvas engine.
pub trait LayerStore {
    /// Blend settings of the layer, or `None` if the entity is unknown.
    fn blend_mode(&self, entity: EntityId) -> Option<Blend>;
    fn transform(&self, entity: EntityId) -> Option<Similarity>;
    fn visible(&self, entity: EntityId) -> Option<bool>;

    fn set_blend_mode(&mut self, entity: EntityId, blend: Blend) -> Result<(), LayerError>;
    fn set_transform(&mut self, entity: EntityId, transform: Similarity)
        -> Result<(), LayerError>;
    fn set_visible(&mut self, entity: EntityId, visible: bool) -> Result<(), LayerError>;
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LayerProperties {
    pub blend: Blend,
    pub transform: Similarity,
    pub visible: bool,
}
impl Default for LayerProperties {
    fn default() -> Self {
        Self {
            blend: Blend::default(),
            transform: Similarity::default(),
            visible: true,
        }
    }
}

/// A layer store that keeps properties in-memory.
#[derive(Default, Clone, Debug)]
pub struct InMemoryLayers {
    layers: hashbrown::HashMap<EntityId, LayerProperties>,
    next_id: u64,
}
impl InMemoryLayers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    /// Insert a new layer with default properties, returning its ID.
    pub fn insert_new(&mut self) -> EntityId {
        self.next_id += 1;
        let id = EntityId(self.next_id);
        self.layers.insert(id, LayerProperties::default());
        id
    }
    #[must_use]
    pub fn get(&self, entity: EntityId) -> Option<&LayerProperties> {
        self.layers.get(&entity)
    }
    fn get_mut(&mut self, entity: EntityId) -> Result<&mut LayerProperties, LayerError> {
        self.layers
            .get_mut(&entity)
            .ok_or(LayerError::UnknownEntity(entity))
    }
}
impl LayerStore for InMemoryLayers {
    fn blend_mode(&self, entity: EntityId) -> Option<Blend> {
        self.get(entity).map(|layer| layer.blend)
    }
    fn transform(&self, entity: EntityId) -> Option<Similarity> {
        self.get(entity).map(|layer| layer.transform)
    }
    fn visible(&self, entity: EntityId) -> Option<bool> {
        self.get(entity).map(|layer| layer.visible)
    }
    fn set_blend_mode(&mut self, entity: EntityId, blend: Blend) -> Result<(), LayerError> {
        self.get_mut(entity)?.blend = blend;
        Ok(())
    }
    fn set_transform(
        &mut self,
        entity: EntityId,
        transform: Similarity,
    ) -> Result<(), LayerError> {
        self.get_mut(entity)?.transform = transform;
        Ok(())
    }
    fn set_visible(&mut self, entity: EntityId, visible: bool) -> Result<(), LayerError> {
        self.get_mut(entity)?.visible = visible;
        Ok(())
    }
}

//! # Actions
//!
//! Actions are the entries of a frame's undo log. Each is immutable once recorded. Stroke actions
//! change canvas pixels and are reproduced by replay, while layer actions change a single property
//! of a layer entity and can be applied or reverted directly.

use crate::{
    layer::{EntityId, LayerError, LayerStore},
    stroke::Stroke,
    transform::Similarity,
    util::UnitF32,
};

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionError {
    #[error(transparent)]
    Layer(#[from] LayerError),
    #[error("action does not target a layer property")]
    NotLayerAction,
    #[error("{0} actions have no effect implemented")]
    Unimplemented(&'static str),
}

/// A layer was shown or hidden. A hidden layer carries zero opacity, and `saved_opacity` is the
/// opacity it has whenever visible.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VisibilityChange {
    pub entity: EntityId,
    pub old_visible: bool,
    pub new_visible: bool,
    pub saved_opacity: UnitF32,
}
/// A single layer property went from `old` to `new`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PropertyChange<T> {
    pub entity: EntityId,
    pub old: T,
    pub new: T,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    Stroke(Stroke),
    LayerVisibility(VisibilityChange),
    LayerOpacity(PropertyChange<UnitF32>),
    LayerTransform(PropertyChange<Similarity>),
    // Recorded for completeness, but applying them is not supported.
    LayerCreate(EntityId),
    LayerDelete(EntityId),
}
impl From<Stroke> for Action {
    fn from(value: Stroke) -> Self {
        Self::Stroke(value)
    }
}
impl From<VisibilityChange> for Action {
    fn from(value: VisibilityChange) -> Self {
        Self::LayerVisibility(value)
    }
}
impl From<PropertyChange<UnitF32>> for Action {
    fn from(value: PropertyChange<UnitF32>) -> Self {
        Self::LayerOpacity(value)
    }
}
impl From<PropertyChange<Similarity>> for Action {
    fn from(value: PropertyChange<Similarity>) -> Self {
        Self::LayerTransform(value)
    }
}
impl Action {
    #[must_use]
    pub fn stroke(&self) -> Option<&Stroke> {
        match self {
            Self::Stroke(s) => Some(s),
            _ => None,
        }
    }
    #[must_use]
    pub fn is_stroke(&self) -> bool {
        matches!(self, Self::Stroke(_))
    }
    /// The layer entity this action targets, if any.
    #[must_use]
    pub fn entity(&self) -> Option<EntityId> {
        match self {
            Self::Stroke(_) => None,
            Self::LayerVisibility(VisibilityChange { entity, .. })
            | Self::LayerOpacity(PropertyChange { entity, .. })
            | Self::LayerTransform(PropertyChange { entity, .. })
            | Self::LayerCreate(entity)
            | Self::LayerDelete(entity) => Some(*entity),
        }
    }
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stroke(_) => "Stroke",
            Self::LayerVisibility(_) => "LayerVisibility",
            Self::LayerOpacity(_) => "LayerOpacity",
            Self::LayerTransform(_) => "LayerTransform",
            Self::LayerCreate(_) => "LayerCreate",
            Self::LayerDelete(_) => "LayerDelete",
        }
    }
}

#[derive(PartialEq, Eq, Debug)]
pub enum DoUndo<'c, T> {
    Do(&'c T),
    Undo(&'c T),
}
impl<'c, T> DoUndo<'c, T> {
    #[must_use]
    pub fn inner(&self) -> &'c T {
        match self {
            Self::Do(c) | Self::Undo(c) => c,
        }
    }
}

/// Apply a layer-property action, or its inverse, to the layer store.
///
/// Application is absolute rather than relative: it writes the recorded value without checking the
/// current one, so re-applying an already applied action is harmless.
///
/// # Errors
/// [`ActionError::NotLayerAction`] for strokes, [`ActionError::Unimplemented`] for layer creation
/// and deletion, or the store's error if the entity is gone. On error, the store is unchanged.
pub fn apply_layer_action(
    store: &mut impl LayerStore,
    action: DoUndo<'_, Action>,
) -> Result<(), ActionError> {
    match action {
        DoUndo::Do(Action::Stroke(_)) | DoUndo::Undo(Action::Stroke(_)) => {
            Err(ActionError::NotLayerAction)
        }
        DoUndo::Do(Action::LayerVisibility(change)) => {
            set_visibility(store, change.entity, change.new_visible, change.saved_opacity)
        }
        DoUndo::Undo(Action::LayerVisibility(change)) => {
            set_visibility(store, change.entity, change.old_visible, change.saved_opacity)
        }
        DoUndo::Do(Action::LayerOpacity(PropertyChange { entity, new: to, .. }))
        | DoUndo::Undo(Action::LayerOpacity(PropertyChange { entity, old: to, .. })) => {
            let blend = store
                .blend_mode(*entity)
                .ok_or(LayerError::UnknownEntity(*entity))?;
            store.set_blend_mode(*entity, blend.with_opacity(*to))?;
            Ok(())
        }
        DoUndo::Do(Action::LayerTransform(PropertyChange { entity, new: to, .. }))
        | DoUndo::Undo(Action::LayerTransform(PropertyChange { entity, old: to, .. })) => {
            store.set_transform(*entity, *to)?;
            Ok(())
        }
        DoUndo::Do(other @ (Action::LayerCreate(_) | Action::LayerDelete(_)))
        | DoUndo::Undo(other @ (Action::LayerCreate(_) | Action::LayerDelete(_))) => {
            Err(ActionError::Unimplemented(other.kind()))
        }
    }
}

fn set_visibility(
    store: &mut impl LayerStore,
    entity: EntityId,
    visible: bool,
    saved_opacity: UnitF32,
) -> Result<(), ActionError> {
    let blend = store
        .blend_mode(entity)
        .ok_or(LayerError::UnknownEntity(entity))?;
    let opacity = if visible { saved_opacity } else { UnitF32::ZERO };
    store.set_blend_mode(entity, blend.with_opacity(opacity))?;
    store.set_visible(entity, visible)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{apply_layer_action, Action, ActionError, DoUndo, PropertyChange, VisibilityChange};
    use crate::{
        layer::{EntityId, InMemoryLayers, LayerError, LayerStore},
        transform::Similarity,
        util::UnitF32,
    };

    #[test]
    fn visibility_round_trip() {
        let mut layers = InMemoryLayers::new();
        let id = layers.insert_new();
        let half = UnitF32::saturating(0.5);
        layers
            .set_blend_mode(id, layers.blend_mode(id).unwrap().with_opacity(half))
            .unwrap();
        let hide = Action::from(VisibilityChange {
            entity: id,
            old_visible: true,
            new_visible: false,
            saved_opacity: half,
        });
        apply_layer_action(&mut layers, DoUndo::Do(&hide)).unwrap();
        assert_eq!(layers.visible(id), Some(false));
        assert!(layers.blend_mode(id).unwrap().opacity.is_zero());

        apply_layer_action(&mut layers, DoUndo::Undo(&hide)).unwrap();
        assert_eq!(layers.visible(id), Some(true));
        assert_eq!(layers.blend_mode(id).unwrap().opacity, half);
    }
    #[test]
    fn opacity_and_transform() {
        let mut layers = InMemoryLayers::new();
        let id = layers.insert_new();
        let opacity = Action::from(PropertyChange {
            entity: id,
            old: UnitF32::ONE,
            new: UnitF32::saturating(0.25),
        });
        apply_layer_action(&mut layers, DoUndo::Do(&opacity)).unwrap();
        assert_eq!(layers.blend_mode(id).unwrap().opacity.get(), 0.25);
        // Re-application is harmless.
        apply_layer_action(&mut layers, DoUndo::Do(&opacity)).unwrap();
        assert_eq!(layers.blend_mode(id).unwrap().opacity.get(), 0.25);
        apply_layer_action(&mut layers, DoUndo::Undo(&opacity)).unwrap();
        assert_eq!(layers.blend_mode(id).unwrap().opacity, UnitF32::ONE);

        let moved = Similarity::translated(3.0, 4.0);
        let transform = Action::from(PropertyChange {
            entity: id,
            old: Similarity::default(),
            new: moved,
        });
        apply_layer_action(&mut layers, DoUndo::Do(&transform)).unwrap();
        assert_eq!(layers.transform(id), Some(moved));
        apply_layer_action(&mut layers, DoUndo::Undo(&transform)).unwrap();
        assert_eq!(layers.transform(id), Some(Similarity::default()));
    }
    #[test]
    fn rejects_non_layer_and_unknown() {
        let mut layers = InMemoryLayers::new();
        let ghost = EntityId(99);
        let create = Action::LayerCreate(ghost);
        assert_eq!(
            apply_layer_action(&mut layers, DoUndo::Do(&create)),
            Err(ActionError::Unimplemented("LayerCreate"))
        );
        let transform = Action::from(PropertyChange {
            entity: ghost,
            old: Similarity::default(),
            new: Similarity::translated(1.0, 1.0),
        });
        assert_eq!(
            apply_layer_action(&mut layers, DoUndo::Do(&transform)),
            Err(ActionError::Layer(LayerError::UnknownEntity(ghost)))
        );
        assert_eq!(transform.entity(), Some(ghost));
        assert!(!transform.is_stroke());
    }
}

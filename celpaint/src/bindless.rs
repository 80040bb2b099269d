//! # Bindless texture table
//!
//! Shaders reference frame textures by a stable slot index into one large descriptor array. Only the
//! main thread mutates the table.

use crate::device::ViewId;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct TextureIndex(pub u32);

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    #[error("texture table is full")]
    Full,
    #[error("slot {0:?} was never assigned")]
    Unassigned(TextureIndex),
}

pub trait TextureTable {
    /// Reserve a slot. It binds nothing until [`TextureTable::update_binding`].
    fn assign_texture_index(&mut self) -> Result<TextureIndex, TableError>;
    /// Point a slot at a new view.
    fn update_binding(&mut self, index: TextureIndex, view: ViewId) -> Result<(), TableError>;
    /// Return a slot for reuse.
    fn release(&mut self, index: TextureIndex);
}

/// A table kept in host memory, with a fixed capacity.
#[derive(Debug)]
pub struct BindlessTable {
    slots: Vec<Option<ViewId>>,
    assigned: Vec<bool>,
    free: Vec<u32>,
    /// Number of binding updates performed, for observers that need to rebuild descriptor sets.
    generation: u64,
}
impl BindlessTable {
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            slots: vec![None; capacity as usize],
            assigned: vec![false; capacity as usize],
            // Pop from the back, so lower indices are handed out first.
            free: (0..capacity).rev().collect(),
            generation: 0,
        }
    }
    #[must_use]
    pub fn binding(&self, index: TextureIndex) -> Option<ViewId> {
        self.slots.get(index.0 as usize).copied().flatten()
    }
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
    #[must_use]
    pub fn assigned_count(&self) -> usize {
        self.assigned.iter().filter(|a| **a).count()
    }
}
impl TextureTable for BindlessTable {
    fn assign_texture_index(&mut self) -> Result<TextureIndex, TableError> {
        let index = self.free.pop().ok_or(TableError::Full)?;
        self.assigned[index as usize] = true;
        Ok(TextureIndex(index))
    }
    fn update_binding(&mut self, index: TextureIndex, view: ViewId) -> Result<(), TableError> {
        match self.assigned.get(index.0 as usize) {
            Some(true) => {
                self.slots[index.0 as usize] = Some(view);
                self.generation += 1;
                Ok(())
            }
            _ => Err(TableError::Unassigned(index)),
        }
    }
    fn release(&mut self, index: TextureIndex) {
        let i = index.0 as usize;
        if self.assigned.get(i).copied().unwrap_or(false) {
            self.assigned[i] = false;
            self.slots[i] = None;
            self.free.push(index.0);
        } else {
            log::warn!("releasing unassigned texture slot {index:?}");
        }
    }
}

#![warn(clippy::pedantic)]

pub mod action;
pub mod blend;
pub mod color;
pub mod layer;
pub mod recorder;
pub mod stroke;
pub mod tier;
pub mod transform;
pub mod util;

pub use action::{Action, DoUndo};
pub use recorder::ActionRecorder;
pub use tier::{Ladder, ResolutionTier};

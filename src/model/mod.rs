//! Domain values: actions, sequences, scripts, templates and recognition results.
//!
//! Everything here is an immutable value. "Mutating" operations on
//! [`GameAction`] and [`ActionSequence`] return new values and leave the original
//! untouched; [`ImageTemplate`] is the exception and bumps its version on every
//! change instead.

pub mod action;
pub mod geometry;
pub mod key;
pub mod recognition;
pub mod script;
pub mod sequence;
pub mod template;

pub use action::{ActionId, ActionKind, Condition, GameAction, MAX_LOOP_COUNT};
pub use geometry::{Point, Rect};
pub use key::{Key, MouseButton};
pub use recognition::RecognitionResult;
pub use script::Script;
pub use sequence::ActionSequence;
pub use template::{ImageTemplate, TemplateLibrary};

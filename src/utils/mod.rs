//! Utilities for autoreplay.
//!
//! Submodules:
//! - `interpolation`: `{{variable}}` and `{{@parameter}}` expansion for script values.

pub mod interpolation;

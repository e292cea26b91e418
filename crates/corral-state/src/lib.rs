//! Corral entity status persistence
//!
//! Machines, units and unit agents each own one status document. Writers
//! go through [`StatusSetter`], which applies the per-domain validation
//! from [`corral_core::status`] before anything is stored.

pub mod collection;
pub mod entity;
pub mod error;

pub use collection::{StatusCollection, StatusDoc};
pub use entity::{Machine, StatusGetter, StatusInfo, StatusSetter, Unit, UnitAgent};
pub use error::{Result, StateError};

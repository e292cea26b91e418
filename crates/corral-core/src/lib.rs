//! Corral core domain types
//!
//! Shared vocabulary for the rest of the workspace:
//!
//! - [`version`]: agent version numbers and binary versions
//! - [`arch`]: architecture and series names
//! - [`constraints`]: machine constraints and provider validators
//! - [`tools`]: agent tools descriptors
//! - [`image`]: boot image metadata
//! - [`status`]: the status taxonomy for machines and units

pub mod arch;
pub mod constraints;
pub mod error;
pub mod image;
pub mod status;
pub mod tools;
pub mod version;

pub use error::{CoreError, Result};
pub use image::{CloudSpec, ImageConstraint, ImageMetadata};
pub use status::{Domain, Status, StatusData, StatusUpdate};
pub use tools::{Filter as ToolsFilter, Tools, ToolsList};
pub use version::{Binary, Number};

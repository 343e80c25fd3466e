//! Artifact Target Library
//!
//! This file serves as the library root for the artifact-target crate. It turns
//! user-supplied references into registry repository handles or OCI image
//! layout handles, and assembles the authenticated transport used to reach
//! remote registries.

pub mod cli;
pub mod content;
pub mod credential;
pub mod descriptor;
pub mod error;
pub mod layout;
pub mod logging;
pub mod net;
pub mod option;
pub mod registry;

pub use content::ReadOnlyTarget;
pub use descriptor::Descriptor;
pub use error::{Result, TargetError};
pub use logging::Logger;
pub use option::{BinaryTarget, Common, RemoteOptions, Target, TargetHandle, TargetKind};

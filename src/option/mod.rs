//! User-facing options
//!
//! Each option struct carries the raw flag values (as `clap` arguments) and a
//! [`FlagParser`] implementation that validates them and fills in the derived
//! fields. Composite options list their parts explicitly and run them in order
//! through [`parse_all`].

pub mod common;
pub mod distribution;
pub mod platform;
pub mod remote;
pub mod target;

pub use common::Common;
pub use distribution::{CapabilityPreference, DistributionSpec};
pub use platform::{Platform, PlatformSpec};
pub use remote::RemoteOptions;
pub use target::{BinaryTarget, Target, TargetHandle, TargetKind, parse_oci_layout_reference};

use crate::error::Result;
use crate::logging::Logger;

/// Validates one option and derives its parsed fields
pub trait FlagParser {
    fn parse(&mut self, logger: &Logger) -> Result<()>;
}

/// Run parsers in order, stopping at the first failure
pub fn parse_all(parsers: &mut [&mut dyn FlagParser], logger: &Logger) -> Result<()> {
    for parser in parsers.iter_mut() {
        parser.parse(logger)?;
    }
    Ok(())
}

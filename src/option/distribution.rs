//! Distribution specification preference
//!
//! Chooses how referrers are discovered: through the referrers API, through
//! the `sha256-<hex>` tag scheme, or by probing the registry.

use crate::error::{Result, TargetError};
use crate::logging::Logger;
use crate::option::FlagParser;
use crate::registry::Repository;

const REFERRERS_API: &str = "v1.1-referrers-api";
const REFERRERS_TAG: &str = "v1.1-referrers-tag";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CapabilityPreference {
    /// Probe the registry and fall back to the tag scheme
    #[default]
    Unset,
    ForceApi,
    ForceTagScheme,
}

impl CapabilityPreference {
    pub fn parse(flag: &str) -> Result<Self> {
        match flag {
            "" => Ok(Self::Unset),
            REFERRERS_API => Ok(Self::ForceApi),
            REFERRERS_TAG => Ok(Self::ForceTagScheme),
            other => Err(TargetError::Configuration(format!(
                "unknown distribution specification flag: {:?}, accepted values are \"\", {:?} and {:?}",
                other, REFERRERS_API, REFERRERS_TAG
            ))),
        }
    }

    /// Whether the referrers API is required; `None` leaves it to probing
    pub fn referrers_api(self) -> Option<bool> {
        match self {
            Self::Unset => None,
            Self::ForceApi => Some(true),
            Self::ForceTagScheme => Some(false),
        }
    }

    /// Fix the capability on a freshly built repository handle
    pub fn apply(self, repository: &Repository) -> Result<()> {
        match self.referrers_api() {
            Some(capable) => repository.set_referrers_capability(capable),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, clap::Args)]
pub struct DistributionSpec {
    /// Set OCI distribution spec version and API option. Options: v1.1-referrers-api, v1.1-referrers-tag
    #[arg(long = "distribution-spec", value_name = "version", default_value = "")]
    pub spec_flag: String,

    #[arg(skip)]
    pub preference: CapabilityPreference,
}

impl DistributionSpec {
    pub fn new(spec_flag: impl Into<String>) -> Self {
        Self {
            spec_flag: spec_flag.into(),
            preference: CapabilityPreference::Unset,
        }
    }
}

impl FlagParser for DistributionSpec {
    fn parse(&mut self, _logger: &Logger) -> Result<()> {
        self.preference = CapabilityPreference::parse(&self.spec_flag)?;
        Ok(())
    }
}

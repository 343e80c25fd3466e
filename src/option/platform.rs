//! Target platform selection

use std::fmt;

use crate::descriptor::DescriptorPlatform;
use crate::error::{Result, TargetError};
use crate::logging::Logger;
use crate::option::FlagParser;

const PLATFORM_GRAMMAR: &str = "os[/arch[/variant]][:os_version]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSpec {
    pub os: String,
    pub architecture: String,
    pub variant: String,
    pub os_version: String,
}

impl PlatformSpec {
    /// Empty variant and OS version match anything
    pub fn matches(&self, platform: &DescriptorPlatform) -> bool {
        let optional = |wanted: &str, actual: &Option<String>| {
            wanted.is_empty() || actual.as_deref() == Some(wanted)
        };
        self.os == platform.os
            && self.architecture == platform.architecture
            && optional(&self.variant, &platform.variant)
            && optional(&self.os_version, &platform.os_version)
    }
}

impl fmt::Display for PlatformSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if !self.variant.is_empty() {
            write!(f, "/{}", self.variant)?;
        }
        if !self.os_version.is_empty() {
            write!(f, ":{}", self.os_version)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, clap::Args)]
pub struct Platform {
    /// Request platform in the form of os[/arch][/variant][:os_version]
    #[arg(long = "platform", value_name = "os[/arch][/variant][:os_version]", default_value = "")]
    pub platform: String,

    /// Parsed platform; `None` means no constraint
    #[arg(skip)]
    pub spec: Option<PlatformSpec>,
}

impl Platform {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            spec: None,
        }
    }
}

impl FlagParser for Platform {
    fn parse(&mut self, _logger: &Logger) -> Result<()> {
        if self.platform.is_empty() {
            self.spec = None;
            return Ok(());
        }

        let (platform, os_version) = self
            .platform
            .split_once(':')
            .unwrap_or((self.platform.as_str(), ""));
        let parts: Vec<&str> = platform.split('/').collect();
        let (architecture, variant) = match parts.as_slice() {
            [_] => (host_architecture(), ""),
            [_, arch] => (*arch, ""),
            [_, arch, variant] => (*arch, *variant),
            _ => return Err(TargetError::format(&self.platform, PLATFORM_GRAMMAR)),
        };

        if parts[0].is_empty() {
            return Err(TargetError::Validation(
                "invalid platform: OS cannot be empty".to_string(),
            ));
        }
        if architecture.is_empty() {
            return Err(TargetError::Validation(
                "invalid platform: Architecture cannot be empty".to_string(),
            ));
        }

        self.spec = Some(PlatformSpec {
            os: parts[0].to_string(),
            architecture: architecture.to_string(),
            variant: variant.to_string(),
            os_version: os_version.to_string(),
        });
        Ok(())
    }
}

/// Architecture of this build, named the way image manifests name it
pub fn host_architecture() -> &'static str {
    oci_architecture(std::env::consts::ARCH, cfg!(target_endian = "little"))
}

fn oci_architecture(arch: &'static str, little_endian: bool) -> &'static str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "386",
        "powerpc64" if little_endian => "ppc64le",
        "powerpc64" => "ppc64",
        other => other,
    }
}

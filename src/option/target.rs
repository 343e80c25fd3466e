//! Target options: one registry repository or OCI image layout
//!
//! A [`Target`] starts from the raw reference typed by the user. Resolving it
//! fills in the path (layout directory or `registry/repository`) and the tag or
//! digest; building it yields a [`TargetHandle`] to read from or write to.

use std::fmt;

use async_trait::async_trait;

use crate::content::ReadOnlyTarget;
use crate::descriptor::Descriptor;
use crate::error::{Result, TargetError};
use crate::layout::LayoutHandle;
use crate::logging::Logger;
use crate::option::{Common, FlagParser, RemoteOptions, parse_all};
use crate::registry::{Reference, Repository, WarningDeduplicator};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TargetKind {
    #[default]
    Remote,
    OciLayout,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Remote => f.write_str("registry"),
            TargetKind::OciLayout => f.write_str("oci-layout"),
        }
    }
}

/// Split `<path>[:<tag>|@<digest>]`. The last `@` wins over any `:`.
pub fn parse_oci_layout_reference(raw: &str) -> Result<(String, String)> {
    let (path, reference) = match raw.rfind('@') {
        Some(at) => (&raw[..at], &raw[at + 1..]),
        None => raw.rsplit_once(':').unwrap_or((raw, "")),
    };
    if path.is_empty() {
        return Err(TargetError::invalid_reference(raw, "found empty file path"));
    }
    Ok((path.to_string(), reference.to_string()))
}

#[derive(Debug, Clone, Default, clap::Args)]
pub struct Target {
    #[command(flatten)]
    pub remote: RemoteOptions,

    /// Set target as an OCI image layout
    #[arg(long = "oci-layout")]
    pub oci_layout: bool,

    /// Reference as typed: `registry/repository[:tag|@digest]` or `path[:tag|@digest]`
    #[arg(value_name = "reference")]
    pub raw_reference: String,

    #[arg(skip)]
    pub kind: TargetKind,

    /// Tag or digest, empty when none was given
    #[arg(skip)]
    pub reference: String,

    /// Layout path, or registry and repository for a remote target
    #[arg(skip)]
    pub path: String,
}

impl Target {
    pub fn new(raw_reference: impl Into<String>, kind: TargetKind) -> Self {
        Self {
            oci_layout: kind == TargetKind::OciLayout,
            raw_reference: raw_reference.into(),
            kind,
            ..Default::default()
        }
    }

    /// Printable reference prefixed with the target kind
    pub fn annotated_reference(&self) -> String {
        format!("[{}] {}", self.kind, self.raw_reference)
    }

    /// Fill `path` and `reference` from the raw reference
    pub fn resolve(&mut self) -> Result<()> {
        match self.kind {
            TargetKind::OciLayout => {
                let (path, reference) = parse_oci_layout_reference(&self.raw_reference)?;
                self.path = path;
                self.reference = reference;
            }
            TargetKind::Remote => {
                let parsed = Reference::parse(&self.raw_reference)?;
                self.path = parsed.without_reference();
                self.reference = parsed.reference;
            }
        }
        Ok(())
    }

    fn repository(&mut self, common: &Common, logger: &Logger) -> Result<Repository> {
        let repository = self
            .remote
            .new_repository(&self.raw_reference, common, logger)?;
        self.path = repository.reference.without_reference();
        self.reference = repository.reference.reference.clone();
        Ok(repository)
    }

    /// Build a target that may be written to; layouts are created on demand
    pub fn new_target(&mut self, common: &Common, logger: &Logger) -> Result<TargetHandle> {
        match self.kind {
            TargetKind::OciLayout => {
                self.resolve()?;
                Ok(TargetHandle::Layout(LayoutHandle::open(&self.path)?))
            }
            TargetKind::Remote => Ok(TargetHandle::Repository(self.repository(common, logger)?)),
        }
    }

    /// Build a target for reading; a layout path may be a directory or a tar archive
    pub fn new_readonly_target(&mut self, common: &Common, logger: &Logger) -> Result<TargetHandle> {
        match self.kind {
            TargetKind::OciLayout => {
                self.resolve()?;
                Ok(TargetHandle::Layout(LayoutHandle::open_read_only(&self.path)?))
            }
            TargetKind::Remote => Ok(TargetHandle::Repository(self.repository(common, logger)?)),
        }
    }

    pub fn ensure_reference_not_empty(&self) -> Result<()> {
        if self.reference.is_empty() {
            return Err(TargetError::Validation("reference cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl FlagParser for Target {
    fn parse(&mut self, logger: &Logger) -> Result<()> {
        if self.oci_layout {
            self.kind = TargetKind::OciLayout;
            if !self.remote.header_flags.is_empty() {
                return Err(TargetError::Validation(
                    "custom header flags cannot be used on an OCI image layout target".to_string(),
                ));
            }
            return Ok(());
        }
        self.kind = TargetKind::Remote;
        self.remote.parse(logger)
    }
}

/// A built target
pub enum TargetHandle {
    Repository(Repository),
    Layout(LayoutHandle),
}

impl TargetHandle {
    pub fn as_repository(&self) -> Option<&Repository> {
        match self {
            TargetHandle::Repository(repository) => Some(repository),
            TargetHandle::Layout(_) => None,
        }
    }

    pub fn as_layout(&self) -> Option<&LayoutHandle> {
        match self {
            TargetHandle::Layout(layout) => Some(layout),
            TargetHandle::Repository(_) => None,
        }
    }
}

#[async_trait]
impl ReadOnlyTarget for TargetHandle {
    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        match self {
            TargetHandle::Repository(repository) => repository.resolve(reference).await,
            TargetHandle::Layout(layout) => layout.resolve(reference).await,
        }
    }

    async fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        match self {
            TargetHandle::Repository(repository) => repository.fetch(descriptor).await,
            TargetHandle::Layout(layout) => layout.fetch(descriptor).await,
        }
    }

    async fn tags(&self) -> Result<Vec<String>> {
        match self {
            TargetHandle::Repository(repository) => repository.tags().await,
            TargetHandle::Layout(layout) => layout.tags().await,
        }
    }
}

/// Source and destination of a two-sided operation.
///
/// Both sides share one warning deduplicator, and the shared `resolves` are
/// placed ahead of each side's own so side-specific entries override them.
#[derive(Debug, Clone, Default)]
pub struct BinaryTarget {
    pub from: Target,
    pub to: Target,
    pub resolves: Vec<String>,
}

impl BinaryTarget {
    pub fn new(from: Target, to: Target, resolves: Vec<String>) -> Self {
        Self { from, to, resolves }
    }
}

impl FlagParser for BinaryTarget {
    fn parse(&mut self, logger: &Logger) -> Result<()> {
        let warnings = WarningDeduplicator::new();
        self.from.remote.share_warnings(warnings.clone());
        self.to.remote.share_warnings(warnings);

        for side in [&mut self.from, &mut self.to] {
            let own = std::mem::take(&mut side.remote.resolves);
            side.remote.resolves = self.resolves.iter().cloned().chain(own).collect();
        }
        parse_all(&mut [&mut self.from, &mut self.to], logger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_reference_forms() {
        assert_eq!(
            parse_oci_layout_reference("/tmp/layout:v1").unwrap(),
            ("/tmp/layout".to_string(), "v1".to_string())
        );
        assert_eq!(
            parse_oci_layout_reference("/tmp/layout@sha256:abcd").unwrap(),
            ("/tmp/layout".to_string(), "sha256:abcd".to_string())
        );
        assert_eq!(
            parse_oci_layout_reference("/tmp/layout").unwrap(),
            ("/tmp/layout".to_string(), String::new())
        );
    }

    #[test]
    fn test_layout_reference_needs_path() {
        for raw in [":v1", "@sha256:abcd", ""] {
            assert!(matches!(
                parse_oci_layout_reference(raw),
                Err(TargetError::InvalidReference { .. })
            ));
        }
    }

    #[test]
    fn test_remote_resolution_strips_reference() {
        let mut target = Target::new("registry.example.com/team/app:v1", TargetKind::Remote);
        target.resolve().unwrap();
        assert_eq!(target.path, "registry.example.com/team/app");
        assert_eq!(target.reference, "v1");
        assert_eq!(
            target.annotated_reference(),
            "[registry] registry.example.com/team/app:v1"
        );
    }

    #[test]
    fn test_ensure_reference_not_empty() {
        let mut target = Target::new("/tmp/layout", TargetKind::OciLayout);
        target.resolve().unwrap();
        assert!(target.ensure_reference_not_empty().is_err());
        assert_eq!(target.annotated_reference(), "[oci-layout] /tmp/layout");
    }

    #[test]
    fn test_headers_rejected_on_layout() {
        let mut target = Target::new("/tmp/layout:v1", TargetKind::OciLayout);
        target.remote.header_flags = vec!["X-Foo:bar".to_string()];
        let err = target.parse(&Logger::new_quiet()).unwrap_err();
        assert!(matches!(err, TargetError::Validation(_)));
    }

    #[test]
    fn test_binary_target_merges_resolves_and_shares_warnings() {
        let mut from = Target::new("a.example.com/app:v1", TargetKind::Remote);
        from.remote.resolves = vec!["a.example.com:443:10.0.0.9".to_string()];
        let to = Target::new("b.example.com/app:v1", TargetKind::Remote);
        let mut pair = BinaryTarget::new(from, to, vec!["a.example.com:443:10.0.0.1".to_string()]);

        pair.parse(&Logger::new_quiet()).unwrap();
        assert_eq!(
            pair.from.remote.resolves,
            vec!["a.example.com:443:10.0.0.1", "a.example.com:443:10.0.0.9"]
        );
        assert_eq!(pair.to.remote.resolves, vec!["a.example.com:443:10.0.0.1"]);

        assert!(pair.from.remote.warnings().first_seen("r.example.com", "text"));
        assert!(!pair.to.remote.warnings().first_seen("r.example.com", "text"));
    }
}

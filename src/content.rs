//! Read access shared by every kind of target

use async_trait::async_trait;

use crate::descriptor::{Descriptor, Index};
use crate::error::{Result, TargetError};
use crate::option::PlatformSpec;

/// Something that can resolve references and list tags: a remote repository,
/// a directory layout or a tar-archived layout
#[async_trait]
pub trait ReadOnlyTarget: Send + Sync {
    /// Resolve a tag or digest to the descriptor of the manifest it names
    async fn resolve(&self, reference: &str) -> Result<Descriptor>;

    /// Raw manifest content for a descriptor
    async fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>>;

    /// All tags, sorted
    async fn tags(&self) -> Result<Vec<String>>;
}

/// Resolve `reference` and, when it names an index and a platform is given,
/// descend to the manifest for that platform
pub async fn resolve_platform(
    target: &dyn ReadOnlyTarget,
    reference: &str,
    platform: Option<&PlatformSpec>,
) -> Result<Descriptor> {
    let descriptor = target.resolve(reference).await?;
    let Some(platform) = platform else {
        return Ok(descriptor);
    };
    if !descriptor.is_index() {
        return Ok(descriptor);
    }

    let index: Index = serde_json::from_slice(&target.fetch(&descriptor).await?)?;
    index
        .manifests
        .into_iter()
        .find(|manifest| manifest.platform.as_ref().is_some_and(|p| platform.matches(p)))
        .ok_or_else(|| {
            TargetError::NotFound(format!("{}: no manifest for platform {}", reference, platform))
        })
}

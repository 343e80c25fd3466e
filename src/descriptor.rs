//! Content descriptors shared by remote and layout targets

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Annotation carrying the tag of a manifest inside an image layout index
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

pub const MEDIA_TYPE_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_IMAGE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Manifest media types a resolve request accepts
pub const MANIFEST_MEDIA_TYPES: &[&str] = &[
    MEDIA_TYPE_IMAGE_MANIFEST,
    MEDIA_TYPE_IMAGE_INDEX,
    "application/vnd.docker.distribution.manifest.v2+json",
    MEDIA_TYPE_DOCKER_MANIFEST_LIST,
];

const SHORT_DIGEST_LENGTH: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<DescriptorPlatform>,
}

/// Platform of a manifest listed in an index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorPlatform {
    pub architecture: String,
    pub os: String,
    #[serde(rename = "os.version", default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Descriptor {
    pub fn short_digest(&self) -> &str {
        short_digest(&self.digest)
    }

    pub fn ref_name(&self) -> Option<&str> {
        self.annotations.get(ANNOTATION_REF_NAME).map(String::as_str)
    }

    pub fn is_index(&self) -> bool {
        self.media_type == MEDIA_TYPE_IMAGE_INDEX || self.media_type == MEDIA_TYPE_DOCKER_MANIFEST_LIST
    }
}

/// First 12 hex characters of a sha256 digest; other digests are returned whole
pub fn short_digest(digest: &str) -> &str {
    match digest.strip_prefix("sha256:") {
        Some(hex) if hex.len() >= SHORT_DIGEST_LENGTH => &hex[..SHORT_DIGEST_LENGTH],
        _ => digest,
    }
}

/// Image index document (`index.json` in a layout, referrers responses)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_digest() {
        let digest = "sha256:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";
        assert_eq!(short_digest(digest), "9f86d081884c");
        assert_eq!(short_digest("sha512:abcd"), "sha512:abcd");
        assert_eq!(short_digest("sha256:abc"), "sha256:abc");
    }

    #[test]
    fn test_descriptor_json_field_names() {
        let json = r#"{
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "digest": "sha256:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08",
            "size": 7,
            "annotations": {"org.opencontainers.image.ref.name": "v1"}
        }"#;
        let descriptor: Descriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.size, 7);
        assert_eq!(descriptor.ref_name(), Some("v1"));
        assert_eq!(descriptor.short_digest(), "9f86d081884c");
    }
}

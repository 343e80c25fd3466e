//! Integration tests for building targets from user references.
//!
//! Covers directory and tar-archived OCI layouts, platform selection through
//! an index, credential store failures and two-sided targets.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use artifact_target::content::resolve_platform;
use artifact_target::descriptor::{
    Descriptor, DescriptorPlatform, Index, MEDIA_TYPE_IMAGE_INDEX, MEDIA_TYPE_IMAGE_MANIFEST,
};
use artifact_target::layout::LayoutKind;
use artifact_target::option::{FlagParser, Platform, parse_all};
use artifact_target::{
    BinaryTarget, Common, Logger, ReadOnlyTarget, Target, TargetError, TargetKind,
};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

fn quiet() -> Logger {
    Logger::new_quiet()
}

fn digest_of(content: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content)))
}

fn write_blob(layout: &Path, content: &[u8]) -> String {
    let digest = digest_of(content);
    let dir = layout.join("blobs").join("sha256");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(digest.trim_start_matches("sha256:")), content).unwrap();
    digest
}

fn manifest_descriptor(content: &[u8], digest: String, platform: Option<(&str, &str)>) -> Descriptor {
    Descriptor {
        media_type: MEDIA_TYPE_IMAGE_MANIFEST.to_string(),
        digest,
        size: content.len() as u64,
        artifact_type: None,
        annotations: BTreeMap::new(),
        platform: platform.map(|(os, architecture)| DescriptorPlatform {
            os: os.to_string(),
            architecture: architecture.to_string(),
            ..Default::default()
        }),
    }
}

/// Layout with a two-platform index tagged `multi` and a single manifest tagged `single`
fn populate(dir: &Path) -> (Descriptor, Descriptor) {
    let mut target = Target::new(format!("{}:ignored", dir.display()), TargetKind::OciLayout);
    let handle = target.new_target(&Common::default(), &quiet()).unwrap();
    let layout = handle.as_layout().unwrap();

    let amd64: &[u8] = br#"{"schemaVersion":2,"annotations":{"arch":"amd64"}}"#;
    let arm64: &[u8] = br#"{"schemaVersion":2,"annotations":{"arch":"arm64"}}"#;
    let amd64 = manifest_descriptor(amd64, write_blob(dir, amd64), Some(("linux", "amd64")));
    let arm64_descriptor = manifest_descriptor(arm64, write_blob(dir, arm64), Some(("linux", "arm64")));

    let index = serde_json::to_vec(&Index {
        schema_version: 2,
        media_type: Some(MEDIA_TYPE_IMAGE_INDEX.to_string()),
        manifests: vec![amd64.clone(), arm64_descriptor.clone()],
    })
    .unwrap();
    let index_descriptor = Descriptor {
        media_type: MEDIA_TYPE_IMAGE_INDEX.to_string(),
        digest: write_blob(dir, &index),
        size: index.len() as u64,
        artifact_type: None,
        annotations: BTreeMap::new(),
        platform: None,
    };

    layout.tag(&index_descriptor, "multi").unwrap();
    layout.tag(&amd64, "single").unwrap();
    (index_descriptor, arm64_descriptor)
}

fn archive(dir: &Path, archive_path: &Path) {
    let file = fs::File::create(archive_path).unwrap();
    let mut builder = tar::Builder::new(file);
    builder.append_dir_all(".", dir).unwrap();
    builder.finish().unwrap();
}

#[tokio::test]
async fn test_directory_layout_round_trip() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("layout");
    let (index, _) = populate(&dir);

    let mut target = Target::new(format!("{}:multi", dir.display()), TargetKind::OciLayout);
    let handle = target.new_readonly_target(&Common::default(), &quiet()).unwrap();
    assert_eq!(target.path, dir.display().to_string());
    assert_eq!(target.reference, "multi");
    assert!(!handle.as_layout().unwrap().is_writable());

    let resolved = handle.resolve(&target.reference).await.unwrap();
    assert_eq!(resolved.digest, index.digest);
    assert_eq!(handle.tags().await.unwrap(), vec!["multi", "single"]);

    let by_digest = handle.resolve(&index.digest).await.unwrap();
    assert_eq!(by_digest.digest, index.digest);
}

#[tokio::test]
async fn test_tar_layout_selects_platform() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("layout");
    let (_, arm64) = populate(&dir);
    let tarball = tmp.path().join("layout.tar");
    archive(&dir, &tarball);

    let mut target = Target::new(format!("{}:multi", tarball.display()), TargetKind::OciLayout);
    let mut platform = Platform::new("linux/arm64");
    parse_all(&mut [&mut target, &mut platform], &quiet()).unwrap();

    let handle = target.new_readonly_target(&Common::default(), &quiet()).unwrap();
    assert_eq!(handle.as_layout().unwrap().kind(), LayoutKind::Tar);

    let selected = resolve_platform(&handle, &target.reference, platform.spec.as_ref())
        .await
        .unwrap();
    assert_eq!(selected.digest, arm64.digest);

    let mut missing = Platform::new("windows/amd64");
    missing.parse(&quiet()).unwrap();
    let result = resolve_platform(&handle, &target.reference, missing.spec.as_ref()).await;
    assert!(matches!(result, Err(TargetError::NotFound(_))));
}

#[tokio::test]
async fn test_platform_ignored_for_single_manifest() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("layout");
    populate(&dir);

    let mut target = Target::new(format!("{}:single", dir.display()), TargetKind::OciLayout);
    let mut platform = Platform::new("linux/arm64");
    parse_all(&mut [&mut target, &mut platform], &quiet()).unwrap();
    let handle = target.new_readonly_target(&Common::default(), &quiet()).unwrap();

    let resolved = resolve_platform(&handle, &target.reference, platform.spec.as_ref())
        .await
        .unwrap();
    assert_eq!(resolved.platform.unwrap().architecture, "amd64");
}

#[test]
fn test_read_only_layout_must_exist() {
    let tmp = TempDir::new().unwrap();
    let mut target = Target::new(
        format!("{}:v1", tmp.path().join("absent").display()),
        TargetKind::OciLayout,
    );
    let result = target.new_readonly_target(&Common::default(), &quiet());
    assert!(matches!(result, Err(TargetError::Layout { .. })));

    // a directory without the marker file is not a layout
    let mut target = Target::new(format!("{}:v1", tmp.path().display()), TargetKind::OciLayout);
    let result = target.new_readonly_target(&Common::default(), &quiet());
    assert!(matches!(result, Err(TargetError::Layout { .. })));
}

#[test]
fn test_remote_target_fills_path_and_reference() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("config.json");
    fs::write(&config, "{}").unwrap();

    let digest = digest_of(b"manifest");
    let mut target = Target::new(format!("localhost:5000/team/app@{}", digest), TargetKind::Remote);
    target.remote.configs = vec![config];
    target.parse(&quiet()).unwrap();

    let handle = target.new_target(&Common::default(), &quiet()).unwrap();
    let repository = handle.as_repository().unwrap();
    assert!(repository.plain_http);
    assert!(repository.skip_referrers_gc);
    assert_eq!(target.path, "localhost:5000/team/app");
    assert_eq!(target.reference, digest);
    target.ensure_reference_not_empty().unwrap();
}

#[test]
fn test_malformed_registry_config_fails_target() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("config.json");
    fs::write(&config, "{not json").unwrap();

    let mut target = Target::new("registry.example.com/team/app:v1", TargetKind::Remote);
    target.remote.configs = vec![config.clone()];
    let result = target.new_readonly_target(&Common::default(), &quiet());
    match result {
        Err(TargetError::CredentialStore { path, .. }) => assert_eq!(path, config),
        Err(other) => panic!("unexpected error: {other:?}"),
        Ok(_) => panic!("target built with a malformed config"),
    }
}

#[test]
fn test_remote_reference_without_tag_is_rejected_when_required() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("config.json");
    fs::write(&config, "").unwrap();

    let mut target = Target::new("registry.example.com/team/app", TargetKind::Remote);
    target.remote.configs = vec![config];
    target.new_readonly_target(&Common::default(), &quiet()).unwrap();
    assert!(matches!(
        target.ensure_reference_not_empty(),
        Err(TargetError::Validation(_))
    ));
}

#[test]
fn test_binary_target_builds_both_sides() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("layout");
    populate(&dir);
    let config = tmp.path().join("config.json");
    fs::write(&config, "{}").unwrap();

    let from = Target::new(format!("{}:single", dir.display()), TargetKind::OciLayout);
    let mut to = Target::new("registry.example.com/team/app:copy", TargetKind::Remote);
    to.remote.configs = vec![config];
    let mut pair = BinaryTarget::new(from, to, vec!["registry.example.com:443:127.0.0.1".to_string()]);
    pair.parse(&quiet()).unwrap();

    assert_eq!(pair.to.remote.resolves, vec!["registry.example.com:443:127.0.0.1"]);
    assert!(pair.from.new_readonly_target(&Common::default(), &quiet()).is_ok());
    let handle = pair.to.new_target(&Common::default(), &quiet()).unwrap();
    assert!(!handle.as_repository().unwrap().plain_http);
}

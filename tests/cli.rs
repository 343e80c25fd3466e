//! End-to-end runs of the binary: results on stdout, diagnostics on stderr.

use std::collections::BTreeMap;
use std::process::Command;

use artifact_target::descriptor::{Descriptor, MEDIA_TYPE_IMAGE_MANIFEST};
use artifact_target::layout::LayoutHandle;
use tempfile::TempDir;

const DIGEST: &str = "sha256:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

fn layout_with_tags(tags: &[&str]) -> TempDir {
    let dir = TempDir::new().unwrap();
    let layout = LayoutHandle::open(dir.path()).unwrap();
    let manifest = Descriptor {
        media_type: MEDIA_TYPE_IMAGE_MANIFEST.to_string(),
        digest: DIGEST.to_string(),
        size: 42,
        artifact_type: None,
        annotations: BTreeMap::new(),
        platform: None,
    };
    for tag in tags {
        layout.tag(&manifest, tag).unwrap();
    }
    dir
}

fn run(args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_artifact-target"))
        .args(args)
        .output()
        .unwrap();
    (
        String::from_utf8(output.stdout).unwrap(),
        String::from_utf8(output.stderr).unwrap(),
        output.status.success(),
    )
}

#[test]
fn test_verbose_output_stays_off_stdout() {
    let dir = layout_with_tags(&["v2", "v1"]);
    let reference = dir.path().display().to_string();

    let (stdout, stderr, ok) = run(&["--verbose", "--no-tty", "tags", "--oci-layout", &reference]);
    assert!(ok, "{stderr}");
    assert_eq!(stdout, "v1\nv2\n");
    assert!(stderr.contains("Listing tags of [oci-layout]"), "{stderr}");
}

#[test]
fn test_short_resolve_prints_only_the_digest() {
    let dir = layout_with_tags(&["v1"]);
    let reference = format!("{}:v1", dir.path().display());

    let (stdout, stderr, ok) = run(&[
        "--debug", "--no-tty", "resolve", "--short", "--oci-layout", &reference,
    ]);
    assert!(ok, "{stderr}");
    assert_eq!(stdout.trim_end(), DIGEST);
}

#[test]
fn test_errors_go_to_stderr_with_failure_status() {
    let dir = TempDir::new().unwrap();
    let reference = format!("{}:v1", dir.path().join("absent").display());

    let (stdout, stderr, ok) = run(&["--no-tty", "resolve", "--oci-layout", &reference]);
    assert!(!ok);
    assert!(stdout.is_empty());
    assert!(stderr.contains("ERROR"), "{stderr}");
}

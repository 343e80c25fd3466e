//! OCI image layouts on disk
//!
//! A layout is either a directory or a tar archive of one. Directories opened
//! for writing are created on demand; anything opened read-only must already
//! exist and carry a valid `oci-layout` marker.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tar::Archive;

use crate::content::ReadOnlyTarget;
use crate::descriptor::{ANNOTATION_REF_NAME, Descriptor, Index, MEDIA_TYPE_IMAGE_INDEX};
use crate::error::{Result, TargetError};
use crate::registry::reference::validate_digest;

const LAYOUT_FILE: &str = "oci-layout";
const INDEX_FILE: &str = "index.json";
const LAYOUT_VERSION: &str = "1.0.0";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayoutMarker {
    image_layout_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Directory,
    Tar,
}

#[derive(Debug, Clone)]
pub struct LayoutHandle {
    path: PathBuf,
    kind: LayoutKind,
    writable: bool,
}

impl LayoutHandle {
    /// Open a directory layout for writing, creating it when missing
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path).map_err(|e| TargetError::layout(&path, e.to_string()))?;

        let handle = Self {
            path,
            kind: LayoutKind::Directory,
            writable: true,
        };
        match handle.read_file(LAYOUT_FILE)? {
            Some(marker) => handle.check_marker(&marker)?,
            None => {
                let marker = serde_json::to_vec(&LayoutMarker {
                    image_layout_version: LAYOUT_VERSION.to_string(),
                })?;
                handle.write_file(LAYOUT_FILE, &marker)?;
            }
        }
        if handle.read_file(INDEX_FILE)?.is_none() {
            handle.write_index(&Index {
                schema_version: 2,
                media_type: Some(MEDIA_TYPE_IMAGE_INDEX.to_string()),
                manifests: Vec::new(),
            })?;
        }
        Ok(handle)
    }

    /// Open an existing layout without write access. Directories are read in
    /// place; any other file is treated as a tar archive.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = fs::metadata(&path).map_err(|e| TargetError::layout(&path, e.to_string()))?;
        let kind = if metadata.is_dir() {
            LayoutKind::Directory
        } else {
            LayoutKind::Tar
        };

        let handle = Self {
            path,
            kind,
            writable: false,
        };
        let marker = handle
            .read_file(LAYOUT_FILE)?
            .ok_or_else(|| TargetError::layout(&handle.path, "missing oci-layout file"))?;
        handle.check_marker(&marker)?;
        Ok(handle)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> LayoutKind {
        self.kind
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn check_marker(&self, raw: &[u8]) -> Result<()> {
        let marker: LayoutMarker = serde_json::from_slice(raw)
            .map_err(|e| TargetError::layout(&self.path, format!("invalid oci-layout file: {}", e)))?;
        if marker.image_layout_version != LAYOUT_VERSION {
            return Err(TargetError::layout(
                &self.path,
                format!("unsupported layout version {}", marker.image_layout_version),
            ));
        }
        Ok(())
    }

    fn read_file(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match self.kind {
            LayoutKind::Directory => match fs::read(self.path.join(name)) {
                Ok(data) => Ok(Some(data)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(TargetError::layout(&self.path, e.to_string())),
            },
            LayoutKind::Tar => self.read_tar_entry(name),
        }
    }

    fn read_tar_entry(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let fail = |e: std::io::Error| TargetError::layout(&self.path, e.to_string());
        let file = File::open(&self.path).map_err(fail)?;
        let mut archive = Archive::new(file);
        for entry in archive.entries().map_err(fail)? {
            let mut entry = entry.map_err(fail)?;
            let path = entry.path().map_err(fail)?.to_string_lossy().to_string();
            if path.trim_start_matches("./") == name {
                let mut data = Vec::new();
                entry.read_to_end(&mut data).map_err(fail)?;
                return Ok(Some(data));
            }
        }
        Ok(None)
    }

    fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(TargetError::layout(&self.path, "layout is read-only"));
        }
        let target = self.path.join(name);
        let staging = self.path.join(format!("{}.tmp", name));
        fs::write(&staging, data).map_err(|e| TargetError::layout(&self.path, e.to_string()))?;
        fs::rename(&staging, &target).map_err(|e| TargetError::layout(&self.path, e.to_string()))
    }

    fn index(&self) -> Result<Index> {
        let raw = self
            .read_file(INDEX_FILE)?
            .ok_or_else(|| TargetError::layout(&self.path, "missing index.json"))?;
        serde_json::from_slice(&raw)
            .map_err(|e| TargetError::layout(&self.path, format!("invalid index.json: {}", e)))
    }

    fn write_index(&self, index: &Index) -> Result<()> {
        self.write_file(INDEX_FILE, &serde_json::to_vec_pretty(index)?)
    }

    /// Point `tag` at `descriptor` in the index, moving the tag if it was elsewhere
    pub fn tag(&self, descriptor: &Descriptor, tag: &str) -> Result<()> {
        if tag.is_empty() {
            return Err(TargetError::Validation("reference cannot be empty".to_string()));
        }
        let mut index = self.index()?;
        index.manifests.retain(|d| d.ref_name() != Some(tag));

        let mut tagged = descriptor.clone();
        tagged
            .annotations
            .insert(ANNOTATION_REF_NAME.to_string(), tag.to_string());
        index.manifests.push(tagged);
        self.write_index(&index)
    }
}

#[async_trait]
impl ReadOnlyTarget for LayoutHandle {
    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        if reference.is_empty() {
            return Err(TargetError::Validation("reference cannot be empty".to_string()));
        }
        let index = self.index()?;
        let found = if reference.contains(':') {
            index.manifests.into_iter().find(|d| d.digest == reference)
        } else {
            index
                .manifests
                .into_iter()
                .find(|d| d.ref_name() == Some(reference))
        };
        found.ok_or_else(|| {
            TargetError::NotFound(format!("{}: {}", self.path.display(), reference))
        })
    }

    async fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        // digests come from index.json and must not escape blobs/
        validate_digest(&descriptor.digest, &descriptor.digest)?;
        let (algorithm, encoded) = descriptor
            .digest
            .split_once(':')
            .ok_or_else(|| TargetError::invalid_reference(&descriptor.digest, "missing algorithm"))?;
        self.read_file(&format!("blobs/{}/{}", algorithm, encoded))?
            .ok_or_else(|| TargetError::NotFound(format!("{}: {}", self.path.display(), descriptor.digest)))
    }

    async fn tags(&self) -> Result<Vec<String>> {
        let mut tags: Vec<String> = self
            .index()?
            .manifests
            .iter()
            .filter_map(|d| d.ref_name().map(str::to_string))
            .collect();
        tags.sort();
        tags.dedup();
        Ok(tags)
    }
}

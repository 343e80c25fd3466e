//! TLS policy for registry connections

use std::path::{Path, PathBuf};

use reqwest::{Certificate, ClientBuilder};

use crate::error::{Result, TargetError};

/// How server certificates are checked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsPolicy {
    /// Skip certificate chain and hostname verification entirely
    pub insecure: bool,
    /// Extra PEM root certificate trusted on top of the platform roots
    pub ca_file: Option<PathBuf>,
}

impl TlsPolicy {
    pub fn new(insecure: bool) -> Self {
        Self {
            insecure,
            ca_file: None,
        }
    }

    pub fn with_ca_file(mut self, ca_file: Option<PathBuf>) -> Self {
        self.ca_file = ca_file;
        self
    }

    /// Load the extra root once so every client built from it shares the same trust set
    pub fn load(&self) -> Result<LoadedTlsPolicy> {
        let root = match &self.ca_file {
            Some(path) => Some(read_certificate(path)?),
            None => None,
        };
        Ok(LoadedTlsPolicy {
            insecure: self.insecure,
            root,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LoadedTlsPolicy {
    insecure: bool,
    root: Option<Certificate>,
}

impl LoadedTlsPolicy {
    pub fn apply(&self, builder: ClientBuilder) -> ClientBuilder {
        let builder = match &self.root {
            Some(root) => builder.add_root_certificate(root.clone()),
            None => builder,
        };
        if self.insecure {
            builder
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
        } else {
            builder
        }
    }

    pub fn is_insecure(&self) -> bool {
        self.insecure
    }
}

fn read_certificate(path: &Path) -> Result<Certificate> {
    let pem = std::fs::read(path).map_err(|e| {
        TargetError::Configuration(format!("failed to read CA file {}: {}", path.display(), e))
    })?;
    Certificate::from_pem(&pem).map_err(|e| {
        TargetError::Configuration(format!("invalid CA file {}: {}", path.display(), e))
    })
}

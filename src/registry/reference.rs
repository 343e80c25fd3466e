//! Registry reference parsing
//!
//! Grammar: `registry/repository[:tag|@digest]`. The registry is mandatory and
//! nothing is normalized (no implicit `docker.io` or `library/`).

use std::fmt;

use crate::error::{Result, TargetError};

const MAX_TAG_LENGTH: usize = 128;
const DOCKER_HUB_REGISTRY: &str = "docker.io";
const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Registry host with optional port, e.g. `localhost:5000`
    pub registry: String,
    /// Repository path, e.g. `team/app`
    pub repository: String,
    /// Tag or digest; empty when the reference names only a repository
    pub reference: String,
}

impl Reference {
    /// Parse a full reference
    pub fn parse(raw: &str) -> Result<Self> {
        let (registry, path) = raw
            .split_once('/')
            .ok_or_else(|| TargetError::invalid_reference(raw, "missing repository"))?;
        validate_registry(raw, registry)?;

        let (repository, reference) = if let Some((repository, digest)) = path.split_once('@') {
            // repository:tag@digest pins the digest, the tag is informational
            let repository = repository
                .rsplit_once(':')
                .map_or(repository, |(repository, _)| repository);
            validate_digest(raw, digest)?;
            (repository, digest)
        } else if let Some((repository, tag)) = path.rsplit_once(':') {
            validate_tag(raw, tag)?;
            (repository, tag)
        } else {
            (path, "")
        };
        validate_repository(raw, repository)?;

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            reference: reference.to_string(),
        })
    }

    /// Parse a registry name on its own, e.g. for registry-level operations
    pub fn parse_registry(raw: &str) -> Result<Self> {
        validate_registry(raw, raw)?;
        Ok(Self {
            registry: raw.to_string(),
            repository: String::new(),
            reference: String::new(),
        })
    }

    /// Host serving the registry API; Docker Hub answers on `registry-1.docker.io`
    pub fn host(&self) -> &str {
        if self.registry == DOCKER_HUB_REGISTRY {
            DOCKER_HUB_API_HOST
        } else {
            &self.registry
        }
    }

    pub fn is_digest(&self) -> bool {
        self.reference.contains(':')
    }

    /// `registry/repository` with the tag or digest stripped
    pub fn without_reference(&self) -> String {
        Reference {
            reference: String::new(),
            ..self.clone()
        }
        .to_string()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.registry)?;
        if self.repository.is_empty() {
            return Ok(());
        }
        write!(f, "/{}", self.repository)?;
        if self.reference.is_empty() {
            Ok(())
        } else if self.is_digest() {
            write!(f, "@{}", self.reference)
        } else {
            write!(f, ":{}", self.reference)
        }
    }
}

fn validate_registry(raw: &str, registry: &str) -> Result<()> {
    if registry.is_empty() {
        return Err(TargetError::invalid_reference(raw, "missing registry"));
    }
    let valid = registry
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'));
    if !valid {
        return Err(TargetError::invalid_reference(
            raw,
            format!("invalid registry {:?}", registry),
        ));
    }
    Ok(())
}

/// Path components are lowercase alphanumerics joined by `.`, `_`, `__` or runs of `-`
fn validate_repository(raw: &str, repository: &str) -> Result<()> {
    let invalid = || {
        TargetError::invalid_reference(raw, format!("invalid repository {:?}", repository))
    };
    if repository.is_empty() {
        return Err(invalid());
    }
    for component in repository.split('/') {
        if !is_path_component(component) {
            return Err(invalid());
        }
    }
    Ok(())
}

fn is_path_component(component: &str) -> bool {
    let bytes = component.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    match (bytes.first(), bytes.last()) {
        (Some(&first), Some(&last)) if alnum(first) && alnum(last) => {}
        _ => return false,
    }

    let mut i = 0;
    while i < bytes.len() {
        if alnum(bytes[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && !alnum(bytes[i]) {
            i += 1;
        }
        let separator = &component[start..i];
        let valid = matches!(separator, "." | "_" | "__") || separator.bytes().all(|b| b == b'-');
        if !valid {
            return false;
        }
    }
    true
}

fn validate_tag(raw: &str, tag: &str) -> Result<()> {
    let word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let mut chars = tag.chars();
    let valid = match chars.next() {
        Some(first) => {
            word(first) && tag.len() <= MAX_TAG_LENGTH && chars.all(|c| word(c) || c == '.' || c == '-')
        }
        None => false,
    };
    if !valid {
        return Err(TargetError::invalid_reference(raw, format!("invalid tag {:?}", tag)));
    }
    Ok(())
}

/// `algorithm:encoded`; sha256 and sha512 must carry lowercase hex of the right length
pub fn validate_digest(raw: &str, digest: &str) -> Result<()> {
    let invalid = |reason: &str| {
        TargetError::invalid_reference(raw, format!("invalid digest {:?}: {}", digest, reason))
    };
    let (algorithm, encoded) = digest
        .split_once(':')
        .ok_or_else(|| invalid("missing algorithm"))?;

    let algorithm_ok = !algorithm.is_empty()
        && algorithm
            .split(['+', '.', '_', '-'])
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    if !algorithm_ok {
        return Err(invalid("malformed algorithm"));
    }
    if encoded.is_empty()
        || !encoded
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'=' | b'_' | b'-'))
    {
        return Err(invalid("malformed encoded part"));
    }

    let hex_len = match algorithm {
        "sha256" => Some(64),
        "sha512" => Some(128),
        _ => None,
    };
    if let Some(len) = hex_len {
        let is_hex = encoded
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if encoded.len() != len || !is_hex {
            return Err(invalid("wrong length or not lowercase hex"));
        }
    }
    Ok(())
}

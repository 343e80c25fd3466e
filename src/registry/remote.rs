//! Remote registry and repository handles speaking the distribution API

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue, LINK};
use reqwest::{Method, Request, Response, StatusCode, Url};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::content::ReadOnlyTarget;
use crate::descriptor::{Descriptor, Index, MANIFEST_MEDIA_TYPES, MEDIA_TYPE_IMAGE_INDEX};
use crate::error::{Result, TargetError};
use crate::registry::auth::{AuthClient, repository_scope};
use crate::registry::reference::{Reference, validate_digest};
use crate::registry::warning::{WarningHandler, warnings_from_headers};

const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

fn base_url(registry: &str, plain_http: bool) -> String {
    let scheme = if plain_http { "http" } else { "https" };
    format!("{}://{}", scheme, registry)
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| TargetError::Validation(format!("invalid URL {}: {}", raw, e)))
}

fn deliver_warnings(handler: &Option<WarningHandler>, response: &Response) {
    if let Some(handler) = handler {
        for warning in warnings_from_headers(response.headers()) {
            handler(&warning);
        }
    }
}

/// Map a non-success status to an error; `what` names the missing thing on 404
async fn check_status(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TargetError::Authentication(
            format!("{} responded {}", response.url(), status),
        )),
        StatusCode::NOT_FOUND => Err(TargetError::NotFound(what.to_string())),
        _ => {
            let message = response.text().await.unwrap_or_default();
            Err(TargetError::Registry { status, message })
        }
    }
}

/// Handle on a whole registry
pub struct Registry {
    pub reference: Reference,
    pub plain_http: bool,
    pub warning_handler: Option<WarningHandler>,
    pub client: Arc<AuthClient>,
}

impl Registry {
    pub fn new(reference: Reference, client: Arc<AuthClient>) -> Self {
        Self {
            reference,
            plain_http: false,
            warning_handler: None,
            client,
        }
    }

    /// Check that the registry speaks the distribution API
    pub async fn ping(&self) -> Result<()> {
        let url = parse_url(&format!(
            "{}/v2/",
            base_url(self.reference.host(), self.plain_http)
        ))?;
        let response = self.client.send(Request::new(Method::GET, url), &[]).await?;
        deliver_warnings(&self.warning_handler, &response);
        check_status(response, &self.reference.registry).await?;
        Ok(())
    }

    /// Repository handle on this registry with the same settings
    pub fn repository(&self, name: &str) -> Result<Repository> {
        let reference = Reference::parse(&format!("{}/{}", self.reference.registry, name))?;
        let mut repository = Repository::new(reference, self.client.clone());
        repository.plain_http = self.plain_http;
        repository.warning_handler = self.warning_handler.clone();
        Ok(repository)
    }
}

/// Handle on one repository
pub struct Repository {
    pub reference: Reference,
    pub plain_http: bool,
    pub warning_handler: Option<WarningHandler>,
    pub client: Arc<AuthClient>,
    /// Leave stale referrers indexes behind when the tag scheme is updated
    pub skip_referrers_gc: bool,
    referrers_capability: Mutex<Option<bool>>,
}

impl Repository {
    pub fn new(reference: Reference, client: Arc<AuthClient>) -> Self {
        Self {
            reference,
            plain_http: false,
            warning_handler: None,
            client,
            skip_referrers_gc: false,
            referrers_capability: Mutex::new(None),
        }
    }

    /// Fix whether the registry supports the referrers API. Once known the
    /// capability cannot change.
    pub fn set_referrers_capability(&self, capable: bool) -> Result<()> {
        let mut state = self
            .referrers_capability
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        match *state {
            Some(existing) if existing != capable => Err(TargetError::CapabilityUnsupported(
                format!(
                    "referrers capability of {} was already set to {}",
                    self.reference.without_reference(),
                    existing
                ),
            )),
            _ => {
                *state = Some(capable);
                Ok(())
            }
        }
    }

    /// `Some(true)` for the referrers API, `Some(false)` for the tag scheme,
    /// `None` while unknown
    pub fn referrers_capability(&self) -> Option<bool> {
        *self
            .referrers_capability
            .lock()
            .unwrap_or_else(|p| p.into_inner())
    }

    fn url(&self, path: &str) -> Result<Url> {
        parse_url(&format!(
            "{}/v2/{}/{}",
            base_url(self.reference.host(), self.plain_http),
            self.reference.repository,
            path
        ))
    }

    fn pull_scope(&self) -> Vec<String> {
        vec![repository_scope(&self.reference.repository, &["pull"])]
    }

    async fn send(&self, request: Request) -> Result<Response> {
        let response = self.client.send(request, &self.pull_scope()).await?;
        deliver_warnings(&self.warning_handler, &response);
        Ok(response)
    }

    fn manifest_request(&self, method: Method, reference: &str, accept: &str) -> Result<Request> {
        let mut request = Request::new(method, self.url(&format!("manifests/{}", reference))?);
        let accept = HeaderValue::from_str(accept)
            .map_err(|_| TargetError::Validation(format!("invalid media type list {:?}", accept)))?;
        request.headers_mut().insert(ACCEPT, accept);
        Ok(request)
    }

    /// Fetch a manifest body by tag or digest
    async fn fetch_manifest(&self, reference: &str, accept: &str) -> Result<(Descriptor, Vec<u8>)> {
        let request = self.manifest_request(Method::GET, reference, accept)?;
        let response = self.send(request).await?;
        let response = check_status(response, &format!("{}: manifest {}", self.reference.without_reference(), reference)).await?;

        let media_type = header_str(&response, CONTENT_TYPE.as_str()).unwrap_or_default();
        let body = response.bytes().await?.to_vec();
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(&body)));
        Ok((
            Descriptor {
                media_type,
                digest,
                size: body.len() as u64,
                artifact_type: None,
                platform: None,
                annotations: Default::default(),
            },
            body,
        ))
    }

    /// Referrers of `digest`, optionally filtered by artifact type.
    ///
    /// Uses the referrers API when it is known or forced to be available and
    /// falls back to the `sha256-<hex>` tag scheme otherwise. An unknown
    /// capability is probed once and remembered.
    pub async fn referrers(&self, digest: &str, artifact_type: Option<&str>) -> Result<Vec<Descriptor>> {
        validate_digest(digest, digest)?;
        let mut referrers = match self.referrers_capability() {
            Some(false) => self.referrers_by_tag_scheme(digest).await?,
            capability => match self.referrers_by_api(digest).await? {
                Some(referrers) => {
                    if capability.is_none() {
                        self.set_referrers_capability(true)?;
                    }
                    referrers
                }
                None if capability == Some(true) => {
                    return Err(TargetError::CapabilityUnsupported(format!(
                        "{} does not support the referrers API",
                        self.reference.registry
                    )));
                }
                None => {
                    self.set_referrers_capability(false)?;
                    self.referrers_by_tag_scheme(digest).await?
                }
            },
        };
        if let Some(artifact_type) = artifact_type {
            referrers.retain(|d| d.artifact_type.as_deref() == Some(artifact_type));
        }
        Ok(referrers)
    }

    // None when the registry has no referrers endpoint
    async fn referrers_by_api(&self, digest: &str) -> Result<Option<Vec<Descriptor>>> {
        let mut request = Request::new(Method::GET, self.url(&format!("referrers/{}", digest))?);
        request
            .headers_mut()
            .insert(ACCEPT, HeaderValue::from_static(MEDIA_TYPE_IMAGE_INDEX));
        let response = self.send(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response, digest).await?;
        let index: Index = response.json().await?;
        Ok(Some(index.manifests))
    }

    async fn referrers_by_tag_scheme(&self, digest: &str) -> Result<Vec<Descriptor>> {
        let tag = digest.replacen(':', "-", 1);
        match self.fetch_manifest(&tag, MEDIA_TYPE_IMAGE_INDEX).await {
            Ok((_, body)) => {
                let index: Index = serde_json::from_slice(&body)?;
                Ok(index.manifests)
            }
            Err(TargetError::NotFound(_)) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }
}

fn header_str(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

// `<url>; rel="next"`, relative to the request URL
fn next_link(response: &Response) -> Option<Url> {
    let link = response.headers().get(LINK)?.to_str().ok()?;
    let (target, params) = link.split_once(';')?;
    if !params.contains("rel=\"next\"") {
        return None;
    }
    let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
    response.url().join(target).ok()
}

#[async_trait]
impl ReadOnlyTarget for Repository {
    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        let reference = if reference.is_empty() {
            self.reference.reference.as_str()
        } else {
            reference
        };
        if reference.is_empty() {
            return Err(TargetError::Validation("reference cannot be empty".to_string()));
        }
        let accept = MANIFEST_MEDIA_TYPES.join(", ");
        let what = format!("{}: manifest {}", self.reference.without_reference(), reference);

        let request = self.manifest_request(Method::HEAD, reference, &accept)?;
        let response = check_status(self.send(request).await?, &what).await?;

        let digest = header_str(&response, DOCKER_CONTENT_DIGEST);
        let size = header_str(&response, CONTENT_LENGTH.as_str()).and_then(|v| v.parse().ok());
        let media_type = header_str(&response, CONTENT_TYPE.as_str()).unwrap_or_default();
        let descriptor = match (digest, size) {
            (Some(digest), Some(size)) => Descriptor {
                media_type,
                digest,
                size,
                artifact_type: None,
                platform: None,
                annotations: Default::default(),
            },
            // registries may omit headers on HEAD; read the manifest instead
            _ => self.fetch_manifest(reference, &accept).await?.0,
        };

        if reference.contains(':') && descriptor.digest != reference {
            return Err(TargetError::Registry {
                status: StatusCode::OK,
                message: format!(
                    "{} returned digest {} for {}",
                    self.reference.registry, descriptor.digest, reference
                ),
            });
        }
        Ok(descriptor)
    }

    async fn fetch(&self, descriptor: &Descriptor) -> Result<Vec<u8>> {
        let accept = if descriptor.media_type.is_empty() {
            MANIFEST_MEDIA_TYPES.join(", ")
        } else {
            descriptor.media_type.clone()
        };
        let (fetched, body) = self.fetch_manifest(&descriptor.digest, &accept).await?;
        if fetched.digest != descriptor.digest {
            return Err(TargetError::Registry {
                status: StatusCode::OK,
                message: format!("content of {} does not match its digest", descriptor.digest),
            });
        }
        Ok(body)
    }

    async fn tags(&self) -> Result<Vec<String>> {
        let mut tags = Vec::new();
        let mut url = Some(self.url("tags/list")?);
        while let Some(next) = url.take() {
            let response = self.send(Request::new(Method::GET, next)).await?;
            let response = check_status(response, &self.reference.without_reference()).await?;
            url = next_link(&response);
            let page: TagList = response.json().await?;
            tags.extend(page.tags.unwrap_or_default());
        }
        tags.sort();
        Ok(tags)
    }
}

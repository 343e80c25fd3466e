//! Authenticated client for registry access
//!
//! [`AuthClient`] sends requests through the transport chain, answers `401`
//! challenges (Basic or Bearer) with credentials from a [`CredentialFn`], and
//! keeps what it negotiated in an [`AuthCache`] so later requests against the
//! same registry go out pre-authorized.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, WWW_AUTHENTICATE};
use reqwest::{Method, Request, Response, StatusCode, Url};
use serde::Deserialize;

use crate::credential::{Credential, CredentialFn, static_credential};
use crate::error::{Result, TargetError};
use crate::logging::Logger;
use crate::net::{Dialer, TlsPolicy};
use crate::registry::transport::{
    DebugTransport, HttpTransport, RetryPolicy, RetryTransport, Transport, TransportWrapper,
};

const DEFAULT_CLIENT_ID: &str = "artifact-target";

/// Authentication scheme announced by a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Basic,
    Bearer,
    Unknown,
}

/// Parsed `WWW-Authenticate` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: Scheme,
    pub params: HashMap<String, String>,
}

impl Challenge {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Parse `Scheme key=value, key="quoted, value"`. Parameter names are lowercased.
pub fn parse_challenge(header: &str) -> Challenge {
    let header = header.trim();
    let (scheme, rest) = header.split_once(' ').unwrap_or((header, ""));
    let scheme = match scheme.to_ascii_lowercase().as_str() {
        "basic" => Scheme::Basic,
        "bearer" => Scheme::Bearer,
        _ => Scheme::Unknown,
    };

    let mut params = HashMap::new();
    let mut chars = rest.chars().peekable();
    loop {
        while matches!(chars.peek(), Some(c) if *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() {
            break;
        }
        if chars.next() != Some('=') {
            continue;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.extend(chars.next()),
                    '"' => break,
                    c => value.push(c),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    Challenge { scheme, params }
}

/// `repository:<name>:<actions>`
pub fn repository_scope(repository: &str, actions: &[&str]) -> String {
    format!("repository:{}:{}", repository, actions.join(","))
}

// one canonical string per set of scopes, order and duplicates ignored
fn scope_key(scopes: &[String]) -> String {
    scopes
        .iter()
        .flat_map(|scope| scope.split_whitespace())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone)]
struct CacheEntry {
    scheme: Scheme,
    // scope key -> token; Basic uses the empty key
    tokens: HashMap<String, String>,
}

/// Negotiated scheme and tokens per registry host. Cloning shares the cache.
/// Concurrent negotiations for the same key resolve last-writer-wins.
#[derive(Debug, Clone, Default)]
pub struct AuthCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl AuthCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheme(&self, registry: &str) -> Option<Scheme> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries.get(registry).map(|entry| entry.scheme)
    }

    pub fn token(&self, registry: &str, scheme: Scheme, key: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        let entry = entries.get(registry)?;
        if entry.scheme != scheme {
            return None;
        }
        entry.tokens.get(key).cloned()
    }

    /// Store a token. A scheme change for the registry drops its old tokens.
    pub fn set(&self, registry: &str, scheme: Scheme, key: &str, token: String) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        let entry = entries
            .entry(registry.to_string())
            .or_insert_with(|| CacheEntry {
                scheme,
                tokens: HashMap::new(),
            });
        if entry.scheme != scheme {
            entry.scheme = scheme;
            entry.tokens.clear();
        }
        entry.tokens.insert(key.to_string(), token);
    }

    /// Header value to send up front, if anything was negotiated before
    fn authorization(&self, registry: &str, key: &str) -> Option<String> {
        match self.scheme(registry)? {
            Scheme::Basic => self
                .token(registry, Scheme::Basic, "")
                .map(|token| format!("Basic {}", token)),
            Scheme::Bearer => self
                .token(registry, Scheme::Bearer, key)
                .map(|token| format!("Bearer {}", token)),
            Scheme::Unknown => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

/// Registry client that adds custom headers and handles authentication
pub struct AuthClient {
    transport: Arc<dyn Transport>,
    headers: HeaderMap,
    credential: CredentialFn,
    cache: AuthCache,
    client_id: String,
}

impl AuthClient {
    pub fn builder() -> AuthClientBuilder {
        AuthClientBuilder::new()
    }

    pub fn cache(&self) -> &AuthCache {
        &self.cache
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Send a request needing `scopes`, answering one authentication challenge
    pub async fn send(&self, mut request: Request, scopes: &[String]) -> Result<Response> {
        self.attach_headers(&mut request);
        let registry = authority(request.url())?;
        let key = scope_key(scopes);
        if let Some(authorization) = self.cache.authorization(&registry, &key) {
            request
                .headers_mut()
                .insert(AUTHORIZATION, header_value(&authorization)?);
        }

        let retry = request.try_clone();
        let response = self.transport.round_trip(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let Some(mut retry) = retry else {
            return Ok(response);
        };
        let challenge = match response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|value| value.to_str().ok())
        {
            Some(header) => parse_challenge(header),
            None => return Ok(response),
        };

        let authorization = match challenge.scheme {
            Scheme::Basic => {
                let credential = (self.credential)(&registry)?;
                if credential.username.is_empty() && credential.password.is_empty() {
                    return Ok(response);
                }
                let token = STANDARD.encode(format!("{}:{}", credential.username, credential.password));
                self.cache.set(&registry, Scheme::Basic, "", token.clone());
                format!("Basic {}", token)
            }
            Scheme::Bearer => {
                let mut requested: Vec<String> = scopes.to_vec();
                requested.extend(challenge.param("scope").map(str::to_string));
                let token = self.fetch_token(&registry, &challenge, &requested).await?;
                self.cache.set(&registry, Scheme::Bearer, &key, token.clone());
                format!("Bearer {}", token)
            }
            Scheme::Unknown => return Ok(response),
        };

        retry
            .headers_mut()
            .insert(AUTHORIZATION, header_value(&authorization)?);
        self.transport.round_trip(retry).await
    }

    // custom headers go on registry and token requests alike
    fn attach_headers(&self, request: &mut Request) {
        for (name, value) in &self.headers {
            request.headers_mut().append(name, value.clone());
        }
    }

    async fn fetch_token(&self, registry: &str, challenge: &Challenge, scopes: &[String]) -> Result<String> {
        let realm = challenge.param("realm").ok_or_else(|| {
            TargetError::Authentication(format!("bearer challenge from {} has no realm", registry))
        })?;
        let mut url = Url::parse(realm).map_err(|e| {
            TargetError::Authentication(format!("invalid realm {:?}: {}", realm, e))
        })?;
        let service = challenge.param("service").unwrap_or_default();
        let joined = scope_key(scopes);
        let scopes: Vec<&str> = joined.split(' ').filter(|scope| !scope.is_empty()).collect();

        let credential = (self.credential)(registry)?;
        if !credential.access_token.is_empty() {
            return Ok(credential.access_token);
        }

        let mut request = if !credential.refresh_token.is_empty() {
            self.refresh_token_request(url, service, &scopes, &credential)?
        } else {
            {
                let mut query = url.query_pairs_mut();
                if !service.is_empty() {
                    query.append_pair("service", service);
                }
                for scope in &scopes {
                    query.append_pair("scope", scope);
                }
            }
            let mut request = Request::new(Method::GET, url);
            if !credential.username.is_empty() || !credential.password.is_empty() {
                let basic = STANDARD.encode(format!("{}:{}", credential.username, credential.password));
                request
                    .headers_mut()
                    .insert(AUTHORIZATION, header_value(&format!("Basic {}", basic))?);
            }
            request
        };

        self.attach_headers(&mut request);
        let response = self.transport.round_trip(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TargetError::Authentication(format!(
                "token request to {} failed with status {}",
                realm, status
            )));
        }
        let body: TokenResponse = response.json().await?;
        body.access_token
            .filter(|token| !token.is_empty())
            .or(body.token.filter(|token| !token.is_empty()))
            .ok_or_else(|| TargetError::Authentication(format!("no token returned by {}", realm)))
    }

    fn refresh_token_request(
        &self,
        url: Url,
        service: &str,
        scopes: &[&str],
        credential: &Credential,
    ) -> Result<Request> {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("refresh_token", &credential.refresh_token)
            .append_pair("service", service)
            .append_pair("client_id", &self.client_id)
            .append_pair("scope", &scopes.join(" "))
            .finish();

        let mut request = Request::new(Method::POST, url);
        request.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        *request.body_mut() = Some(form.into());
        Ok(request)
    }
}

fn authority(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| TargetError::Validation(format!("request URL {} has no host", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| TargetError::Authentication("credential is not a valid header value".to_string()))
}

/// Assembles an [`AuthClient`] from TLS policy, dial overrides, headers and credentials
pub struct AuthClientBuilder {
    tls: TlsPolicy,
    resolves: Vec<String>,
    headers: HeaderMap,
    credential: Option<CredentialFn>,
    debug: bool,
    logger: Logger,
    retry: Option<TransportWrapper>,
    cache: Option<AuthCache>,
    client_id: String,
}

impl Default for AuthClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthClientBuilder {
    pub fn new() -> Self {
        Self {
            tls: TlsPolicy::default(),
            resolves: Vec::new(),
            headers: HeaderMap::new(),
            credential: None,
            debug: false,
            logger: Logger::new(false),
            retry: None,
            cache: None,
            client_id: DEFAULT_CLIENT_ID.to_string(),
        }
    }

    pub fn with_tls(mut self, tls: TlsPolicy) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.tls.insecure = insecure;
        self
    }

    /// `host:port:address[:address_port]` overrides, parsed at build time
    pub fn with_resolves(mut self, resolves: Vec<String>) -> Self {
        self.resolves = resolves;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_credential(mut self, credential: CredentialFn) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Log every request and response through `logger`
    pub fn with_debug(mut self, debug: bool, logger: Logger) -> Self {
        self.debug = debug;
        self.logger = logger;
        self
    }

    /// Replace the default retry transport
    pub fn with_retry(mut self, retry: TransportWrapper) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Share an existing cache instead of starting empty
    pub fn with_cache(mut self, cache: AuthCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn build(self) -> Result<AuthClient> {
        let dialer = Dialer::parse(&self.resolves)?;
        let tls = self.tls.load()?;
        let base: Arc<dyn Transport> = Arc::new(HttpTransport::new(&tls, dialer)?);

        let wrap = self
            .retry
            .unwrap_or_else(|| RetryTransport::wrapper(RetryPolicy::default()));
        let mut transport = wrap(base);
        if self.debug {
            transport = Arc::new(DebugTransport::new(transport, self.logger));
        }

        Ok(AuthClient {
            transport,
            headers: self.headers,
            credential: self
                .credential
                .unwrap_or_else(|| static_credential(Credential::default())),
            cache: self.cache.unwrap_or_default(),
            client_id: self.client_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = parse_challenge(
            r#"Bearer realm="https://auth.example.com/token",service="registry.example.com",scope="repository:a/b:pull,push""#,
        );
        assert_eq!(challenge.scheme, Scheme::Bearer);
        assert_eq!(challenge.param("realm"), Some("https://auth.example.com/token"));
        assert_eq!(challenge.param("service"), Some("registry.example.com"));
        assert_eq!(challenge.param("scope"), Some("repository:a/b:pull,push"));
    }

    #[test]
    fn test_parse_basic_challenge() {
        let challenge = parse_challenge(r#"Basic realm="Registry Realm""#);
        assert_eq!(challenge.scheme, Scheme::Basic);
        assert_eq!(challenge.param("realm"), Some("Registry Realm"));
    }

    #[test]
    fn test_parse_escaped_and_unquoted_values() {
        let challenge = parse_challenge(r#"bearer Realm=plain, error="say \"hi\"""#);
        assert_eq!(challenge.scheme, Scheme::Bearer);
        assert_eq!(challenge.param("realm"), Some("plain"));
        assert_eq!(challenge.param("error"), Some(r#"say "hi""#));
    }

    #[test]
    fn test_unknown_scheme() {
        assert_eq!(parse_challenge("Negotiate").scheme, Scheme::Unknown);
    }

    #[test]
    fn test_scope_key_is_order_insensitive() {
        let a = vec![
            repository_scope("b", &["pull"]),
            repository_scope("a", &["pull", "push"]),
        ];
        let b = vec![
            repository_scope("a", &["pull", "push"]),
            repository_scope("b", &["pull"]),
            repository_scope("b", &["pull"]),
        ];
        assert_eq!(scope_key(&a), scope_key(&b));
        assert_eq!(scope_key(&a), "repository:a:pull,push repository:b:pull");
    }

    #[test]
    fn test_cache_scheme_switch_drops_tokens() {
        let cache = AuthCache::new();
        cache.set("r.example.com", Scheme::Bearer, "scope-a", "t1".to_string());
        assert_eq!(
            cache.authorization("r.example.com", "scope-a"),
            Some("Bearer t1".to_string())
        );
        assert_eq!(cache.authorization("r.example.com", "scope-b"), None);

        cache.set("r.example.com", Scheme::Basic, "", "dXNlcjpwYXNz".to_string());
        assert_eq!(cache.token("r.example.com", Scheme::Bearer, "scope-a"), None);
        assert_eq!(
            cache.authorization("r.example.com", "anything"),
            Some("Basic dXNlcjpwYXNz".to_string())
        );
    }

    #[test]
    fn test_cache_clones_share_state() {
        let cache = AuthCache::new();
        let shared = cache.clone();
        shared.set("r.example.com", Scheme::Bearer, "", "token".to_string());
        assert_eq!(cache.scheme("r.example.com"), Some(Scheme::Bearer));
    }

    #[test]
    fn test_builder_rejects_bad_resolve_entry() {
        let result = AuthClient::builder()
            .with_resolves(vec!["bad".to_string()])
            .build();
        assert!(matches!(result, Err(TargetError::Format { .. })));
    }
}

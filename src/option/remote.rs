//! Options describing how to reach a remote registry

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::credential::{self, Credential, CredentialFn};
use crate::error::{Result, TargetError};
use crate::logging::Logger;
use crate::net::{self, TlsPolicy};
use crate::option::{Common, DistributionSpec, FlagParser};
use crate::registry::{AuthClient, Reference, Registry, Repository, WarningDeduplicator, WarningHandler};

const HEADER_GRAMMAR: &str = "name:value";

#[derive(Debug, Clone, Default, clap::Args)]
pub struct RemoteOptions {
    /// Server certificate authority file for the remote registry
    #[arg(long = "ca-file", value_name = "file")]
    pub ca_file: Option<PathBuf>,

    /// Allow connections to SSL registry without certs
    #[arg(long = "insecure")]
    pub insecure: bool,

    /// Allow insecure connections to registry without SSL check
    #[arg(long = "plain-http", num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub plain_http: Option<bool>,

    /// Path of the authentication file for the registry
    #[arg(long = "registry-config", value_name = "path")]
    pub configs: Vec<PathBuf>,

    /// Registry username
    #[arg(short = 'u', long = "username", default_value = "")]
    pub username: String,

    /// Registry password or identity token
    #[arg(short = 'p', long = "password", default_value = "")]
    pub password: String,

    /// Read password or identity token from stdin
    #[arg(long = "password-stdin")]
    pub password_from_stdin: bool,

    /// Customized DNS for registry, formatted in `host:port:address[:address_port]`
    #[arg(long = "resolve", value_name = "resolve")]
    pub resolves: Vec<String>,

    /// Add custom headers to requests
    #[arg(short = 'H', long = "header", value_name = "header")]
    pub header_flags: Vec<String>,

    #[command(flatten)]
    pub distribution: DistributionSpec,

    /// Parsed `--header` values
    #[arg(skip)]
    pub headers: HeaderMap,

    #[arg(skip)]
    warnings: WarningDeduplicator,
}

impl RemoteOptions {
    /// Options for programmatic use. A `true` plain-HTTP value is enforced.
    pub fn new(plain_http: bool, username: &str, password: &str) -> Self {
        Self {
            plain_http: plain_http.then_some(true),
            username: username.to_string(),
            password: password.to_string(),
            ..Default::default()
        }
    }

    /// Share warning state with another set of options
    pub fn share_warnings(&mut self, warnings: WarningDeduplicator) {
        self.warnings = warnings;
    }

    pub fn warnings(&self) -> &WarningDeduplicator {
        &self.warnings
    }

    /// Split `name:value` header flags into a multi-value header map
    pub fn parse_custom_headers(&mut self) -> Result<()> {
        let mut headers = HeaderMap::new();
        for flag in &self.header_flags {
            let (name, value) = match flag.split_once(':') {
                Some((name, value)) if !name.trim().is_empty() => (name, value),
                _ => return Err(TargetError::format(flag, HEADER_GRAMMAR)),
            };
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| TargetError::format(flag, "a valid header name"))?;
            let value = HeaderValue::from_str(value.trim_start())
                .map_err(|_| TargetError::format(flag, "a valid header value"))?;
            headers.append(name, value);
        }
        self.headers = headers;
        Ok(())
    }

    /// Read the password from `reader` when requested; warn when it came from the command line
    pub fn read_password<R: Read>(&mut self, mut reader: R, logger: &Logger) -> Result<()> {
        if !self.password.is_empty() {
            logger.warning("Using --password via the CLI is insecure. Use --password-stdin.");
        } else if self.password_from_stdin {
            let mut password = String::new();
            reader.read_to_string(&mut password)?;
            let password = password.strip_suffix('\n').unwrap_or(&password);
            let password = password.strip_suffix('\r').unwrap_or(password);
            self.password = password.to_string();
        }
        Ok(())
    }

    pub fn credential(&self) -> Credential {
        if self.username.is_empty() && self.password.is_empty() {
            return Credential::default();
        }
        Credential::from_input(&self.username, &self.password)
    }

    /// Static credential when one was given, otherwise the configured stores
    pub fn credential_fn(&self) -> Result<CredentialFn> {
        credential::resolve(&self.username, &self.password, &self.configs)
    }

    pub fn is_plain_http(&self, registry: &str) -> bool {
        let enforced = self.plain_http.is_some();
        net::is_plain_http(registry, self.plain_http.unwrap_or(false), enforced)
    }

    pub fn tls_policy(&self) -> TlsPolicy {
        TlsPolicy::new(self.insecure).with_ca_file(self.ca_file.clone())
    }

    /// Assemble the authenticated client for these options
    pub fn auth_client(&self, debug: bool, logger: &Logger) -> Result<AuthClient> {
        AuthClient::builder()
            .with_tls(self.tls_policy())
            .with_resolves(self.resolves.clone())
            .with_headers(self.headers.clone())
            .with_credential(self.credential_fn()?)
            .with_debug(debug, logger.clone())
            .build()
    }

    pub fn warning_handler(&self, registry: &str, logger: &Logger) -> WarningHandler {
        self.warnings.handler_for(registry, logger.clone())
    }

    pub fn new_registry(&self, registry: &str, common: &Common, logger: &Logger) -> Result<Registry> {
        let reference = Reference::parse_registry(registry)?;
        let client = Arc::new(self.auth_client(common.debug, logger)?);
        let mut handle = Registry::new(reference, client);
        handle.plain_http = self.is_plain_http(&handle.reference.registry);
        handle.warning_handler = Some(self.warning_handler(&handle.reference.registry, logger));
        Ok(handle)
    }

    pub fn new_repository(&self, reference: &str, common: &Common, logger: &Logger) -> Result<Repository> {
        let reference = Reference::parse(reference)?;
        let client = Arc::new(self.auth_client(common.debug, logger)?);
        let mut repository = Repository::new(reference, client);
        let registry = repository.reference.registry.clone();
        repository.plain_http = self.is_plain_http(&registry);
        repository.warning_handler = Some(self.warning_handler(&registry, logger));
        repository.skip_referrers_gc = true;
        self.distribution.preference.apply(&repository)?;
        Ok(repository)
    }
}

impl FlagParser for RemoteOptions {
    fn parse(&mut self, logger: &Logger) -> Result<()> {
        self.parse_custom_headers()?;
        self.read_password(std::io::stdin(), logger)?;
        self.distribution.parse(logger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{Level, MemorySink};

    fn with_headers(flags: &[&str]) -> RemoteOptions {
        RemoteOptions {
            header_flags: flags.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_repeated_headers_accumulate() {
        let mut opts = with_headers(&["X-Foo:bar", "X-Foo: baz", "X-Other:1"]);
        opts.parse_custom_headers().unwrap();
        let values: Vec<_> = opts
            .headers
            .get_all("x-foo")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(values, vec!["bar", "baz"]);
        assert_eq!(opts.headers.get("x-other").unwrap(), "1");
    }

    #[test]
    fn test_malformed_headers() {
        for flag in [":value", "no-colon", "  :value", "bad name:value"] {
            let mut opts = with_headers(&[flag]);
            let err = opts.parse_custom_headers().unwrap_err();
            assert!(
                matches!(&err, TargetError::Format { input, .. } if input == flag),
                "{flag}: {err:?}"
            );
        }
    }

    #[test]
    fn test_password_from_reader() {
        let mut opts = RemoteOptions {
            password_from_stdin: true,
            ..Default::default()
        };
        opts.read_password("s3cret\r\n".as_bytes(), &Logger::new_quiet())
            .unwrap();
        assert_eq!(opts.password, "s3cret");
    }

    #[test]
    fn test_cli_password_warns() {
        let sink = MemorySink::new();
        let logger = Logger::with_sink(false, sink.clone());
        let mut opts = RemoteOptions::new(false, "alice", "secret");
        opts.read_password("ignored".as_bytes(), &logger).unwrap();
        assert_eq!(opts.password, "secret");
        assert_eq!(
            sink.messages(Level::Warning),
            vec!["Using --password via the CLI is insecure. Use --password-stdin.".to_string()]
        );
    }

    #[test]
    fn test_plain_http_enforcement() {
        let opts = RemoteOptions::default();
        assert!(opts.is_plain_http("localhost:5000"));
        assert!(!opts.is_plain_http("registry.example.com"));

        let forced_off = RemoteOptions {
            plain_http: Some(false),
            ..Default::default()
        };
        assert!(!forced_off.is_plain_http("localhost:5000"));
        assert!(RemoteOptions::new(true, "", "").is_plain_http("registry.example.com"));
    }

    #[test]
    fn test_credential_selection() {
        assert!(RemoteOptions::default().credential().is_empty());
        let token = RemoteOptions::new(false, "", "refresh").credential();
        assert_eq!(token.refresh_token, "refresh");
    }

    #[test]
    fn test_new_repository_applies_settings() {
        let mut opts = RemoteOptions::new(false, "alice", "secret");
        opts.distribution = DistributionSpec::new("v1.1-referrers-api");
        opts.distribution.parse(&Logger::new_quiet()).unwrap();

        let repo = opts
            .new_repository("localhost:5000/team/app:v1", &Common::default(), &Logger::new_quiet())
            .unwrap();
        assert!(repo.plain_http);
        assert!(repo.skip_referrers_gc);
        assert!(repo.warning_handler.is_some());
        assert_eq!(repo.referrers_capability(), Some(true));
    }
}

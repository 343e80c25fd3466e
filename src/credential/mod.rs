//! Credential resolution
//!
//! Decides where credentials for a registry come from: a static pair given on
//! the command line, or a chain of docker-style config files consulted in order.

pub mod store;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;

pub use store::{CredentialStore, FileStore, MemoryStore, StoreChain, StoreOptions};

/// Registry credential. Either a username/password pair or a refresh token;
/// `access_token` is only ever filled from a credential store.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
    pub refresh_token: String,
    pub access_token: String,
}

impl Credential {
    /// Credential from user input. Without a username the password is a refresh token.
    pub fn from_input(username: &str, password: &str) -> Self {
        if username.is_empty() {
            Credential {
                refresh_token: password.to_string(),
                ..Default::default()
            }
        } else {
            Credential {
                username: username.to_string(),
                password: password.to_string(),
                ..Default::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Credential::default()
    }
}

// secrets never reach a log line through Debug
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |value: &str| if value.is_empty() { "" } else { "*****" };
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &mask(&self.password))
            .field("refresh_token", &mask(&self.refresh_token))
            .field("access_token", &mask(&self.access_token))
            .finish()
    }
}

/// Looks up the credential for a registry host (`host[:port]`)
pub type CredentialFn = Arc<dyn Fn(&str) -> Result<Credential> + Send + Sync>;

/// Credential function that ignores the registry and always yields `credential`
pub fn static_credential(credential: Credential) -> CredentialFn {
    Arc::new(move |_registry: &str| Ok(credential.clone()))
}

/// Credential function backed by a store
pub fn store_credential(store: Arc<dyn CredentialStore>) -> CredentialFn {
    Arc::new(move |registry: &str| store.get(registry))
}

/// Build the credential lookup for a remote.
///
/// A non-empty username or password wins and `config_paths` is ignored.
/// Otherwise every path becomes a store in the chain, or the default docker
/// config when no path is given. Any store that fails to open fails the whole
/// construction.
pub fn resolve(username: &str, password: &str, config_paths: &[PathBuf]) -> Result<CredentialFn> {
    if !username.is_empty() || !password.is_empty() {
        return Ok(static_credential(Credential::from_input(username, password)));
    }
    let store = new_store(config_paths)?;
    Ok(store_credential(store))
}

/// Open the store chain for the given config paths
pub fn new_store(config_paths: &[PathBuf]) -> Result<Arc<dyn CredentialStore>> {
    open_chain(config_paths, store::default_config_path)
}

fn open_chain(
    config_paths: &[PathBuf],
    default_path: impl FnOnce() -> Result<PathBuf>,
) -> Result<Arc<dyn CredentialStore>> {
    let options = StoreOptions {
        allow_plaintext_put: true,
    };
    if config_paths.is_empty() {
        return Ok(Arc::new(FileStore::open(default_path()?, options)?));
    }

    let mut stores: Vec<Box<dyn CredentialStore>> = Vec::with_capacity(config_paths.len());
    for path in config_paths {
        stores.push(Box::new(FileStore::open(path, options)?));
    }
    Ok(Arc::new(StoreChain::new(stores)))
}

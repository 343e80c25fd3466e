//! File-backed credential stores
//!
//! Reads and writes the `auths` section of docker-style `config.json` files.
//! Native credential helpers (`credsStore`, `credHelpers`) are not consulted.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::Credential;
use crate::error::{Result, TargetError};

const DOCKER_HUB_HOST: &str = "docker.io";
const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";
const DOCKER_HUB_AUTH_KEY: &str = "https://index.docker.io/v1/";
const CONFIG_FILE_NAME: &str = "config.json";

/// Read and write access to registry credentials
pub trait CredentialStore: Send + Sync {
    /// Credential for `server_address`; an empty credential when nothing is stored
    fn get(&self, server_address: &str) -> Result<Credential>;

    fn put(&self, server_address: &str, credential: &Credential) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Permit writing credentials unencrypted into the config file
    pub allow_plaintext_put: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AuthEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    auth: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    password: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    identitytoken: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    registrytoken: String,
}

/// Credential store over a single docker config file
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    options: StoreOptions,
    // whole document is kept so unrelated keys survive a put
    config: RwLock<Map<String, Value>>,
}

impl FileStore {
    /// Open `path`. A missing file is an empty store; an unreadable or
    /// malformed one is an error naming the path.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let config = match std::fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Map::new(),
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(TargetError::credential_store(
                        &path,
                        "config is not a JSON object",
                    ));
                }
                Err(e) => {
                    return Err(TargetError::credential_store(
                        &path,
                        format!("invalid JSON: {}", e),
                    ));
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(TargetError::credential_store(&path, e.to_string())),
        };

        Ok(Self {
            path,
            options,
            config: RwLock::new(config),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entry_for(&self, server_address: &str) -> Result<Option<AuthEntry>> {
        let config = self
            .config
            .read()
            .map_err(|_| TargetError::credential_store(&self.path, "config lock poisoned"))?;
        let Some(Value::Object(auths)) = config.get("auths") else {
            return Ok(None);
        };

        let key = auth_key(server_address);
        let value = auths.get(key).or_else(|| {
            auths
                .iter()
                .find(|(candidate, _)| normalize_host(candidate) == server_address)
                .map(|(_, value)| value)
        });
        match value {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| {
                    TargetError::credential_store(
                        &self.path,
                        format!("invalid auth entry for {}: {}", server_address, e),
                    )
                }),
            None => Ok(None),
        }
    }

    fn save(&self, config: &Map<String, Value>) -> Result<()> {
        let store_err = |e: std::io::Error| TargetError::credential_store(&self.path, e.to_string());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(store_err)?;
            }
        }
        let data = serde_json::to_vec_pretty(config)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        std::fs::write(&tmp, data).map_err(store_err)?;
        std::fs::rename(&tmp, &self.path).map_err(store_err)
    }
}

impl CredentialStore for FileStore {
    fn get(&self, server_address: &str) -> Result<Credential> {
        let Some(entry) = self.entry_for(server_address)? else {
            return Ok(Credential::default());
        };

        let mut credential = Credential {
            username: entry.username,
            password: entry.password,
            refresh_token: entry.identitytoken,
            access_token: entry.registrytoken,
        };
        if !entry.auth.is_empty() {
            let decoded = STANDARD.decode(entry.auth.trim()).map_err(|e| {
                TargetError::credential_store(
                    &self.path,
                    format!("invalid auth for {}: {}", server_address, e),
                )
            })?;
            let decoded = String::from_utf8(decoded).map_err(|e| {
                TargetError::credential_store(
                    &self.path,
                    format!("invalid auth for {}: {}", server_address, e),
                )
            })?;
            let (username, password) = decoded.split_once(':').ok_or_else(|| {
                TargetError::credential_store(
                    &self.path,
                    format!("invalid auth for {}: missing ':' separator", server_address),
                )
            })?;
            credential.username = username.to_string();
            credential.password = password.to_string();
        }
        Ok(credential)
    }

    fn put(&self, server_address: &str, credential: &Credential) -> Result<()> {
        if !self.options.allow_plaintext_put {
            return Err(TargetError::credential_store(
                &self.path,
                "putting plaintext credentials is disabled",
            ));
        }

        let entry = AuthEntry {
            auth: if credential.username.is_empty() {
                String::new()
            } else {
                STANDARD.encode(format!("{}:{}", credential.username, credential.password))
            },
            identitytoken: credential.refresh_token.clone(),
            registrytoken: credential.access_token.clone(),
            ..Default::default()
        };

        let mut config = self
            .config
            .write()
            .map_err(|_| TargetError::credential_store(&self.path, "config lock poisoned"))?;
        let auths = config
            .entry("auths")
            .or_insert_with(|| Value::Object(Map::new()));
        if !auths.is_object() {
            *auths = Value::Object(Map::new());
        }
        if let Value::Object(auths) = auths {
            auths.insert(auth_key(server_address).to_string(), serde_json::to_value(entry)?);
        }
        self.save(&config)
    }
}

/// Stores consulted in order; the first non-empty credential wins
pub struct StoreChain {
    stores: Vec<Box<dyn CredentialStore>>,
}

impl StoreChain {
    pub fn new(stores: Vec<Box<dyn CredentialStore>>) -> Self {
        Self { stores }
    }
}

impl CredentialStore for StoreChain {
    fn get(&self, server_address: &str) -> Result<Credential> {
        for store in &self.stores {
            let credential = store.get(server_address)?;
            if !credential.is_empty() {
                return Ok(credential);
            }
        }
        Ok(Credential::default())
    }

    /// Writes go to the first store only
    fn put(&self, server_address: &str, credential: &Credential) -> Result<()> {
        match self.stores.first() {
            Some(store) => store.put(server_address, credential),
            None => Err(TargetError::Configuration(
                "credential store chain is empty".to_string(),
            )),
        }
    }
}

/// `$DOCKER_CONFIG/config.json`, else `~/.docker/config.json`
pub fn default_config_path() -> Result<PathBuf> {
    config_path_from(std::env::var_os("DOCKER_CONFIG"), dirs::home_dir())
}

/// Login config location for a given `DOCKER_CONFIG` value and home directory
pub fn config_path_from(docker_config: Option<OsString>, home: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = docker_config.filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir).join(CONFIG_FILE_NAME));
    }
    let home = home.ok_or_else(|| {
        TargetError::credential_store(
            PathBuf::from("~/.docker").join(CONFIG_FILE_NAME),
            "cannot determine home directory",
        )
    })?;
    Ok(home.join(".docker").join(CONFIG_FILE_NAME))
}

fn auth_key(server_address: &str) -> &str {
    if server_address == DOCKER_HUB_HOST || server_address == DOCKER_HUB_API_HOST {
        DOCKER_HUB_AUTH_KEY
    } else {
        server_address
    }
}

// legacy keys carry a scheme and a path: "https://registry.example.com/v1/"
fn normalize_host(key: &str) -> &str {
    let without_scheme = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    without_scheme
        .split_once('/')
        .map_or(without_scheme, |(host, _)| host)
}

/// Credentials stored per server in a fixed map; used where no file should be touched
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Credential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, server_address: &str) -> Result<Credential> {
        let entries = self
            .entries
            .read()
            .map_err(|_| TargetError::Configuration("credential store lock poisoned".to_string()))?;
        Ok(entries.get(server_address).cloned().unwrap_or_default())
    }

    fn put(&self, server_address: &str, credential: &Credential) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| TargetError::Configuration("credential store lock poisoned".to_string()))?;
        entries.insert(server_address.to_string(), credential.clone());
        Ok(())
    }
}

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::document::{self, ConfigError};

/// The registry credentials document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthFile {
    #[serde(default)]
    pub auths: BTreeMap<String, Credentials>,
}

/// A username/password pair for one registry.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl AuthFile {
    /// Read the credentials document. A missing file holds no credentials.
    ///
    /// # Errors
    /// Returns an error if the file exists but does not match the schema.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        document::load_or_default(path)
    }

    /// Credentials for `registry`, if any were declared.
    pub fn for_registry(&self, registry: &str) -> Option<&Credentials> {
        self.auths.get(registry)
    }
}

/// OpenStack secrets used by object-storage deployments.
#[derive(Clone, Deserialize)]
pub struct OsSecrets {
    pub os_username: String,
    pub os_password: String,
    pub os_project_name: String,
    pub os_auth_url: String,
}

impl fmt::Debug for OsSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsSecrets")
            .field("os_username", &self.os_username)
            .field("os_password", &"<redacted>")
            .field("os_project_name", &self.os_project_name)
            .field("os_auth_url", &self.os_auth_url)
            .finish()
    }
}

impl OsSecrets {
    /// Read a secrets document. All four fields are required.
    ///
    /// # Errors
    /// Returns an error if the file is missing or does not match the schema.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        document::load(path)
    }

    /// Environment variables understood by the `swift` client.
    pub fn client_env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("OS_USERNAME".to_owned(), self.os_username.clone()),
            ("OS_PASSWORD".to_owned(), self.os_password.clone()),
            ("OS_PROJECT_NAME".to_owned(), self.os_project_name.clone()),
            ("OS_AUTH_URL".to_owned(), self.os_auth_url.clone()),
            ("OS_AUTH_VERSION".to_owned(), "3".to_owned()),
        ])
    }
}

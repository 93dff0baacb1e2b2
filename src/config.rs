//! Configuration manager for ldapsense.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Directory operations a single action may chain.
const MAX_OPERATIONS_PER_ACTION: u32 = 5;
/// Left to the HTTP layer above the directory deadlines.
const REQUEST_MARGIN: Duration = Duration::from_secs(5);

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Listening address.
    pub address: String,
    /// Listening port.
    pub port: u16,
    #[serde(skip_deserializing)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Directory client settings.
    pub ldap: Ldap,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            address: "0.0.0.0".to_owned(),
            port: DEFAULT_PORT,
            version: VERSION.to_owned(),
            path: PathBuf::new(),
            ldap: Ldap::default(),
        }
    }
}

/// Directory client configuration.
///
/// Durations are expressed in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ldap {
    /// Maximum time to establish the TCP (and TLS) connection.
    pub connect_timeout: u64,
    /// Deadline applied to every bind and search operation.
    pub operation_timeout: u64,
    /// Page size used when the directory configuration enables pagination.
    pub page_size: i32,
    /// Skip TLS certificate verification for `ldaps://` servers.
    pub no_tls_verify: bool,
}

impl Default for Ldap {
    fn default() -> Self {
        Self {
            connect_timeout: 5,
            operation_timeout: 10,
            page_size: 100,
            no_tls_verify: false,
        }
    }
}

impl Ldap {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout.max(1))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout.max(1))
    }

    /// HTTP budget for one action.
    ///
    /// Test-attributes is the longest action: bind, user search, test user
    /// bind, bind, group search. Every one of them may use its own deadline
    /// before a classified error is returned.
    pub fn request_timeout(&self) -> Duration {
        self.connect_timeout() + self.operation_timeout() * MAX_OPERATIONS_PER_ACTION + REQUEST_MARGIN
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Application version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Arc<Self> {
        let file_path = if self.path.is_file() {
            self.path.clone()
        } else {
            Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let mut config = match File::open(&file_path) {
            Ok(file) => match serde_yaml::from_reader::<_, Configuration>(file) {
                Ok(config) => config,
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        };

        // set app version.
        config.version = VERSION.to_owned();
        config.path = file_path;

        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            config.port = port;
        }

        Arc::new(config)
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, path = ?self.path, "cannot load configuration file, using defaults");
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config: Configuration = serde_yaml::from_str(
            r#"
name: directory-checker
ldap:
  operation_timeout: 3
"#,
        )
        .unwrap();

        assert_eq!(config.name, "directory-checker");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.ldap.operation_timeout(), Duration::from_secs(3));
        assert_eq!(config.ldap.page_size, 100);
    }

    #[test]
    fn test_zero_timeout_is_never_unlimited() {
        let ldap = Ldap {
            operation_timeout: 0,
            ..Default::default()
        };
        assert_eq!(ldap.operation_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_request_timeout_covers_every_operation() {
        let ldap = Ldap {
            connect_timeout: 2,
            operation_timeout: 10,
            ..Default::default()
        };

        // connect, then five operations each waiting out their deadline.
        assert!(ldap.request_timeout() > ldap.connect_timeout() + ldap.operation_timeout() * 5);
        assert_eq!(ldap.request_timeout(), Duration::from_secs(57));
    }
}

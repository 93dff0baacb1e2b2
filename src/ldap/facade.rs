//! Entry point for the three LDAP configuration actions.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::{Result, ServerError};
use crate::ldap::configuration::LdapConfiguration;
use crate::ldap::connection::{DirectoryConnection, LdapConnector};
use crate::ldap::detection::{AttributeDetectionService, DetectionOutcome, DetectionWarning};
use crate::ldap::validator::ConfigurationValidator;

/// Mandatory test user name parameter.
pub const TEST_USER_NAME: &str = "ldap.test.user.name";
/// Optional test user password parameter.
pub const TEST_USER_PASSWORD: &str = "ldap.test.user.password";

/// Actions supported by the validation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LdapAction {
    TestConnection,
    TestAttributes,
    DetectAttributes,
}

impl LdapAction {
    pub fn as_str(self) -> &'static str {
        match self {
            LdapAction::TestConnection => "test-connection",
            LdapAction::TestAttributes => "test-attributes",
            LdapAction::DetectAttributes => "detect-attributes",
        }
    }
}

impl FromStr for LdapAction {
    type Err = ServerError;

    fn from_str(action: &str) -> Result<Self> {
        match action {
            "test-connection" => Ok(LdapAction::TestConnection),
            "test-attributes" => Ok(LdapAction::TestAttributes),
            "detect-attributes" => Ok(LdapAction::DetectAttributes),
            _ => Err(ServerError::UnsupportedAction(action.to_owned())),
        }
    }
}

/// Request parameters of an action.
pub type Parameters = HashMap<String, String>;

/// Operations exposed to the HTTP layer.
#[async_trait]
pub trait LdapFacade: Send + Sync {
    /// Bind with the configuration and make sure the server answers.
    async fn check_connection(&self, config: &LdapConfiguration) -> Result<()>;

    /// Look up the test user, then return the names of its groups.
    async fn check_ldap_attributes(
        &self,
        parameters: &Parameters,
        config: &LdapConfiguration,
    ) -> Result<BTreeSet<String>>;

    /// Guess user and group attributes. Never fails on directory errors.
    async fn detect_attributes(&self, config: &LdapConfiguration) -> Result<DetectionOutcome>;
}

/// [`LdapFacade`] opening one connection per action.
#[derive(Debug, Clone)]
pub struct DefaultLdapFacade<C> {
    connector: C,
    validator: ConfigurationValidator,
    detection: AttributeDetectionService,
}

impl<C: LdapConnector> DefaultLdapFacade<C> {
    /// Create a new [`DefaultLdapFacade`].
    pub fn new(connector: C, time_limit: Duration) -> Self {
        Self {
            connector,
            validator: ConfigurationValidator::new(time_limit),
            detection: AttributeDetectionService::new(time_limit),
        }
    }

    /// Release a connection, logging failures.
    async fn release(connection: &mut C::Connection) {
        tracing::debug!("housekeeping: closing the ldap connection");
        if let Err(err) = connection.close().await {
            tracing::error!(error = %err, "exception occurred while closing the connection");
        }
    }
}

fn record<T>(action: LdapAction, started: Instant, result: &Result<T>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(err) if err.is_request_error() => "rejected",
        Err(_) => "failure",
    };
    let labels = [("action", action.as_str()), ("outcome", outcome)];

    metrics::counter!("ldap_operations_total", &labels).increment(1);
    metrics::histogram!("ldap_operation_duration_seconds", &labels)
        .record(started.elapsed().as_secs_f64());
}

fn parameter<'a>(parameters: &'a Parameters, key: &str) -> Option<&'a str> {
    let value = parameters.get(key).map(String::as_str);
    if value.is_none() {
        tracing::warn!(parameter = key, "parameter is missing from parameters");
    }
    value
}

#[async_trait]
impl<C: LdapConnector> LdapFacade for DefaultLdapFacade<C> {
    async fn check_connection(&self, config: &LdapConfiguration) -> Result<()> {
        tracing::info!(?config, "validating ldap connection related configuration");
        let started = Instant::now();

        let result = async {
            let mut connection = self.connector.connect(config).await?;
            let result = self.validator.check_connection(&mut connection, config).await;
            Self::release(&mut connection).await;
            result
        }
        .await;

        record(LdapAction::TestConnection, started, &result);
        match &result {
            Ok(()) => tracing::info!("validating ldap connection related configuration: SUCCESS"),
            Err(err) => tracing::error!(error = %err, "validating ldap connection configuration failed"),
        }
        result
    }

    async fn check_ldap_attributes(
        &self,
        parameters: &Parameters,
        config: &LdapConfiguration,
    ) -> Result<BTreeSet<String>> {
        let username = parameter(parameters, TEST_USER_NAME)
            .filter(|name| !name.trim().is_empty())
            .ok_or(ServerError::MissingTestUser)?;
        let password = parameter(parameters, TEST_USER_PASSWORD);

        tracing::info!(username, "testing ldap attributes with test user");
        let started = Instant::now();

        let result = async {
            let mut connection = self.connector.connect(config).await?;
            let result = async {
                let user_dn = self
                    .validator
                    .check_user_attributes(&mut connection, username, password, config)
                    .await?;
                self.validator
                    .check_group_attributes(&mut connection, &user_dn, config)
                    .await
            }
            .await;
            Self::release(&mut connection).await;
            result
        }
        .await;

        record(LdapAction::TestAttributes, started, &result);
        result
    }

    async fn detect_attributes(&self, config: &LdapConfiguration) -> Result<DetectionOutcome> {
        tracing::info!("detecting ldap configuration attributes");
        let started = Instant::now();

        let mut connection = match self.connector.connect(config).await {
            Ok(connection) => connection,
            Err(err) => {
                tracing::error!(error = %err, "cannot open connection for attribute detection");
                let result = Ok(DetectionOutcome {
                    configuration: config.clone(),
                    warnings: vec![DetectionWarning::Search {
                        details: err.to_string(),
                    }],
                });
                record(LdapAction::DetectAttributes, started, &result);
                return result;
            },
        };

        let users = self
            .detection
            .detect_user_attributes(&mut connection, config)
            .await;
        let groups = self
            .detection
            .detect_group_attributes(&mut connection, &users.configuration)
            .await;
        Self::release(&mut connection).await;

        let mut warnings = users.warnings;
        warnings.extend(groups.warnings);

        let result = Ok(DetectionOutcome {
            configuration: groups.configuration,
            warnings,
        });
        record(LdapAction::DetectAttributes, started, &result);
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::ldap::configuration::LdapConfigKey;
    use crate::ldap::connection::{Credentials, SearchSink};
    use crate::ldap::entry::{DirectoryEntry, SearchRequest, SearchResponse};

    /// In-memory connection replaying canned responses.
    #[derive(Debug, Default, Clone)]
    pub struct MockConnection {
        /// Responses of every search, in order.
        pub entries: Vec<SearchResponse>,
        /// Responses of the n-th search, overriding `entries`.
        pub per_search: Vec<Vec<SearchResponse>>,
        pub fail_bind: bool,
        pub fail_search_after: Option<usize>,
        pub disconnected: bool,
        pub binds: Vec<Credentials>,
        pub searches: Vec<SearchRequest>,
        pub delivered: usize,
        pub closed: bool,
    }

    fn io_error(message: &str) -> ldap3::LdapError {
        ldap3::LdapError::Io {
            source: std::io::Error::other(message.to_owned()),
        }
    }

    #[async_trait]
    impl DirectoryConnection for MockConnection {
        async fn bind(&mut self, credentials: &Credentials) -> Result<()> {
            self.binds.push(credentials.clone());
            if self.fail_bind {
                return Err(ServerError::connection("ldap bind failed", io_error("invalid credentials")));
            }
            Ok(())
        }

        fn is_connected(&mut self) -> bool {
            !self.disconnected && !self.closed
        }

        async fn search(
            &mut self,
            request: &SearchRequest,
            sink: &mut SearchSink<'_>,
        ) -> Result<()> {
            let responses = self
                .per_search
                .get(self.searches.len())
                .cloned()
                .unwrap_or_else(|| self.entries.clone());
            self.searches.push(request.clone());

            for (index, response) in responses.into_iter().enumerate() {
                if self.fail_search_after == Some(index) {
                    return Err(io_error("connection reset").into());
                }
                self.delivered += 1;
                if sink(response).is_break() {
                    return Ok(());
                }
            }
            if self.fail_search_after.is_some() {
                return Err(io_error("connection reset").into());
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    /// Hands out clones of a template and keeps every connection it opened.
    #[derive(Debug, Default, Clone)]
    pub struct MockConnector {
        pub template: MockConnection,
        pub fail_connect: bool,
        pub opened: Arc<Mutex<Vec<Arc<Mutex<MockConnection>>>>>,
    }

    /// Connection shared with the connector, for inspection after the fact.
    #[derive(Debug)]
    pub struct SharedConnection(Arc<Mutex<MockConnection>>);

    #[async_trait]
    impl DirectoryConnection for SharedConnection {
        async fn bind(&mut self, credentials: &Credentials) -> Result<()> {
            let mut inner = self.0.lock().unwrap().clone();
            let result = inner.bind(credentials).await;
            *self.0.lock().unwrap() = inner;
            result
        }

        fn is_connected(&mut self) -> bool {
            self.0.lock().unwrap().is_connected()
        }

        async fn search(
            &mut self,
            request: &SearchRequest,
            sink: &mut SearchSink<'_>,
        ) -> Result<()> {
            let mut inner = self.0.lock().unwrap().clone();
            let result = inner.search(request, sink).await;
            *self.0.lock().unwrap() = inner;
            result
        }

        async fn close(&mut self) -> Result<()> {
            self.0.lock().unwrap().closed = true;
            Ok(())
        }
    }

    #[async_trait]
    impl LdapConnector for MockConnector {
        type Connection = SharedConnection;

        async fn connect(&self, _config: &LdapConfiguration) -> Result<SharedConnection> {
            if self.fail_connect {
                return Err(ServerError::connection(
                    "could not connect to the LDAP server",
                    io_error("connection refused"),
                ));
            }
            let connection = Arc::new(Mutex::new(self.template.clone()));
            self.opened.lock().unwrap().push(Arc::clone(&connection));
            Ok(SharedConnection(connection))
        }
    }

    impl MockConnector {
        pub fn connections(&self) -> Vec<MockConnection> {
            self.opened
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.lock().unwrap().clone())
                .collect()
        }
    }

    /// `n` inetOrgPerson entries, `uid=user<i>`.
    pub fn people(n: usize) -> Vec<SearchResponse> {
        (0..n)
            .map(|i| {
                let uid = format!("user{i}");
                SearchResponse::Entry(
                    DirectoryEntry::new(format!("uid={uid},ou=people,dc=example,dc=com"))
                        .with_attribute("uid", [uid.clone()])
                        .with_attribute("cn", [uid])
                        .with_attribute("objectClass", ["top", "person", "inetOrgPerson"]),
                )
            })
            .collect()
    }

    /// Configuration matching the public `ldap.forumsys.com` test directory.
    pub fn einstein_config() -> LdapConfiguration {
        [
            (LdapConfigKey::ServerHost, "ldap.forumsys.com"),
            (LdapConfigKey::ServerPort, "389"),
            (LdapConfigKey::BindDn, "cn=read-only-admin,dc=example,dc=com"),
            (LdapConfigKey::BindPassword, "password"),
            (LdapConfigKey::DnAttribute, "dn"),
            (LdapConfigKey::UserObjectClass, "person"),
            (LdapConfigKey::UserNameAttribute, "uid"),
            (LdapConfigKey::UserSearchBase, "dc=example,dc=com"),
            (LdapConfigKey::GroupObjectClass, "groupOfUniqueNames"),
            (LdapConfigKey::GroupMemberAttribute, "uniqueMember"),
            (LdapConfigKey::GroupNameAttribute, "cn"),
            (LdapConfigKey::GroupSearchBase, "ou=groups,dc=example,dc=com"),
        ]
        .into_iter()
        .map(|(k, v)| (k.key(), v))
        .collect()
    }

    fn facade(connector: MockConnector) -> DefaultLdapFacade<MockConnector> {
        DefaultLdapFacade::new(connector, Duration::from_secs(5))
    }

    fn einstein() -> SearchResponse {
        SearchResponse::Entry(
            DirectoryEntry::new("uid=einstein,dc=example,dc=com")
                .with_attribute("uid", ["einstein"])
                .with_attribute("objectClass", ["person", "inetOrgPerson"]),
        )
    }

    fn scientists() -> SearchResponse {
        SearchResponse::Entry(
            DirectoryEntry::new("ou=scientists,dc=example,dc=com")
                .with_attribute("cn", ["scientists"])
                .with_attribute("uniqueMember", ["uid=einstein,dc=example,dc=com"]),
        )
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!(
            "test-connection".parse::<LdapAction>().unwrap(),
            LdapAction::TestConnection
        );
        assert_eq!(
            "detect-attributes".parse::<LdapAction>().unwrap(),
            LdapAction::DetectAttributes
        );
        assert!(matches!(
            "frobnicate".parse::<LdapAction>(),
            Err(ServerError::UnsupportedAction(action)) if action == "frobnicate"
        ));
    }

    #[tokio::test]
    async fn test_check_connection_closes_connection() {
        let connector = MockConnector::default();
        facade(connector.clone())
            .check_connection(&einstein_config())
            .await
            .unwrap();

        let connections = connector.connections();
        assert_eq!(connections.len(), 1);
        assert!(connections[0].closed);
    }

    #[tokio::test]
    async fn test_check_connection_failure_still_closes() {
        let connector = MockConnector {
            template: MockConnection {
                fail_bind: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = facade(connector.clone())
            .check_connection(&einstein_config())
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::Connection { .. }));
        assert!(connector.connections()[0].closed);
    }

    #[tokio::test]
    async fn test_check_ldap_attributes_returns_groups() {
        let connector = MockConnector {
            template: MockConnection {
                per_search: vec![vec![einstein()], vec![scientists()]],
                ..Default::default()
            },
            ..Default::default()
        };
        let parameters = Parameters::from([(TEST_USER_NAME.to_owned(), "einstein".to_owned())]);

        let groups = facade(connector.clone())
            .check_ldap_attributes(&parameters, &einstein_config())
            .await
            .unwrap();

        assert_eq!(groups, BTreeSet::from(["scientists".to_owned()]));

        let connection = &connector.connections()[0];
        assert!(connection.closed);
        assert_eq!(
            connection.searches[1].filter,
            "(&(objectClass=groupOfUniqueNames)(uniqueMember=uid=einstein,dc=example,dc=com))"
        );
    }

    #[tokio::test]
    async fn test_check_ldap_attributes_requires_test_user() {
        let connector = MockConnector::default();
        let err = facade(connector.clone())
            .check_ldap_attributes(&Parameters::new(), &einstein_config())
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::MissingTestUser));
        assert!(connector.connections().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_user_closes_connection() {
        let connector = MockConnector::default();
        let parameters = Parameters::from([(TEST_USER_NAME.to_owned(), "nobody".to_owned())]);

        let err = facade(connector.clone())
            .check_ldap_attributes(&parameters, &einstein_config())
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::Attributes { .. }));
        assert!(connector.connections()[0].closed);
    }

    #[tokio::test]
    async fn test_detect_attributes_reuses_one_connection() {
        let group = SearchResponse::Entry(
            DirectoryEntry::new("cn=admins,ou=groups,dc=example,dc=com")
                .with_attribute("cn", ["admins"])
                .with_attribute("objectClass", ["top", "posixGroup"])
                .with_attribute("memberUid", ["user0"]),
        );
        let connector = MockConnector {
            template: MockConnection {
                per_search: vec![people(4), vec![group]],
                ..Default::default()
            },
            ..Default::default()
        };

        let outcome = facade(connector.clone())
            .detect_attributes(&einstein_config())
            .await
            .unwrap();

        assert!(outcome.is_complete());
        let config = outcome.configuration;
        assert_eq!(config.user_name_attribute(), Some("uid"));
        assert_eq!(config.user_object_class(), Some("person"));
        assert_eq!(config.group_object_class(), Some("posixGroup"));
        assert_eq!(config.group_member_attribute(), Some("memberUid"));

        let connections = connector.connections();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].searches.len(), 2);
        assert!(connections[0].closed);
    }

    #[tokio::test]
    async fn test_detect_attributes_never_fails() {
        let connector = MockConnector {
            fail_connect: true,
            ..Default::default()
        };
        let config = einstein_config();

        let outcome = facade(connector).detect_attributes(&config).await.unwrap();
        assert_eq!(outcome.configuration, config);
        assert!(!outcome.is_complete());
    }
}

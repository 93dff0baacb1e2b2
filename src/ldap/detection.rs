//! Attribute detection over a bounded sample of directory entries.

use std::fmt;
use std::ops::ControlFlow;
use std::time::Duration;

use serde::Serialize;

use crate::ldap::configuration::{LdapConfigKey, LdapConfiguration};
use crate::ldap::connection::{Credentials, DirectoryConnection};
use crate::ldap::detector::{self, AttributeDetector, OccurrenceAndWeightDetector};
use crate::ldap::entry::{self, DirectoryEntry, SearchRequest, SearchResponse};

/// Maximum number of entries a detection pass looks at.
pub const SAMPLE_RESULT_SIZE: usize = 50;

/// Why a detection pass did not fully run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DetectionWarning {
    MissingSearchBase { property: &'static str },
    MissingDnAttribute,
    Search { details: String },
}

impl fmt::Display for DetectionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectionWarning::MissingSearchBase { property } => {
                write!(f, "no search base provided in [{property}]")
            },
            DetectionWarning::MissingDnAttribute => {
                f.write_str("no dn attribute provided, cannot sample entries")
            },
            DetectionWarning::Search { details } => {
                write!(f, "ldap operation failed: {details}")
            },
        }
    }
}

/// Decorated configuration, plus what prevented a complete pass.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutcome {
    pub configuration: LdapConfiguration,
    pub warnings: Vec<DetectionWarning>,
}

impl DetectionOutcome {
    fn unchanged(configuration: &LdapConfiguration, warning: DetectionWarning) -> Self {
        tracing::warn!(%warning, "ldap attribute detection skipped");
        Self {
            configuration: configuration.clone(),
            warnings: vec![warning],
        }
    }

    pub fn is_complete(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Which side of the directory a pass samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    User,
    Group,
}

impl Target {
    fn search_base_key(self) -> LdapConfigKey {
        match self {
            Target::User => LdapConfigKey::UserSearchBase,
            Target::Group => LdapConfigKey::GroupSearchBase,
        }
    }

    fn search_base(self, config: &LdapConfiguration) -> Option<&str> {
        match self {
            Target::User => config.user_search_base(),
            Target::Group => config.group_search_base(),
        }
    }

    fn detectors(self) -> [(LdapConfigKey, OccurrenceAndWeightDetector); 3] {
        match self {
            Target::User => [
                (LdapConfigKey::UserNameAttribute, detector::user_name_attribute()),
                (LdapConfigKey::UserObjectClass, detector::user_object_class()),
                (
                    LdapConfigKey::UserGroupMemberAttribute,
                    detector::user_group_member_attribute(),
                ),
            ],
            Target::Group => [
                (LdapConfigKey::GroupNameAttribute, detector::group_name_attribute()),
                (LdapConfigKey::GroupObjectClass, detector::group_object_class()),
                (LdapConfigKey::GroupMemberAttribute, detector::group_member_attribute()),
            ],
        }
    }
}

/// Samples users and groups to guess attribute names.
///
/// Detection is advisory: failures are reported as warnings, never errors.
#[derive(Debug, Clone)]
pub struct AttributeDetectionService {
    sample_size: usize,
    time_limit: Duration,
}

impl Default for AttributeDetectionService {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl AttributeDetectionService {
    /// Create a new [`AttributeDetectionService`].
    pub fn new(time_limit: Duration) -> Self {
        Self {
            sample_size: SAMPLE_RESULT_SIZE,
            time_limit,
        }
    }

    /// Guess user name attribute, user object class and user group member
    /// attribute.
    pub async fn detect_user_attributes<C: DirectoryConnection + ?Sized>(
        &self,
        connection: &mut C,
        config: &LdapConfiguration,
    ) -> DetectionOutcome {
        tracing::info!("detecting ldap user attributes");
        self.detect(connection, config, Target::User).await
    }

    /// Guess group name attribute, group object class and group member
    /// attribute.
    pub async fn detect_group_attributes<C: DirectoryConnection + ?Sized>(
        &self,
        connection: &mut C,
        config: &LdapConfiguration,
    ) -> DetectionOutcome {
        tracing::info!("detecting ldap group attributes");
        self.detect(connection, config, Target::Group).await
    }

    async fn detect<C: DirectoryConnection + ?Sized>(
        &self,
        connection: &mut C,
        config: &LdapConfiguration,
        target: Target,
    ) -> DetectionOutcome {
        let base_key = target.search_base_key();
        let Some(base) = target.search_base(config) else {
            return DetectionOutcome::unchanged(
                config,
                DetectionWarning::MissingSearchBase {
                    property: base_key.key(),
                },
            );
        };
        let Some(dn_attribute) = config.dn_attribute() else {
            return DetectionOutcome::unchanged(config, DetectionWarning::MissingDnAttribute);
        };

        let request = SearchRequest::subtree(base, entry::presence(dn_attribute))
            .size_limit(self.sample_size)
            .time_limit(self.time_limit);

        let mut detectors = target.detectors();
        let mut warnings = Vec::new();
        let mut processed = 0;

        let sampled = self
            .sample(connection, config, &request, &mut |entry| {
                tracing::debug!(dn = %entry.dn, "processing sample entry");
                for (_, detector) in detectors.iter_mut() {
                    detector.collect(&entry);
                }
                processed += 1;
            })
            .await;
        if let Err(err) = sampled {
            tracing::error!(error = %err, processed, "ldap operation failed during attribute detection");
            warnings.push(DetectionWarning::Search {
                details: err.to_string(),
            });
        }

        let mut configuration = config.clone();
        for (key, detector) in &detectors {
            match detector.detect() {
                Ok(detection) => {
                    if let Some(value) = detection.value() {
                        configuration = configuration.with_value(*key, value);
                    }
                },
                Err(err) => {
                    tracing::error!(error = %err, detector = detector.name(), "detection failed");
                },
            }
        }

        tracing::info!(?configuration, processed, "decorated ldap configuration");
        DetectionOutcome {
            configuration,
            warnings,
        }
    }

    /// Bind, then stream at most `sample_size` entries into `visit`.
    async fn sample<C: DirectoryConnection + ?Sized>(
        &self,
        connection: &mut C,
        config: &LdapConfiguration,
        request: &SearchRequest,
        visit: &mut (dyn FnMut(DirectoryEntry) + Send),
    ) -> crate::error::Result<()> {
        connection
            .bind(&Credentials::from_configuration(config))
            .await?;

        let limit = self.sample_size;
        let mut count = 0;
        connection
            .search(request, &mut |response| {
                if count >= limit {
                    tracing::debug!("maximum count of results for attribute detection reached");
                    return ControlFlow::Break(());
                }
                if let SearchResponse::Entry(entry) = response {
                    visit(entry);
                    count += 1;
                }
                ControlFlow::Continue(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::facade::tests::{MockConnection, people};

    fn config(pairs: &[(LdapConfigKey, &str)]) -> LdapConfiguration {
        pairs.iter().map(|(k, v)| (k.key(), *v)).collect()
    }

    fn base_config() -> LdapConfiguration {
        config(&[
            (LdapConfigKey::DnAttribute, "dn"),
            (LdapConfigKey::UserSearchBase, "dc=example,dc=com"),
            (LdapConfigKey::GroupSearchBase, "ou=groups,dc=example,dc=com"),
            (LdapConfigKey::BindDn, "cn=read-only-admin,dc=example,dc=com"),
            (LdapConfigKey::BindPassword, "password"),
        ])
    }

    #[tokio::test]
    async fn test_missing_search_base_is_noop() {
        let mut connection = MockConnection::default();
        let input = config(&[(LdapConfigKey::DnAttribute, "dn")]);

        let outcome = AttributeDetectionService::default()
            .detect_user_attributes(&mut connection, &input)
            .await;

        assert_eq!(outcome.configuration, input);
        assert!(matches!(
            outcome.warnings[..],
            [DetectionWarning::MissingSearchBase { .. }]
        ));
        assert!(connection.searches.is_empty());
        assert!(connection.binds.is_empty());
    }

    #[tokio::test]
    async fn test_group_pass_ignores_user_search_base() {
        let mut connection = MockConnection::default();
        let input = config(&[
            (LdapConfigKey::DnAttribute, "dn"),
            (LdapConfigKey::UserSearchBase, "dc=example,dc=com"),
        ]);

        let outcome = AttributeDetectionService::default()
            .detect_group_attributes(&mut connection, &input)
            .await;

        assert_eq!(
            outcome.warnings,
            vec![DetectionWarning::MissingSearchBase {
                property: LdapConfigKey::GroupSearchBase.key()
            }]
        );
        assert!(connection.searches.is_empty());
    }

    #[tokio::test]
    async fn test_detect_user_attributes() {
        let mut connection = MockConnection {
            entries: people(3),
            ..Default::default()
        };
        let input = base_config();

        let outcome = AttributeDetectionService::default()
            .detect_user_attributes(&mut connection, &input)
            .await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.configuration.user_name_attribute(), Some("uid"));
        assert_eq!(outcome.configuration.user_object_class(), Some("person"));
        assert_eq!(outcome.configuration.user_group_member_attribute(), None);
        // input snapshot untouched.
        assert_eq!(input.user_name_attribute(), None);

        let request = &connection.searches[0];
        assert_eq!(request.base, "dc=example,dc=com");
        assert_eq!(request.filter, "(dn=*)");
        assert_eq!(request.attributes, vec!["*".to_owned()]);
        assert!(request.time_limit.is_some());
        assert!(matches!(connection.binds[..], [Credentials::Simple { .. }]));
    }

    #[tokio::test]
    async fn test_sample_is_capped() {
        let mut connection = MockConnection {
            entries: people(SAMPLE_RESULT_SIZE + 20),
            ..Default::default()
        };

        AttributeDetectionService::default()
            .detect_user_attributes(&mut connection, &base_config())
            .await;

        assert_eq!(connection.delivered, SAMPLE_RESULT_SIZE + 1);
    }

    #[tokio::test]
    async fn test_non_entry_responses_are_ignored() {
        let mut connection = MockConnection {
            entries: vec![SearchResponse::Referral, SearchResponse::Intermediate],
            ..Default::default()
        };

        let outcome = AttributeDetectionService::default()
            .detect_user_attributes(&mut connection, &base_config())
            .await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.configuration, base_config());
    }

    #[tokio::test]
    async fn test_search_failure_is_a_warning() {
        let mut connection = MockConnection {
            entries: people(2),
            fail_search_after: Some(2),
            ..Default::default()
        };

        let outcome = AttributeDetectionService::default()
            .detect_user_attributes(&mut connection, &base_config())
            .await;

        assert!(matches!(outcome.warnings[..], [DetectionWarning::Search { .. }]));
        // entries streamed before the failure still count.
        assert_eq!(outcome.configuration.user_name_attribute(), Some("uid"));
    }

    #[tokio::test]
    async fn test_bind_failure_is_a_warning() {
        let mut connection = MockConnection {
            fail_bind: true,
            entries: people(2),
            ..Default::default()
        };

        let outcome = AttributeDetectionService::default()
            .detect_user_attributes(&mut connection, &base_config())
            .await;

        assert_eq!(outcome.configuration, base_config());
        assert!(matches!(outcome.warnings[..], [DetectionWarning::Search { .. }]));
        assert!(connection.searches.is_empty());
    }

    #[tokio::test]
    async fn test_detect_group_attributes() {
        let group = DirectoryEntry::new("cn=scientists,ou=groups,dc=example,dc=com")
            .with_attribute("cn", ["scientists"])
            .with_attribute("objectClass", ["top", "groupOfUniqueNames"])
            .with_attribute("uniqueMember", ["uid=einstein,dc=example,dc=com"]);
        let mut connection = MockConnection {
            entries: vec![SearchResponse::Entry(group)],
            ..Default::default()
        };

        let outcome = AttributeDetectionService::default()
            .detect_group_attributes(&mut connection, &base_config())
            .await;

        assert_eq!(connection.searches[0].base, "ou=groups,dc=example,dc=com");
        assert_eq!(outcome.configuration.group_name_attribute(), Some("cn"));
        assert_eq!(
            outcome.configuration.group_object_class(),
            Some("groupOfUniqueNames")
        );
        assert_eq!(
            outcome.configuration.group_member_attribute(),
            Some("uniqueMember")
        );
    }
}

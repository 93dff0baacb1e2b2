//! Validation of a candidate configuration through real bind/search
//! round-trips.

use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::time::Duration;

use crate::error::{Result, ServerError};
use crate::ldap::configuration::{LdapConfigKey, LdapConfiguration};
use crate::ldap::connection::{Credentials, DirectoryConnection};
use crate::ldap::entry::{self, OBJECT_CLASS, SearchRequest, SearchResponse};

/// Checks connectivity, user attributes and group attributes.
#[derive(Debug, Clone)]
pub struct ConfigurationValidator {
    time_limit: Duration,
}

impl Default for ConfigurationValidator {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

fn required(config: &LdapConfiguration, key: LdapConfigKey) -> Result<&str> {
    config.non_empty(key).ok_or(ServerError::MissingProperty(key.key()))
}

impl ConfigurationValidator {
    /// Create a new [`ConfigurationValidator`].
    pub fn new(time_limit: Duration) -> Self {
        Self { time_limit }
    }

    /// Bind anonymously or with the manager credentials, then make sure the
    /// connection is alive.
    pub async fn bind<C: DirectoryConnection + ?Sized>(
        &self,
        connection: &mut C,
        config: &LdapConfiguration,
    ) -> Result<()> {
        let credentials = Credentials::from_configuration(config);
        tracing::info!(anonymous = (credentials == Credentials::Anonymous), "connecting to ldap");

        connection.bind(&credentials).await?;

        if !connection.is_connected() {
            tracing::error!("not connected to the ldap server");
            return Err(ServerError::Connection {
                details: "the connection to the LDAP server is not alive".into(),
                source: None,
            });
        }

        tracing::info!("connected to ldap");
        Ok(())
    }

    /// Bind and confirm the server accepted the connection.
    pub async fn check_connection<C: DirectoryConnection + ?Sized>(
        &self,
        connection: &mut C,
        config: &LdapConfiguration,
    ) -> Result<()> {
        self.bind(connection, config).await.map_err(|err| match err {
            ServerError::Connection { details, source } => ServerError::Connection {
                details: format!("could not connect to the LDAP server: {details}"),
                source,
            },
            err => err,
        })
    }

    /// Look up a known test user and return its DN.
    ///
    /// When several entries match, the first one returned by the server
    /// wins. A non-empty `password` is verified by binding as the user.
    pub async fn check_user_attributes<C: DirectoryConnection + ?Sized>(
        &self,
        connection: &mut C,
        username: &str,
        password: Option<&str>,
        config: &LdapConfiguration,
    ) -> Result<String> {
        let object_class = required(config, LdapConfigKey::UserObjectClass)?;
        let name_attribute = required(config, LdapConfigKey::UserNameAttribute)?;
        let base = required(config, LdapConfigKey::UserSearchBase)?;

        tracing::info!(username, "checking user attributes");
        self.bind(connection, config).await?;

        let filter = entry::and([
            entry::equality(OBJECT_CLASS, object_class),
            entry::equality(name_attribute, username),
        ]);
        tracing::info!(username, %filter, "searching for the user");

        let request = SearchRequest::subtree(base, filter.as_str())
            .attributes(["dn"])
            .time_limit(self.time_limit);

        let mut user_dn = None;
        connection
            .search(&request, &mut |response| match response {
                SearchResponse::Entry(entry) => {
                    user_dn = Some(entry.dn);
                    ControlFlow::Break(())
                },
                _ => ControlFlow::Continue(()),
            })
            .await?;

        let Some(user_dn) = user_dn else {
            tracing::error!(%filter, "there are no users found using the filter");
            return Err(ServerError::Attributes { filter });
        };

        if let Some(password) = password.filter(|p| !p.is_empty()) {
            connection
                .bind(&Credentials::Simple {
                    dn: user_dn.clone(),
                    password: password.to_owned(),
                })
                .await
                .map_err(|err| match err {
                    ServerError::Connection { source, .. } => ServerError::Connection {
                        details: format!("test user [{user_dn}] could not bind with the given password"),
                        source,
                    },
                    err => err,
                })?;
        }

        tracing::info!(%filter, %user_dn, "attribute validation succeeded");
        Ok(user_dn)
    }

    /// Collect the names of the groups `user_dn` is a member of.
    pub async fn check_group_attributes<C: DirectoryConnection + ?Sized>(
        &self,
        connection: &mut C,
        user_dn: &str,
        config: &LdapConfiguration,
    ) -> Result<BTreeSet<String>> {
        let object_class = required(config, LdapConfigKey::GroupObjectClass)?;
        let member_attribute = required(config, LdapConfigKey::GroupMemberAttribute)?;
        let name_attribute = required(config, LdapConfigKey::GroupNameAttribute)?;
        let base = required(config, LdapConfigKey::GroupSearchBase)?;

        tracing::info!(user_dn, "checking group attributes");
        self.bind(connection, config).await?;

        let filter = entry::and([
            entry::equality(OBJECT_CLASS, object_class),
            entry::equality(member_attribute, user_dn),
        ]);
        tracing::info!(user_dn, %filter, "searching for the groups of the user");

        let request = SearchRequest::subtree(base, filter)
            .attributes([member_attribute, name_attribute])
            .time_limit(self.time_limit);

        let mut groups = BTreeSet::new();
        connection
            .search(&request, &mut |response| {
                if let SearchResponse::Entry(entry) = response {
                    match entry.first_value(name_attribute) {
                        Some(name) => {
                            groups.insert(name.to_owned());
                        },
                        None => {
                            tracing::warn!(dn = %entry.dn, name_attribute, "group entry has no name attribute");
                        },
                    }
                }
                ControlFlow::Continue(())
            })
            .await?;

        tracing::debug!(?groups, "extracted group names");
        Ok(groups)
    }
}

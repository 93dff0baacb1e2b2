//! Typed view over the flat LDAP property map.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Default port for plain LDAP.
pub const DEFAULT_PORT: u16 = 389;
/// Default port for LDAP over SSL.
pub const DEFAULT_SSL_PORT: u16 = 636;

/// Supported LDAP related property names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LdapConfigKey {
    LdapEnabled,
    ServerHost,
    ServerPort,
    UseSsl,
    TrustStore,
    TrustStoreType,
    TrustStorePath,
    TrustStorePassword,
    AnonymousBind,
    BindDn,
    BindPassword,
    /// `manual` or `auto`.
    AttributeDetection,
    DnAttribute,
    UserObjectClass,
    UserNameAttribute,
    UserGroupMemberAttribute,
    UserSearchBase,
    GroupObjectClass,
    GroupNameAttribute,
    GroupMemberAttribute,
    GroupSearchBase,
    UserSearchFilter,
    UserMemberReplacePattern,
    UserMemberFilter,
    GroupSearchFilter,
    GroupMemberReplacePattern,
    GroupMemberFilter,
    ForceLowercaseUsernames,
    /// `follow` or `ignore`.
    ReferralHandling,
    PaginationEnabled,
}

impl LdapConfigKey {
    /// Every known key, in declaration order.
    pub const ALL: [LdapConfigKey; 30] = [
        LdapConfigKey::LdapEnabled,
        LdapConfigKey::ServerHost,
        LdapConfigKey::ServerPort,
        LdapConfigKey::UseSsl,
        LdapConfigKey::TrustStore,
        LdapConfigKey::TrustStoreType,
        LdapConfigKey::TrustStorePath,
        LdapConfigKey::TrustStorePassword,
        LdapConfigKey::AnonymousBind,
        LdapConfigKey::BindDn,
        LdapConfigKey::BindPassword,
        LdapConfigKey::AttributeDetection,
        LdapConfigKey::DnAttribute,
        LdapConfigKey::UserObjectClass,
        LdapConfigKey::UserNameAttribute,
        LdapConfigKey::UserGroupMemberAttribute,
        LdapConfigKey::UserSearchBase,
        LdapConfigKey::GroupObjectClass,
        LdapConfigKey::GroupNameAttribute,
        LdapConfigKey::GroupMemberAttribute,
        LdapConfigKey::GroupSearchBase,
        LdapConfigKey::UserSearchFilter,
        LdapConfigKey::UserMemberReplacePattern,
        LdapConfigKey::UserMemberFilter,
        LdapConfigKey::GroupSearchFilter,
        LdapConfigKey::GroupMemberReplacePattern,
        LdapConfigKey::GroupMemberFilter,
        LdapConfigKey::ForceLowercaseUsernames,
        LdapConfigKey::ReferralHandling,
        LdapConfigKey::PaginationEnabled,
    ];

    /// Property name as stored in the configuration map.
    pub fn key(self) -> &'static str {
        match self {
            LdapConfigKey::LdapEnabled => "ambari.ldap.authentication.enabled",
            LdapConfigKey::ServerHost => "ambari.ldap.connectivity.server.host",
            LdapConfigKey::ServerPort => "ambari.ldap.connectivity.server.port",
            LdapConfigKey::UseSsl => "ambari.ldap.connectivity.use_ssl",
            LdapConfigKey::TrustStore => "ambari.ldap.connectivity.trust_store",
            LdapConfigKey::TrustStoreType => {
                "ambari.ldap.connectivity.trust_store.type"
            },
            LdapConfigKey::TrustStorePath => {
                "ambari.ldap.connectivity.trust_store.path"
            },
            LdapConfigKey::TrustStorePassword => {
                "ambari.ldap.connectivity.trust_store.password"
            },
            LdapConfigKey::AnonymousBind => {
                "ambari.ldap.connectivity.anonymous_bind"
            },
            LdapConfigKey::BindDn => "ambari.ldap.connectivity.bind_dn",
            LdapConfigKey::BindPassword => "ambari.ldap.connectivity.bind_password",
            LdapConfigKey::AttributeDetection => "ambari.ldap.attributes.detection",
            LdapConfigKey::DnAttribute => "ambari.ldap.attributes.dn_attr",
            LdapConfigKey::UserObjectClass => {
                "ambari.ldap.attributes.user.object_class"
            },
            LdapConfigKey::UserNameAttribute => "ambari.ldap.attributes.user.name_attr",
            LdapConfigKey::UserGroupMemberAttribute => {
                "ambari.ldap.attributes.user.group_member_attr"
            },
            LdapConfigKey::UserSearchBase => "ambari.ldap.attributes.user.search_base",
            LdapConfigKey::GroupObjectClass => {
                "ambari.ldap.attributes.group.object_class"
            },
            LdapConfigKey::GroupNameAttribute => {
                "ambari.ldap.attributes.group.name_attr"
            },
            LdapConfigKey::GroupMemberAttribute => {
                "ambari.ldap.attributes.group.member_attr"
            },
            LdapConfigKey::GroupSearchBase => {
                "ambari.ldap.attributes.group.search_base"
            },
            LdapConfigKey::UserSearchFilter => {
                "ambari.ldap.advanced.user_search_filter"
            },
            LdapConfigKey::UserMemberReplacePattern => {
                "ambari.ldap.advanced.user_member_replace_pattern"
            },
            LdapConfigKey::UserMemberFilter => "ambari.ldap.advanced.user_member_filter",
            LdapConfigKey::GroupSearchFilter => {
                "ambari.ldap.advanced.group_search_filter"
            },
            LdapConfigKey::GroupMemberReplacePattern => {
                "ambari.ldap.advanced.group_member_replace_pattern"
            },
            LdapConfigKey::GroupMemberFilter => {
                "ambari.ldap.advanced.group_member_filter"
            },
            LdapConfigKey::ForceLowercaseUsernames => {
                "ambari.ldap.advanced.force_lowercase_usernames"
            },
            LdapConfigKey::ReferralHandling => "ambari.ldap.advanced.referrals",
            LdapConfigKey::PaginationEnabled => {
                "ambari.ldap.advanced.pagination_enabled"
            },
        }
    }

    /// Find a key by its property name.
    pub fn from_key(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.key() == name)
    }
}

impl fmt::Display for LdapConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// How the directory client treats referrals returned by a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferralHandling {
    Follow,
    #[default]
    Ignore,
}

/// Immutable snapshot of an LDAP configuration.
///
/// Unknown property names are kept as-is so the snapshot can be echoed back
/// to the caller without loss.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LdapConfiguration {
    properties: BTreeMap<String, String>,
}

impl LdapConfiguration {
    /// Create a new [`LdapConfiguration`] from a flat property map.
    pub fn new(properties: BTreeMap<String, String>) -> Self {
        Self { properties }
    }

    /// Return a copy holding `value` for `key`.
    pub fn with_value(&self, key: LdapConfigKey, value: impl Into<String>) -> Self {
        let mut properties = self.properties.clone();
        properties.insert(key.key().to_owned(), value.into());
        Self { properties }
    }

    /// Raw property, `None` (and a warning) when unset.
    pub fn value(&self, key: LdapConfigKey) -> Option<&str> {
        match self.properties.get(key.key()) {
            Some(value) => Some(value.as_str()),
            None => {
                tracing::warn!(property = key.key(), "ldap configuration property hasn't been set");
                None
            },
        }
    }

    /// Property that must be set and non-blank to be useful.
    pub fn non_empty(&self, key: LdapConfigKey) -> Option<&str> {
        self.value(key).map(str::trim).filter(|v| !v.is_empty())
    }

    fn flag(&self, key: LdapConfigKey) -> bool {
        self.value(key)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }

    pub fn server_host(&self) -> Option<&str> {
        self.non_empty(LdapConfigKey::ServerHost)
    }

    /// Configured port, or the protocol default.
    pub fn server_port(&self) -> u16 {
        let default = if self.use_ssl() {
            DEFAULT_SSL_PORT
        } else {
            DEFAULT_PORT
        };

        match self.non_empty(LdapConfigKey::ServerPort) {
            Some(port) => port.parse().unwrap_or_else(|_| {
                tracing::warn!(port, default, "invalid ldap server port, using default");
                default
            }),
            None => default,
        }
    }

    pub fn use_ssl(&self) -> bool {
        self.flag(LdapConfigKey::UseSsl)
    }

    pub fn anonymous_bind(&self) -> bool {
        self.flag(LdapConfigKey::AnonymousBind)
    }

    pub fn bind_dn(&self) -> Option<&str> {
        self.value(LdapConfigKey::BindDn)
    }

    pub fn bind_password(&self) -> Option<&str> {
        self.value(LdapConfigKey::BindPassword)
    }

    pub fn dn_attribute(&self) -> Option<&str> {
        self.non_empty(LdapConfigKey::DnAttribute)
    }

    pub fn user_object_class(&self) -> Option<&str> {
        self.non_empty(LdapConfigKey::UserObjectClass)
    }

    pub fn user_name_attribute(&self) -> Option<&str> {
        self.non_empty(LdapConfigKey::UserNameAttribute)
    }

    pub fn user_group_member_attribute(&self) -> Option<&str> {
        self.non_empty(LdapConfigKey::UserGroupMemberAttribute)
    }

    pub fn user_search_base(&self) -> Option<&str> {
        self.non_empty(LdapConfigKey::UserSearchBase)
    }

    pub fn group_object_class(&self) -> Option<&str> {
        self.non_empty(LdapConfigKey::GroupObjectClass)
    }

    pub fn group_name_attribute(&self) -> Option<&str> {
        self.non_empty(LdapConfigKey::GroupNameAttribute)
    }

    pub fn group_member_attribute(&self) -> Option<&str> {
        self.non_empty(LdapConfigKey::GroupMemberAttribute)
    }

    pub fn group_search_base(&self) -> Option<&str> {
        self.non_empty(LdapConfigKey::GroupSearchBase)
    }

    pub fn pagination_enabled(&self) -> bool {
        self.flag(LdapConfigKey::PaginationEnabled)
    }

    pub fn referral_handling(&self) -> ReferralHandling {
        match self.value(LdapConfigKey::ReferralHandling) {
            Some(mode) if mode.trim().eq_ignore_ascii_case("follow") => {
                ReferralHandling::Follow
            },
            _ => ReferralHandling::Ignore,
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LdapConfiguration {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// Passwords never reach the logs.
impl fmt::Debug for LdapConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, value) in &self.properties {
            if key.ends_with("password") {
                map.entry(key, &"********");
            } else {
                map.entry(key, value);
            }
        }
        map.finish()
    }
}

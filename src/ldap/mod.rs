//! LDAP configuration validation and attribute detection.
//!
//! [`facade::LdapFacade`] is the entry point. It connects through an
//! [`connection::LdapConnector`] and hands the connection to the
//! [`validator`] or the [`detection`] service.
pub mod configuration;
pub mod connection;
pub mod detection;
pub mod detector;
pub mod entry;
pub mod facade;
pub mod validator;

pub use configuration::{LdapConfigKey, LdapConfiguration};
pub use connection::{Ldap3Connector, LdapConnector};
pub use detection::{DetectionOutcome, DetectionWarning};
pub use facade::{DefaultLdapFacade, LdapAction, LdapFacade};

//! Directory connection capability and its `ldap3` implementation.

use std::ops::ControlFlow;
use std::time::Duration;

use async_trait::async_trait;
use ldap3::adapters::{Adapter, PagedResults};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapResult, Scope, SearchEntry, SearchOptions};
use url::Url;

use crate::error::{Result, ServerError};
use crate::ldap::configuration::{LdapConfiguration, ReferralHandling};
use crate::ldap::entry::{SearchRequest, SearchResponse};

/// `sizeLimitExceeded` result code.
const SIZE_LIMIT_EXCEEDED: u32 = 4;

/// Receives every response of a search, in order. Returning
/// [`ControlFlow::Break`] stops the search.
pub type SearchSink<'a> = dyn FnMut(SearchResponse) -> ControlFlow<()> + Send + 'a;

/// How to authenticate against the directory.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    Simple { dn: String, password: String },
}

impl Credentials {
    /// Anonymous only when the configuration explicitly asks for it.
    pub fn from_configuration(config: &LdapConfiguration) -> Self {
        if config.anonymous_bind() {
            Credentials::Anonymous
        } else {
            Credentials::Simple {
                dn: config.bind_dn().unwrap_or_default().to_owned(),
                password: config.bind_password().unwrap_or_default().to_owned(),
            }
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Anonymous => f.write_str("Anonymous"),
            Credentials::Simple { dn, .. } => {
                f.debug_struct("Simple").field("dn", dn).finish_non_exhaustive()
            },
        }
    }
}

/// One open connection to a directory server.
#[async_trait]
pub trait DirectoryConnection: Send {
    /// Authenticate the connection.
    async fn bind(&mut self, credentials: &Credentials) -> Result<()>;

    /// Whether the underlying transport is still alive.
    fn is_connected(&mut self) -> bool;

    /// Run a subtree search, streaming every response into `sink`.
    ///
    /// Responses delivered before an error stay delivered.
    async fn search(&mut self, request: &SearchRequest, sink: &mut SearchSink<'_>) -> Result<()>;

    /// Release the connection. Idempotent.
    async fn close(&mut self) -> Result<()>;
}

/// Opens connections for a configuration.
#[async_trait]
pub trait LdapConnector: Send + Sync {
    type Connection: DirectoryConnection;

    async fn connect(&self, config: &LdapConfiguration) -> Result<Self::Connection>;
}

/// Directory URL for a configuration.
pub fn server_url(config: &LdapConfiguration) -> Result<Url> {
    let host = config
        .server_host()
        .ok_or(ServerError::MissingProperty("ambari.ldap.connectivity.server.host"))?;
    let scheme = if config.use_ssl() { "ldaps" } else { "ldap" };

    Url::parse(&format!("{scheme}://{host}:{}", config.server_port())).map_err(|err| {
        ServerError::Connection {
            details: format!("invalid ldap server address {host}: {err}"),
            source: None,
        }
    })
}

/// [`LdapConnector`] backed by `ldap3`.
#[derive(Debug, Clone)]
pub struct Ldap3Connector {
    connect_timeout: Duration,
    operation_timeout: Duration,
    page_size: i32,
    no_tls_verify: bool,
}

impl Ldap3Connector {
    /// Create a new [`Ldap3Connector`].
    pub fn new(settings: &crate::config::Ldap) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            operation_timeout: settings.operation_timeout(),
            page_size: settings.page_size.max(1),
            no_tls_verify: settings.no_tls_verify,
        }
    }
}

#[async_trait]
impl LdapConnector for Ldap3Connector {
    type Connection = Ldap3Connection;

    async fn connect(&self, config: &LdapConfiguration) -> Result<Ldap3Connection> {
        let url = server_url(config)?;
        tracing::debug!(%url, "creating ldap connection");

        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.connect_timeout)
            .set_no_tls_verify(self.no_tls_verify);

        let (handle, conn) = LdapConnAsync::with_settings(settings, url.as_str())
            .await
            .map_err(|err| {
                ServerError::connection(format!("could not connect to the LDAP server {url}"), err)
            })?;
        tokio::spawn(async move {
            if let Err(err) = handle.drive().await {
                tracing::error!(error = %err, "ldap connection driver error");
            }
        });

        Ok(Ldap3Connection {
            conn,
            operation_timeout: self.operation_timeout,
            page_size: config.pagination_enabled().then_some(self.page_size),
            referrals: config.referral_handling(),
            closed: false,
        })
    }
}

/// `ldap3` connection with a deadline on every operation.
#[derive(Debug)]
pub struct Ldap3Connection {
    conn: Ldap,
    operation_timeout: Duration,
    page_size: Option<i32>,
    referrals: ReferralHandling,
    closed: bool,
}

/// Server side time limit in seconds. `0` means unlimited to the server, so
/// it is never returned.
fn server_time_limit(requested: Option<Duration>, operation_timeout: Duration) -> i32 {
    let limit = requested.unwrap_or(operation_timeout).as_secs().max(1);
    i32::try_from(limit).unwrap_or(i32::MAX)
}

/// Final result of a completed search. A sized sample legitimately ends
/// with `sizeLimitExceeded`.
fn search_outcome(result: LdapResult) -> Result<()> {
    if result.rc == SIZE_LIMIT_EXCEEDED {
        tracing::debug!("search stopped by the server size limit");
        return Ok(());
    }
    result.success()?;
    Ok(())
}

impl Ldap3Connection {
    fn search_options(&self, request: &SearchRequest) -> SearchOptions {
        SearchOptions::new()
            .sizelimit(request.size_limit)
            .timelimit(server_time_limit(request.time_limit, self.operation_timeout))
    }
}

#[async_trait]
impl DirectoryConnection for Ldap3Connection {
    async fn bind(&mut self, credentials: &Credentials) -> Result<()> {
        tracing::debug!(?credentials, "binding to ldap");
        let (dn, password) = match credentials {
            Credentials::Anonymous => ("", ""),
            Credentials::Simple { dn, password } => (dn.as_str(), password.as_str()),
        };

        self.conn
            .with_timeout(self.operation_timeout)
            .simple_bind(dn, password)
            .await
            .and_then(|res| res.success())
            .map_err(|err| ServerError::connection("ldap bind failed", err))?;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        !self.closed && !self.conn.is_closed()
    }

    async fn search(&mut self, request: &SearchRequest, sink: &mut SearchSink<'_>) -> Result<()> {
        let options = self.search_options(request);

        let mut adapters: Vec<Box<dyn Adapter<'_, String, Vec<String>>>> = Vec::new();
        if let Some(page_size) = self.page_size {
            adapters.push(Box::new(PagedResults::new(page_size)));
        }

        let mut stream = self
            .conn
            .with_search_options(options)
            .with_timeout(self.operation_timeout)
            .streaming_search_with(
                adapters,
                &request.base,
                Scope::Subtree,
                &request.filter,
                request.attributes.clone(),
            )
            .await?;

        let mut stopped = false;
        let outcome = loop {
            let entry = match stream.next().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            };

            let response = if entry.is_ref() {
                if self.referrals == ReferralHandling::Follow {
                    tracing::warn!(base = %request.base, "referral chasing is not supported, skipping referral");
                }
                SearchResponse::Referral
            } else if entry.is_intermediate() {
                SearchResponse::Intermediate
            } else {
                SearchResponse::Entry(SearchEntry::construct(entry).into())
            };

            if sink(response).is_break() {
                stopped = true;
                break Ok(());
            }
        };

        if stopped {
            let msgid = stream.ldap_handle().last_id();
            if let Err(err) = self.conn.abandon(msgid).await {
                tracing::warn!(error = %err, "could not abandon ldap search");
            }
            return Ok(());
        }

        let result = stream.finish().await;
        outcome?;
        search_outcome(result)
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.conn.unbind().await?;
        Ok(())
    }
}

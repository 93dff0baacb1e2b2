//! `POST /ldapconfigs/validate`: run an LDAP action against a candidate
//! configuration.

use std::collections::{BTreeMap, BTreeSet};

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::ldap::facade::Parameters;
use crate::ldap::{DetectionWarning, LdapAction, LdapConfigKey, LdapConfiguration};
use crate::router::{Valid, stringify};

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct Body {
    #[serde(rename = "AmbariConfiguration")]
    #[validate(required(message = "AmbariConfiguration is missing."), nested)]
    pub configuration: Option<ConfigurationData>,
    #[serde(rename = "RequestInfo")]
    #[validate(required(message = "RequestInfo is missing."), nested)]
    pub request_info: Option<RequestInfo>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ConfigurationData {
    #[serde(default)]
    #[validate(length(equal = 1, message = "Exactly one configuration must be provided."))]
    pub data: Vec<BTreeMap<String, Value>>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct RequestInfo {
    #[validate(length(min = 1, message = "Action must be provided."))]
    pub action: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct Response {
    pub status: u16,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<LdapConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<DetectionWarning>>,
}

impl Response {
    fn ok(action: LdapAction) -> Self {
        Self {
            status: StatusCode::OK.as_u16(),
            action: action.as_str(),
            groups: None,
            configuration: None,
            warnings: None,
        }
    }
}

/// Handler running the requested action.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let request_info = body
        .request_info
        .ok_or(ServerError::MissingProperty("RequestInfo"))?;
    let data = body
        .configuration
        .and_then(|configuration| configuration.data.into_iter().next())
        .ok_or(ServerError::MissingProperty("AmbariConfiguration"))?;

    // unknown actions are rejected before any directory round-trip.
    let action: LdapAction = request_info.action.parse()?;
    let config: LdapConfiguration = data
        .into_iter()
        .inspect(|(key, _)| {
            if LdapConfigKey::from_key(key).is_none() {
                tracing::debug!(property = %key, "unknown ldap property, kept as-is");
            }
        })
        .filter_map(|(key, value)| stringify(value).map(|value| (key, value)))
        .collect();
    let parameters: Parameters = request_info
        .parameters
        .into_iter()
        .filter_map(|(key, value)| stringify(value).map(|value| (key, value)))
        .collect();

    tracing::info!(action = action.as_str(), "handling ldap configuration request");

    let mut response = Response::ok(action);
    match action {
        LdapAction::TestConnection => {
            state.facade.check_connection(&config).await?;
        },
        LdapAction::TestAttributes => {
            let groups = state
                .facade
                .check_ldap_attributes(&parameters, &config)
                .await?;
            response.groups = Some(groups);
        },
        LdapAction::DetectAttributes => {
            let outcome = state.facade.detect_attributes(&config).await?;
            response.configuration = Some(outcome.configuration);
            response.warnings = Some(outcome.warnings);
        },
    }

    Ok(Json(response))
}

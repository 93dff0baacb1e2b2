pub mod status;
pub mod validate;

use axum::Json;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;
use serde_json::Value;
use validator::Validate;

use crate::error::ServerError;

/// JSON body checked with [`Validate`] before reaching the handler.
#[derive(Debug, Clone)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Render a JSON property value the way the directory configuration stores
/// it. `null` has no string form.
pub(crate) fn stringify(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(value) => Some(value),
        value => Some(value.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::AppState;
    use crate::config::Configuration;
    use crate::ldap::DefaultLdapFacade;
    use crate::ldap::facade::tests::MockConnector;

    /// Application state backed by an in-memory directory.
    pub fn state(connector: MockConnector) -> AppState {
        AppState {
            config: Arc::new(Configuration::default()),
            facade: Arc::new(DefaultLdapFacade::new(connector, Duration::from_secs(5))),
            metrics: None,
        }
    }

    #[test]
    fn test_stringify() {
        assert_eq!(stringify(Value::from("uid")), Some("uid".to_owned()));
        assert_eq!(stringify(Value::from(389)), Some("389".to_owned()));
        assert_eq!(stringify(Value::from(true)), Some("true".to_owned()));
        assert_eq!(stringify(Value::Null), None);
    }
}

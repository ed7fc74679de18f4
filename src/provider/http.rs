//! Provider speaking JSON to a remote control-plane endpoint
//!
//! - `POST   {endpoint}/resources/{kind}`
//! - `PUT    {endpoint}/resources/{kind}/{physical_id}`
//! - `DELETE {endpoint}/resources/{kind}/{physical_id}`
//!
//! Create and update answer `{"physical_id": "...", "outputs": {...}}`.

use declarative::{CallContext, Config, Provider, ProviderError, Provisioned};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ResourceRequest<'a> {
    graph_id: &'a str,
    node_id: &'a str,
    config: &'a Config,
}

#[derive(Debug, Deserialize)]
struct ResourceResponse {
    physical_id: String,
    #[serde(default)]
    outputs: BTreeMap<String, String>,
}

pub struct HttpProvider {
    agent: ureq::Agent,
    endpoint: String,
}

impl HttpProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn collection_url(&self, kind: &str) -> String {
        format!("{}/resources/{}", self.endpoint, kind)
    }

    fn resource_url(&self, kind: &str, physical_id: &str) -> String {
        format!("{}/resources/{}/{}", self.endpoint, kind, physical_id)
    }

    /// Turn a response into a result, mapping error statuses
    fn finish(
        mut response: ureq::http::Response<ureq::Body>,
        physical_id: Option<&str>,
    ) -> Result<Option<ResourceResponse>, ProviderError> {
        let status = response.status().as_u16();
        let body = response.body_mut().read_to_string().unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(status_error(status, body.trim(), physical_id));
        }
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| ProviderError::Other(format!("invalid response: {e}")))
    }

    fn provisioned(
        response: Option<ResourceResponse>,
        physical_id: Option<&str>,
    ) -> Result<Provisioned, ProviderError> {
        match (response, physical_id) {
            (Some(r), _) => Ok(Provisioned {
                physical_id: r.physical_id,
                outputs: r.outputs,
            }),
            (None, Some(id)) => Ok(Provisioned::new(id)),
            (None, None) => Err(ProviderError::Other(
                "create returned no physical id".to_string(),
            )),
        }
    }
}

/// Map a non-success HTTP status to a provider error
pub fn status_error(status: u16, body: &str, physical_id: Option<&str>) -> ProviderError {
    let message = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };

    match status {
        429 => ProviderError::Throttled { message },
        409 => ProviderError::Conflict { message },
        404 => match physical_id {
            Some(id) => ProviderError::NotFound {
                physical_id: id.to_string(),
            },
            None => ProviderError::Validation { message },
        },
        400 | 422 => ProviderError::Validation { message },
        401 | 403 => ProviderError::PermissionDenied { message },
        500..=599 => ProviderError::Unavailable { message },
        _ => ProviderError::Other(message),
    }
}

/// Map a transport failure to a provider error
pub fn transport_error(err: ureq::Error, timeout: Duration) -> ProviderError {
    match err {
        ureq::Error::Timeout(_) => ProviderError::Timeout { after: timeout },
        ureq::Error::ConnectionFailed | ureq::Error::HostNotFound | ureq::Error::Io(_) => {
            ProviderError::Unavailable {
                message: err.to_string(),
            }
        }
        other => ProviderError::Other(other.to_string()),
    }
}

impl Provider for HttpProvider {
    fn create(&self, kind: &str, config: &Config, ctx: &CallContext) -> Result<Provisioned, ProviderError> {
        let request = ResourceRequest {
            graph_id: &ctx.graph_id,
            node_id: &ctx.node_id,
            config,
        };
        let response = self
            .agent
            .post(&self.collection_url(kind))
            .config()
            .timeout_global(Some(ctx.timeout))
            .build()
            .header("X-Rigger-Attempt", ctx.attempt.to_string())
            .send_json(&request)
            .map_err(|e| transport_error(e, ctx.timeout))?;

        Self::provisioned(Self::finish(response, None)?, None)
    }

    fn update(
        &self,
        kind: &str,
        physical_id: &str,
        config: &Config,
        ctx: &CallContext,
    ) -> Result<Provisioned, ProviderError> {
        let request = ResourceRequest {
            graph_id: &ctx.graph_id,
            node_id: &ctx.node_id,
            config,
        };
        let response = self
            .agent
            .put(&self.resource_url(kind, physical_id))
            .config()
            .timeout_global(Some(ctx.timeout))
            .build()
            .header("X-Rigger-Attempt", ctx.attempt.to_string())
            .send_json(&request)
            .map_err(|e| transport_error(e, ctx.timeout))?;

        Self::provisioned(Self::finish(response, Some(physical_id))?, Some(physical_id))
    }

    fn delete(&self, kind: &str, physical_id: &str, ctx: &CallContext) -> Result<(), ProviderError> {
        let response = self
            .agent
            .delete(&self.resource_url(kind, physical_id))
            .config()
            .timeout_global(Some(ctx.timeout))
            .build()
            .header("X-Rigger-Attempt", ctx.attempt.to_string())
            .call()
            .map_err(|e| transport_error(e, ctx.timeout))?;

        Self::finish(response, Some(physical_id)).map(|_| ())
    }
}

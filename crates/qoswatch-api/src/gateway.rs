// Rule gateway HTTP client
//
// Wraps `reqwest::Client` with backend URL construction and response
// classification. Every public method is exactly one round trip with no
// retry of its own: rule writes are not safe to replay blindly, so retry
// policy belongs to the caller.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::GatewayError;
use crate::model::{MetricsSnapshot, NewSdnRule, QosRule, RuleId, SdnRule};
use crate::transport::TransportConfig;

const QOS_RULES: &str = "api/qos/rules";
const SDN_RULES: &str = "api/sdn/rules";
const METRICS_CURRENT: &str = "api/metrics/current";
const METRICS_CLEAR: &str = "api/metrics/clear";

/// Request/response client for the backend's rule and metrics endpoints.
///
/// Stateless apart from the pooled HTTP connection. Not safe to issue two
/// concurrent writes for the same protocol or rule id; the caller must
/// serialise those.
#[derive(Debug, Clone)]
pub struct RuleGateway {
    http: reqwest::Client,
    base_url: Url,
    timeout_secs: u64,
}

impl RuleGateway {
    /// Create a gateway for the backend rooted at `base_url`
    /// (e.g. `http://localhost:8000`).
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, GatewayError> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            timeout_secs: transport.timeout_secs(),
        })
    }

    /// Create a gateway around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self {
            http,
            base_url,
            timeout_secs: TransportConfig::default().timeout_secs(),
        }
    }

    /// The backend base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── QoS rules ────────────────────────────────────────────────────

    pub async fn list_qos_rules(&self) -> Result<Vec<QosRule>, GatewayError> {
        let url = self.endpoint(QOS_RULES, None)?;
        self.get(url).await
    }

    /// Create or replace the rule for `rule.protocol`.
    pub async fn upsert_qos_rule(&self, rule: &QosRule) -> Result<(), GatewayError> {
        let url = self.endpoint(QOS_RULES, None)?;
        self.post(url, Some(rule)).await
    }

    pub async fn delete_qos_rule(&self, protocol: &str) -> Result<(), GatewayError> {
        let url = self.endpoint(QOS_RULES, Some(protocol))?;
        self.delete(url).await
    }

    // ── SDN rules ────────────────────────────────────────────────────

    pub async fn list_sdn_rules(&self) -> Result<Vec<SdnRule>, GatewayError> {
        let url = self.endpoint(SDN_RULES, None)?;
        self.get(url).await
    }

    /// Create a rule; the backend assigns its id.
    pub async fn create_sdn_rule(&self, rule: &NewSdnRule) -> Result<(), GatewayError> {
        let url = self.endpoint(SDN_RULES, None)?;
        self.post(url, Some(rule)).await
    }

    pub async fn delete_sdn_rule(&self, id: &RuleId) -> Result<(), GatewayError> {
        let url = self.endpoint(SDN_RULES, Some(&id.to_string()))?;
        self.delete(url).await
    }

    // ── Metrics ──────────────────────────────────────────────────────

    pub async fn get_metrics_snapshot(&self) -> Result<MetricsSnapshot, GatewayError> {
        let url = self.endpoint(METRICS_CURRENT, None)?;
        self.get(url).await
    }

    /// Ask the backend to drop its accumulated metrics history.
    pub async fn clear_metrics_history(&self) -> Result<(), GatewayError> {
        let url = self.endpoint(METRICS_CLEAR, None)?;
        self.post::<()>(url, None).await
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build `{base}/{path}[/{segment}]`, percent-encoding the segment.
    fn endpoint(&self, path: &str, segment: Option<&str>) -> Result<Url, GatewayError> {
        let full = format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path);
        let mut url = Url::parse(&full)?;
        if let Some(segment) = segment {
            url.path_segments_mut()
                .map_err(|()| GatewayError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
                .push(segment);
        }
        Ok(url)
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, GatewayError> {
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(&e, self.timeout_secs))?;

        let body = self.success_body(resp).await?;
        serde_json::from_str(&body).map_err(|e| GatewayError::MalformedResponse {
            message: e.to_string(),
            body,
        })
    }

    async fn post<B: Serialize>(&self, url: Url, body: Option<&B>) -> Result<(), GatewayError> {
        debug!("POST {}", url);

        let mut request = self.http.post(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let resp = request
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(&e, self.timeout_secs))?;

        self.success_body(resp).await.map(drop)
    }

    async fn delete(&self, url: Url) -> Result<(), GatewayError> {
        debug!("DELETE {}", url);

        let resp = self
            .http
            .delete(url)
            .send()
            .await
            .map_err(|e| GatewayError::from_reqwest(&e, self.timeout_secs))?;

        self.success_body(resp).await.map(drop)
    }

    /// Read the body, mapping any non-2xx status to `BackendRejected`.
    async fn success_body(&self, resp: reqwest::Response) -> Result<String, GatewayError> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| GatewayError::from_reqwest(&e, self.timeout_secs))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(GatewayError::BackendRejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gateway(base: &str) -> RuleGateway {
        RuleGateway::with_client(reqwest::Client::new(), Url::parse(base).unwrap())
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let gw = gateway("http://localhost:8000/");
        let url = gw.endpoint(QOS_RULES, None).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/api/qos/rules");
    }

    #[test]
    fn endpoint_keeps_base_path_prefix() {
        let gw = gateway("http://gateway.local/backend");
        let url = gw.endpoint(SDN_RULES, Some("12")).unwrap();
        assert_eq!(url.as_str(), "http://gateway.local/backend/api/sdn/rules/12");
    }

    #[test]
    fn endpoint_percent_encodes_segment() {
        let gw = gateway("http://localhost:8000");
        let url = gw.endpoint(QOS_RULES, Some("IP in ICMP")).unwrap();
        assert_eq!(url.path(), "/api/qos/rules/IP%20in%20ICMP");
    }
}

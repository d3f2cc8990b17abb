//! HTTP client for the Kea Control Agent REST interface
//!
//! Every command is one JSON POST. The Control Agent answers with a JSON list
//! holding one response object per targeted service; this client always
//! targets exactly one service, so anything but a one-element list of objects
//! carrying `result` means the endpoint is not a Control Agent.
//!
//! See <https://kea.readthedocs.io/en/kea-2.6.0/arm/ctrl-channel.html>

use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::{IpVersion, KeaStatus};
use crate::config::TargetConfig;
use crate::error::KeaError;

/// Longest body excerpt quoted in error messages.
const BODY_EXCERPT_CHARS: usize = 200;

/// One response object of a Control Agent answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlAgentResponse {
    pub result: i64,
    pub text: String,
    pub arguments: Map<String, Value>,
    pub service: String,
}

impl ControlAgentResponse {
    pub fn success(&self) -> bool {
        self.result == KeaStatus::Success as i64
    }

    pub fn status(&self) -> Option<KeaStatus> {
        KeaStatus::from_code(self.result)
    }
}

/// Body of a command sent to the Control Agent
#[derive(Debug, Serialize)]
struct CommandRequest<'a> {
    command: &'a str,
    arguments: &'a Map<String, Value>,
    service: Vec<&'static str>,
}

/// Client bound to one Control Agent. The inner HTTP client keeps connections
/// alive, so one instance is meant to serve a whole collection cycle.
#[derive(Debug, Clone)]
pub struct ControlAgentClient {
    http: reqwest::Client,
    url: String,
}

impl ControlAgentClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, KeaError> {
        let url = url.into();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| KeaError::Transport { url: url.clone(), source })?;

        Ok(Self { http, url })
    }

    pub fn for_target(target: &TargetConfig) -> Result<Self, KeaError> {
        Self::new(target.url(), Duration::from_secs(target.timeout_secs))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send `command` to the given services.
    ///
    /// Errors only on transport failures and on answers that do not look like
    /// they come from a Control Agent. A well-formed answer with a non-success
    /// `result` is returned as is and logged.
    pub async fn send(
        &self,
        command: &str,
        services: &[IpVersion],
        arguments: Map<String, Value>,
    ) -> Result<ControlAgentResponse, KeaError> {
        let request = CommandRequest {
            command,
            arguments: &arguments,
            service: services.iter().map(|v| v.service()).collect(),
        };
        let payload = serde_json::to_vec(&request).map_err(|e| KeaError::Protocol {
            url: self.url.clone(),
            detail: format!("could not encode command '{command}': {e}"),
        })?;

        debug!("Sending '{}' to Kea Control Agent at {}", command, self.url);

        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|source| KeaError::Transport { url: self.url.clone(), source })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| KeaError::Transport { url: self.url.clone(), source })?;
        debug!("Kea Control Agent at {} answered HTTP {}", self.url, status);

        let response = parse_envelope(&self.url, &body)?;
        if !response.success() {
            warn!(
                "Kea at {} did not fulfil '{}' (result {}): {}",
                self.url, command, response.result, response.text
            );
        }
        Ok(response)
    }

    pub async fn config_get(&self, version: IpVersion) -> Result<ControlAgentResponse, KeaError> {
        self.send("config-get", &[version], Map::new()).await
    }

    pub async fn statistic_get(
        &self,
        version: IpVersion,
        name: &str,
    ) -> Result<ControlAgentResponse, KeaError> {
        let mut arguments = Map::new();
        arguments.insert("name".to_string(), Value::String(name.to_string()));
        self.send("statistic-get", &[version], arguments).await
    }
}

/// Validate the envelope of a Control Agent answer and extract its only response.
pub(crate) fn parse_envelope(url: &str, body: &str) -> Result<ControlAgentResponse, KeaError> {
    let decoded: Value = serde_json::from_str(body).map_err(|_| KeaError::NotJson {
        url: url.to_string(),
        body: excerpt(body),
    })?;

    let protocol_error = |detail: String| KeaError::Protocol { url: url.to_string(), detail };

    let responses = match decoded {
        Value::Array(responses) => responses,
        other => {
            return Err(protocol_error(format!(
                "expected a JSON list with one response object, got {}",
                excerpt(&other.to_string())
            )))
        }
    };
    if responses.len() != 1 {
        return Err(protocol_error(format!(
            "expected exactly one response object, got {}",
            responses.len()
        )));
    }

    let Some(Value::Object(mut object)) = responses.into_iter().next() else {
        return Err(protocol_error("response list does not hold an object".to_string()));
    };

    let result = match object.get("result") {
        Some(value) => value
            .as_i64()
            .ok_or_else(|| protocol_error(format!("'result' is not an integer: {value}")))?,
        None => return Err(protocol_error("response object has no 'result'".to_string())),
    };

    let text = match object.remove("text") {
        Some(Value::String(text)) => text,
        _ => String::new(),
    };
    let arguments = match object.remove("arguments") {
        Some(Value::Object(arguments)) => arguments,
        _ => Map::new(),
    };
    let service = match object.remove("service") {
        Some(Value::String(service)) => service,
        _ => String::new(),
    };

    Ok(ControlAgentResponse { result, text, arguments, service })
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keastat_devkit::{KeaFixtures, MockControlAgent};
    use serde_json::json;

    const URL: &str = "http://192.0.2.2:8000/";

    #[test]
    fn test_success_envelope() {
        let body = r#"[{"result": 0, "text": "b", "arguments": {"arg1": "val1"}, "service": "d"}]"#;
        let response = parse_envelope(URL, body).unwrap();
        assert!(response.success());
        assert_eq!(response.text, "b");
        assert_eq!(response.arguments["arg1"], "val1");
        assert_eq!(response.service, "d");
    }

    #[test]
    fn test_minimal_envelope_defaults() {
        let response = parse_envelope(URL, r#"[{"result": 0}]"#).unwrap();
        assert!(response.success());
        assert!(response.text.is_empty());
        assert!(response.arguments.is_empty());
        assert!(response.service.is_empty());
    }

    #[test]
    fn test_error_results_are_not_errors() {
        for code in 1..=4 {
            let body = format!(r#"[{{"result": {code}, "text": "nope"}}]"#);
            let response = parse_envelope(URL, &body).unwrap();
            assert!(!response.success());
            assert_eq!(response.status(), KeaStatus::from_code(code));
            assert_eq!(response.text, "nope");
        }
    }

    #[test]
    fn test_object_body_is_protocol_error() {
        let err = parse_envelope(URL, r#"{"result": 0}"#).unwrap_err();
        assert!(matches!(err, KeaError::Protocol { .. }));
    }

    #[test]
    fn test_missing_result_is_protocol_error() {
        let err = parse_envelope(URL, r#"[{"text": "b", "service": "d"}]"#).unwrap_err();
        assert!(matches!(err, KeaError::Protocol { .. }));

        let err = parse_envelope(URL, r#"[{"result": "0"}]"#).unwrap_err();
        assert!(matches!(err, KeaError::Protocol { .. }));
    }

    #[test]
    fn test_wrong_response_count_is_protocol_error() {
        let err = parse_envelope(URL, "[]").unwrap_err();
        assert!(matches!(err, KeaError::Protocol { .. }));

        let err = parse_envelope(URL, r#"[{"result": 0}, {"result": 0}]"#).unwrap_err();
        assert!(matches!(err, KeaError::Protocol { .. }));

        let err = parse_envelope(URL, "[42]").unwrap_err();
        assert!(matches!(err, KeaError::Protocol { .. }));
    }

    #[test]
    fn test_invalid_json_is_transport_error() {
        let err = parse_envelope(URL, r#"[{"text": "b", "service": "d""#).unwrap_err();
        assert!(matches!(err, KeaError::NotJson { .. }));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_config_get_against_mock_agent() {
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_json(json!([{
            "result": 0,
            "arguments": {"Dhcp4": {"subnet4": [{"id": 1, "subnet": "192.0.2.0/24"}]}}
        }]));

        let client = ControlAgentClient::new(agent.url(), Duration::from_secs(5)).unwrap();
        let response = client.config_get(IpVersion::V4).await.unwrap();
        assert!(response.success());
        assert!(response.arguments.contains_key("Dhcp4"));

        let requests = agent.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["command"], "config-get");
        assert_eq!(requests[0]["service"], json!(["dhcp4"]));
        assert_eq!(requests[0]["arguments"], json!({}));
    }

    #[tokio::test]
    async fn test_statistic_get_sends_name() {
        let agent = MockControlAgent::start().await.unwrap();
        let name = KeaFixtures::statistic_name(7, "assigned-addresses");
        agent.enqueue_json(KeaFixtures::statistic_response(&name, &[(3, "2024-05-01 10:00:00.000001")]));

        let client = ControlAgentClient::new(agent.url(), Duration::from_secs(5)).unwrap();
        let response = client.statistic_get(IpVersion::V6, &name).await.unwrap();
        assert!(response.success());

        let requests = agent.requests();
        assert_eq!(requests[0]["command"], "statistic-get");
        assert_eq!(requests[0]["arguments"]["name"], "subnet[7].assigned-addresses");
        assert_eq!(requests[0]["service"], json!(["dhcp6"]));
    }

    #[tokio::test]
    async fn test_html_body_is_transport_error() {
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_raw("<html><body>It works!</body></html>");

        let client = ControlAgentClient::new(agent.url(), Duration::from_secs(5)).unwrap();
        let err = client.config_get(IpVersion::V4).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_timeout_is_transport_error() {
        let agent = MockControlAgent::start().await.unwrap();
        agent.enqueue_delayed(Duration::from_secs(2), json!([{"result": 0}]));

        let client = ControlAgentClient::new(agent.url(), Duration::from_millis(200)).unwrap();
        let err = client.config_get(IpVersion::V4).await.unwrap_err();
        assert!(matches!(err, KeaError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let url = {
            let agent = MockControlAgent::start().await.unwrap();
            let url = agent.url();
            agent.shutdown().await;
            url
        };

        let client = ControlAgentClient::new(url, Duration::from_secs(1)).unwrap();
        let err = client.config_get(IpVersion::V4).await.unwrap_err();
        assert!(err.is_transport());
    }
}

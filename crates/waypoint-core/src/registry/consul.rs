//! Registry client for the Consul health API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{RegistryClient, RegistryError, Result};

/// Reads passing service instances from a Consul-compatible agent.
///
/// Queries `GET {base}/v1/health/service/{name}?passing=true` and returns one
/// `address:port` record per instance, in the order the agent reports them.
#[derive(Debug, Clone)]
pub struct ConsulRegistry {
    client: reqwest::Client,
    base_url: String,
    datacenter: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    node: NodeInfo,
    service: ServiceInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeInfo {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceInfo {
    #[serde(default)]
    address: String,
    port: u16,
}

impl ConsulRegistry {
    /// Creates a client for the agent at `base_url`.
    ///
    /// Every request is bounded by `request_timeout`.
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        datacenter: Option<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RegistryError::Unavailable(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            datacenter,
        })
    }

    fn health_url(&self, service: &str) -> String {
        format!("{}/v1/health/service/{}", self.base_url, service)
    }
}

/// Turns a health response body into `address:port` records.
///
/// The service address falls back to the node address when it is unset,
/// as Consul does for services registered without an explicit address.
fn parse_health_entries(body: &str) -> Result<Vec<String>> {
    let entries: Vec<HealthEntry> = serde_json::from_str(body).map_err(|e| {
        RegistryError::InvalidResponse(format!("Failed to parse health entries: {e}"))
    })?;

    entries
        .into_iter()
        .map(|entry| {
            let host = if entry.service.address.is_empty() {
                entry.node.address
            } else {
                entry.service.address
            };
            if host.is_empty() {
                return Err(RegistryError::InvalidResponse(
                    "health entry has neither service nor node address".to_owned(),
                ));
            }
            Ok(format!("{host}:{}", entry.service.port))
        })
        .collect()
}

#[async_trait]
impl RegistryClient for ConsulRegistry {
    async fn list_healthy_endpoints(&self, service: &str) -> Result<Vec<String>> {
        let mut request = self
            .client
            .get(self.health_url(service))
            .query(&[("passing", "true")]);
        if let Some(dc) = &self.datacenter {
            request = request.query(&[("dc", dc.as_str())]);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                RegistryError::Timeout
            } else {
                RegistryError::Unavailable(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Unavailable(format!(
                "registry returned status {status}"
            )));
        }

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                RegistryError::Timeout
            } else {
                RegistryError::InvalidResponse(format!("Failed to read body: {e}"))
            }
        })?;

        let endpoints = parse_health_entries(&body)?;
        debug!(service = %service, endpoints = endpoints.len(), "Consul health query completed");
        Ok(endpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use std::collections::HashMap;
    use std::net::SocketAddr;

    const TWO_PASSING: &str = r#"[
        {"Node": {"Node": "n1", "Address": "10.0.0.1"}, "Service": {"ID": "orders-1", "Service": "orders", "Address": "", "Port": 8500}},
        {"Node": {"Node": "n2", "Address": "10.0.0.2"}, "Service": {"ID": "orders-2", "Service": "orders", "Address": "10.1.0.2", "Port": 8500}}
    ]"#;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[test]
    fn parse_falls_back_to_node_address() {
        let records = parse_health_entries(TWO_PASSING).unwrap();
        assert_eq!(records, vec!["10.0.0.1:8500", "10.1.0.2:8500"]);
    }

    #[test]
    fn parse_empty_list() {
        assert!(parse_health_entries("[]").unwrap().is_empty());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            parse_health_entries("{not json"),
            Err(RegistryError::InvalidResponse(_))
        ));
    }

    #[test]
    fn parse_rejects_entry_without_address() {
        let body = r#"[{"Node": {"Address": ""}, "Service": {"Address": "", "Port": 1}}]"#;
        assert!(matches!(
            parse_health_entries(body),
            Err(RegistryError::InvalidResponse(_))
        ));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let registry =
            ConsulRegistry::new("http://consul:8500/", Duration::from_secs(1), None).unwrap();
        assert_eq!(
            registry.health_url("orders"),
            "http://consul:8500/v1/health/service/orders"
        );
    }

    #[tokio::test]
    async fn queries_passing_instances() {
        async fn health(
            Path(name): Path<String>,
            Query(params): Query<HashMap<String, String>>,
        ) -> &'static str {
            let passing = params.get("passing").map(String::as_str) == Some("true");
            let dc1 = params.get("dc").map(String::as_str) == Some("dc1");
            if name == "orders" && passing && dc1 {
                TWO_PASSING
            } else {
                "[]"
            }
        }

        let app = Router::new().route("/v1/health/service/{name}", get(health));
        let addr = serve(app).await;

        let registry = ConsulRegistry::new(
            format!("http://{addr}"),
            Duration::from_secs(5),
            Some("dc1".to_owned()),
        )
        .unwrap();

        let records = registry.list_healthy_endpoints("orders").await.unwrap();
        assert_eq!(records, vec!["10.0.0.1:8500", "10.1.0.2:8500"]);

        let other = registry.list_healthy_endpoints("billing").await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn error_status_is_unavailable() {
        let app = Router::new().route(
            "/v1/health/service/{name}",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "no leader") }),
        );
        let addr = serve(app).await;

        let registry =
            ConsulRegistry::new(format!("http://{addr}"), Duration::from_secs(5), None).unwrap();

        let result = registry.list_healthy_endpoints("orders").await;
        assert!(matches!(result, Err(RegistryError::Unavailable(_))));
    }

    #[tokio::test]
    async fn slow_agent_times_out() {
        let app = Router::new().route(
            "/v1/health/service/{name}",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "[]"
            }),
        );
        let addr = serve(app).await;

        let registry =
            ConsulRegistry::new(format!("http://{addr}"), Duration::from_millis(100), None)
                .unwrap();

        let result = registry.list_healthy_endpoints("orders").await;
        assert_eq!(result, Err(RegistryError::Timeout));
    }
}

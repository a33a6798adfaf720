use std::time::Duration;

use api_types::DaemonWorkload;
use api_types::L3CacheInfo;
use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use reqwest::StatusCode;
use reqwest::Url;
use serde::de::DeserializeOwned;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::tls;
use super::tls::TlsPaths;
use super::DaemonApi;
use super::DaemonError;
use super::DaemonResult;
use crate::consts::DAEMON_TLS_PORT;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// REST client for RMD daemon instances.
///
/// Holds only the transport; the daemon address is passed on every call.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    http: reqwest::Client,
    tls: bool,
}

impl DaemonClient {
    /// Create a plaintext client.
    ///
    /// # Errors
    ///
    /// - [`DaemonError::Client`] if the HTTP client cannot be built
    pub fn plain() -> DaemonResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .change_context(DaemonError::Client)?;
        Ok(Self { http, tls: false })
    }

    /// Create a mutually authenticated TLS client from the material at `paths`.
    ///
    /// # Errors
    ///
    /// - [`DaemonError::Tls`] if the certificates, the key or the key strength are unusable
    /// - [`DaemonError::Client`] if the HTTP client cannot be built
    pub fn with_tls(paths: &TlsPaths) -> DaemonResult<Self> {
        let config = tls::client_config(paths)?;
        let http = reqwest::Client::builder()
            .use_preconfigured_tls(config)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .change_context(DaemonError::Client)?;
        Ok(Self { http, tls: true })
    }

    /// Pick the transport from the daemon's DaemonSet.
    ///
    /// A daemon listening on the TLS port gets a TLS client. Any failure to
    /// set TLS up falls back to a plaintext client instead of failing.
    pub fn from_daemon_set(daemon_set: &DaemonSet, paths: &TlsPaths) -> DaemonResult<Self> {
        let port = daemon_set_port(daemon_set);
        if port == Some(DAEMON_TLS_PORT) {
            match Self::with_tls(paths) {
                Ok(client) => {
                    info!(port = DAEMON_TLS_PORT, "Daemon serves TLS, using mutual TLS client");
                    return Ok(client);
                }
                Err(e) => {
                    warn!("TLS setup failed, falling back to plaintext daemon client: {e:?}");
                }
            }
        } else {
            debug!(?port, "Daemon does not serve TLS, using plaintext client");
        }
        Self::plain()
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> DaemonResult<reqwest::Request> {
        let parsed = Url::parse(url)
            .change_context(DaemonError::CreateRequest)
            .attach_printable_lazy(|| format!("url: {url}"))?;

        let mut builder = self.http.request(method, parsed);
        if let Some(body) = body {
            builder = builder.header(CONTENT_TYPE, "application/json").body(body);
        }
        builder.build().change_context(DaemonError::SetHeader)
    }

    /// Send a request and read the full body.
    async fn send(
        &self,
        address: &str,
        request: reqwest::Request,
    ) -> DaemonResult<(StatusCode, String)> {
        let response = self
            .http
            .execute(request)
            .await
            .change_context_lazy(|| DaemonError::Transport {
                address: address.to_string(),
            })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .change_context_lazy(|| DaemonError::Transport {
                address: address.to_string(),
            })?;
        Ok((status, body))
    }

    async fn get_json<T: DeserializeOwned + Default>(
        &self,
        address: &str,
        path: &str,
    ) -> DaemonResult<T> {
        let request = self.request(Method::GET, &format!("{address}{path}"), None)?;
        let (status, body) = self.send(address, request).await?;
        if status != StatusCode::OK {
            return Err(rejected(status, body));
        }
        if body.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&body)
            .change_context(DaemonError::Decode)
            .attach_printable_lazy(|| format!("body: {body}"))
    }
}

fn rejected(status: StatusCode, body: String) -> Report<DaemonError> {
    Report::new(DaemonError::Rejected {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

fn encode(workload: &DaemonWorkload) -> DaemonResult<Vec<u8>> {
    serde_json::to_vec(workload).change_context(DaemonError::CreateRequest)
}

/// First declared container port of the daemon pod template.
fn daemon_set_port(daemon_set: &DaemonSet) -> Option<i32> {
    daemon_set
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()?
        .ports
        .as_ref()?
        .first()
        .map(|port| port.container_port)
}

#[async_trait]
impl DaemonApi for DaemonClient {
    fn address_prefix(&self) -> &'static str {
        if self.tls {
            "https://"
        } else {
            "http://"
        }
    }

    async fn get_workloads(&self, address: &str) -> DaemonResult<Vec<DaemonWorkload>> {
        self.get_json(address, "/v1/workloads").await
    }

    async fn create_workload(
        &self,
        address: &str,
        workload: &DaemonWorkload,
    ) -> DaemonResult<String> {
        let request = self.request(
            Method::POST,
            &format!("{address}/v1/workloads"),
            Some(encode(workload)?),
        )?;
        let (status, body) = self.send(address, request).await?;
        match status {
            StatusCode::OK | StatusCode::CREATED => Ok(format!("Success: {}", status.as_u16())),
            _ => Err(rejected(status, body)),
        }
    }

    async fn update_workload(
        &self,
        address: &str,
        id: &str,
        workload: &DaemonWorkload,
    ) -> DaemonResult<String> {
        let request = self.request(
            Method::PATCH,
            &format!("{address}/v1/workloads/{id}"),
            Some(encode(workload)?),
        )?;
        let (status, body) = self.send(address, request).await?;
        match status {
            StatusCode::OK => Ok(format!("Success: {}", status.as_u16())),
            _ => Err(rejected(status, body)),
        }
    }

    async fn delete_workload(&self, address: &str, id: &str) -> DaemonResult<()> {
        let request = self.request(
            Method::DELETE,
            &format!("{address}/v1/workloads/{id}"),
            None,
        )?;
        let (status, body) = self.send(address, request).await?;
        match status {
            StatusCode::OK => Ok(()),
            _ => Err(rejected(status, body)),
        }
    }

    async fn get_l3_cache(&self, address: &str) -> DaemonResult<L3CacheInfo> {
        self.get_json(address, "/v1/cache/l3").await
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use k8s_openapi::api::apps::v1::DaemonSetSpec;
    use k8s_openapi::api::core::v1::Container;
    use k8s_openapi::api::core::v1::ContainerPort;
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::api::core::v1::PodTemplateSpec;
    use similar_asserts::assert_eq;
    use test_log::test;
    use wiremock::matchers::body_json;
    use wiremock::matchers::method;
    use wiremock::matchers::path;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    use super::*;
    use crate::daemon::failure_summary;

    fn daemon_set_with_port(port: i32) -> DaemonSet {
        DaemonSet {
            spec: Some(DaemonSetSpec {
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: "rmd".to_string(),
                            ports: Some(vec![ContainerPort {
                                container_port: port,
                                ..Default::default()
                            }]),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn fixture_paths(set: &str) -> TlsPaths {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata").join(set);
        TlsPaths {
            cert: dir.join("cert.pem"),
            key: dir.join("key.pem"),
            ca: dir.join("ca.pem"),
        }
    }

    fn entry(id: &str, uuid: &str) -> DaemonWorkload {
        DaemonWorkload {
            id: id.to_string(),
            uuid: uuid.to_string(),
            core_ids: vec!["2".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn tls_port_with_strong_key_yields_tls_client() {
        let client =
            DaemonClient::from_daemon_set(&daemon_set_with_port(8443), &fixture_paths("strong"))
                .unwrap();
        assert!(client.is_tls());
        assert_eq!(client.address_prefix(), "https://");
    }

    #[test]
    fn tls_port_with_weak_key_falls_back_to_plaintext() {
        let client =
            DaemonClient::from_daemon_set(&daemon_set_with_port(8443), &fixture_paths("weak"))
                .unwrap();
        assert!(!client.is_tls());
        assert_eq!(client.address_prefix(), "http://");
    }

    #[test]
    fn tls_port_with_missing_material_falls_back_to_plaintext() {
        let paths = TlsPaths {
            cert: "/nonexistent/cert.pem".into(),
            key: "/nonexistent/key.pem".into(),
            ca: "/nonexistent/ca.pem".into(),
        };
        let client = DaemonClient::from_daemon_set(&daemon_set_with_port(8443), &paths).unwrap();
        assert!(!client.is_tls());
    }

    #[test]
    fn other_port_yields_plaintext_client() {
        let client =
            DaemonClient::from_daemon_set(&daemon_set_with_port(8081), &fixture_paths("strong"))
                .unwrap();
        assert!(!client.is_tls());
    }

    #[test(tokio::test)]
    async fn get_workloads_decodes_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/workloads"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(vec![entry("1", "a"), entry("2", "b")]),
            )
            .mount(&server)
            .await;

        let client = DaemonClient::plain().unwrap();
        let entries = client.get_workloads(&server.uri()).await.unwrap();
        assert_eq!(entries, vec![entry("1", "a"), entry("2", "b")]);
    }

    #[test(tokio::test)]
    async fn create_accepts_created_and_ok() {
        let server = MockServer::start().await;
        let body = entry("", "wl");
        Mock::given(method("POST"))
            .and(path("/v1/workloads"))
            .and(body_json(&body))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let client = DaemonClient::plain().unwrap();
        let summary = client.create_workload(&server.uri(), &body).await.unwrap();
        assert_eq!(summary, "Success: 201");
    }

    #[test(tokio::test)]
    async fn create_rejection_yields_summary_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/workloads"))
            .respond_with(ResponseTemplate::new(400).set_body_string("no cache ways left\n"))
            .mount(&server)
            .await;

        let client = DaemonClient::plain().unwrap();
        let err = client
            .create_workload(&server.uri(), &entry("", "wl"))
            .await
            .unwrap_err();
        assert_eq!(failure_summary(&err), "Fail: 400 no cache ways left");
    }

    #[test(tokio::test)]
    async fn update_only_accepts_ok() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/v1/workloads/7"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let client = DaemonClient::plain().unwrap();
        let err = client
            .update_workload(&server.uri(), "7", &entry("7", "wl"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            DaemonError::Rejected { status: 201, .. }
        ));
    }

    #[test(tokio::test)]
    async fn delete_hits_entry_path() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/workloads/7"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = DaemonClient::plain().unwrap();
        client.delete_workload(&server.uri(), "7").await.unwrap();
    }

    #[test(tokio::test)]
    async fn l3_cache_total_from_daemon() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/cache/l3"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"rdt":true,"caches":{"0":{"available_ways":"7ff"},"1":{"available_ways":"7ff"}}}"#,
            ))
            .mount(&server)
            .await;

        let client = DaemonClient::plain().unwrap();
        let info = client.get_l3_cache(&server.uri()).await.unwrap();
        assert_eq!(info.available_ways_total().unwrap(), 4094);
    }

    #[test(tokio::test)]
    async fn bad_address_fails_request_creation() {
        let client = DaemonClient::plain().unwrap();
        let err = client.get_workloads("not a url").await.unwrap_err();
        assert_eq!(failure_summary(&err), "failed to create request");
    }

    #[test(tokio::test)]
    async fn unreachable_daemon_is_a_transport_error() {
        let client = DaemonClient::plain().unwrap();
        let err = client
            .get_workloads("http://127.0.0.1:1")
            .await
            .unwrap_err();
        assert!(matches!(err.current_context(), DaemonError::Transport { .. }));
    }
}

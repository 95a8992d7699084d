//! Build-server client for deploying release candidates and production
//! builds.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::BuildServerConfig;
use crate::domain::error::{MaintenanceError, Result};
use crate::domain::manifest::DependencyManifest;
use crate::domain::version::SimVersion;

const API_VERSION: &str = "2.0";
const DEPLOY_PATH: &str = "deploy-release";

/// Deployment target of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetServer {
    Dev,
    Production,
}

/// One build to queue on the build server.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRequest {
    pub repo: String,
    pub branch: String,
    pub version: SimVersion,
    pub brands: Vec<String>,
    /// `["*"]` builds every locale.
    pub locales: Vec<String>,
    pub servers: Vec<TargetServer>,
    /// Manifest of the release branch at the pushed commit.
    pub dependencies: DependencyManifest,
}

/// Wire body posted to the build server.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildRequestBody<'a> {
    api: &'a str,
    sim_name: &'a str,
    branch: &'a str,
    version: String,
    brands: &'a [String],
    locales: &'a [String],
    servers: &'a [TargetServer],
    dependencies: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_code: Option<&'a str>,
}

/// The build server queued the request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BuildAccepted {
    #[serde(default)]
    pub message: Option<String>,
}

/// Submits builds. Returns only once the server has accepted the request.
#[async_trait]
pub trait BuildTrigger: Send + Sync {
    async fn trigger(&self, request: &BuildRequest) -> Result<BuildAccepted>;
}

/// [`BuildTrigger`] posting JSON to `<url>/deploy-release`.
pub struct HttpBuildTrigger {
    config: BuildServerConfig,
    http_client: reqwest::Client,
}

impl HttpBuildTrigger {
    pub fn new(config: BuildServerConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("relmaint/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/{DEPLOY_PATH}", self.config.url.trim_end_matches('/'))
    }
}

#[async_trait]
impl BuildTrigger for HttpBuildTrigger {
    async fn trigger(&self, request: &BuildRequest) -> Result<BuildAccepted> {
        let body = BuildRequestBody {
            api: API_VERSION,
            sim_name: &request.repo,
            branch: &request.branch,
            version: request.version.to_string(),
            brands: &request.brands,
            locales: &request.locales,
            servers: &request.servers,
            dependencies: request.dependencies.to_value(),
            authorization_code: self.config.token.as_deref(),
        };
        let url = self.endpoint();
        info!(repo = %request.repo, version = %request.version, %url, "queueing build");

        let response = self.http_client.post(&url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        debug!(%status, body = %text, "build server response");

        match status.as_u16() {
            200..=299 => Ok(serde_json::from_str(&text).unwrap_or_default()),
            401 | 403 => Err(MaintenanceError::Authorization(format!("{status}: {text}"))),
            400 | 422 => Err(MaintenanceError::Validation(format!("{status}: {text}"))),
            _ => {
                warn!(%status, "build server error");
                Err(MaintenanceError::Http(format!("{url} returned {status}: {text}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn server_responding(response: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/deploy-release"))
            .respond_with(response)
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    fn request() -> BuildRequest {
        let mut dependencies = DependencyManifest::new();
        dependencies
            .set("demo", "1.2", "a".repeat(40))
            .unwrap();
        BuildRequest {
            repo: "demo".to_string(),
            branch: "1.2".to_string(),
            version: SimVersion::new(1, 2, 3).with_test("rc", 1),
            brands: vec!["phet".to_string()],
            locales: vec!["en".to_string()],
            servers: vec![TargetServer::Dev],
            dependencies,
        }
    }

    fn trigger(url: String, token: Option<&str>) -> HttpBuildTrigger {
        HttpBuildTrigger::new(BuildServerConfig {
            url,
            token: token.map(str::to_string),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn accepted_request_posts_expected_body() {
        let server = server_responding(
            ResponseTemplate::new(202).set_body_string(r#"{"message":"queued"}"#),
        )
        .await;
        let accepted = trigger(server.uri(), Some("sekrit"))
            .trigger(&request())
            .await
            .unwrap();
        assert_eq!(accepted.message.as_deref(), Some("queued"));

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        let json: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(json["api"], API_VERSION);
        assert_eq!(json["simName"], "demo");
        assert_eq!(json["version"], "1.2.3-rc.1");
        assert_eq!(json["servers"], serde_json::json!(["dev"]));
        assert_eq!(json["authorizationCode"], "sekrit");
        assert_eq!(json["dependencies"]["demo"]["branch"], "1.2");
    }

    #[tokio::test]
    async fn missing_token_is_omitted() {
        let server = server_responding(ResponseTemplate::new(200)).await;
        let accepted = trigger(server.uri(), None)
            .trigger(&request())
            .await
            .unwrap();
        assert_eq!(accepted, BuildAccepted::default());

        let received = server.received_requests().await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
        assert!(json.get("authorizationCode").is_none());
    }

    #[tokio::test]
    async fn unauthorized_maps_to_authorization_error() {
        let server = server_responding(ResponseTemplate::new(401).set_body_string("bad token")).await;
        let err = trigger(server.uri(), None).trigger(&request()).await.unwrap_err();
        assert!(matches!(err, MaintenanceError::Authorization(_)));
    }

    #[tokio::test]
    async fn bad_request_maps_to_validation_error() {
        let server = server_responding(ResponseTemplate::new(400).set_body_string("unknown brand")).await;
        let err = trigger(server.uri(), None).trigger(&request()).await.unwrap_err();
        match err {
            MaintenanceError::Validation(msg) => assert!(msg.contains("unknown brand")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn server_error_maps_to_http_error() {
        let server = server_responding(ResponseTemplate::new(500).set_body_string("boom")).await;
        let err = trigger(server.uri(), None).trigger(&request()).await.unwrap_err();
        assert!(matches!(err, MaintenanceError::Http(_)));
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let t = trigger("https://builds.test/".to_string(), None);
        assert_eq!(t.endpoint(), "https://builds.test/deploy-release");
    }
}

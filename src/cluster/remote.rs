//! HTTP 越しのクラスタリングオラクル（スペクトラルクラスタリング等）のクライアント。
use std::time::Duration;

use async_trait::async_trait;
use ndarray::Array2;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ClusterEngine, ClusterParams};
use crate::error::{PipelineError, Result};

const AFFINITY: &str = "nearest_neighbors";
const MAX_ERROR_MESSAGE_LENGTH: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteClusterConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl RemoteClusterConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Serialize)]
struct FitPredictRequest {
    matrix: Vec<Vec<f64>>,
    n_clusters: usize,
    affinity: &'static str,
    n_neighbors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    random_state: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FitPredictResponse {
    labels: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct RemoteClusterClient {
    client: Client,
    endpoint: Url,
}

/// エラーメッセージを切り詰める。
fn truncate_error_message(msg: &str) -> String {
    let char_count = msg.chars().count();
    if char_count <= MAX_ERROR_MESSAGE_LENGTH {
        return msg.to_string();
    }
    let truncated: String = msg.chars().take(MAX_ERROR_MESSAGE_LENGTH).collect();
    format!("{truncated}... (truncated, {char_count} chars)")
}

impl RemoteClusterClient {
    /// # Errors
    /// URL が不正な場合、または HTTP クライアントを構築できない場合は
    /// [`PipelineError::Configuration`] を返す。
    pub fn new(config: &RemoteClusterConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| {
                PipelineError::Configuration(format!("failed to build cluster client: {error}"))
            })?;

        let endpoint = Url::parse(&config.base_url)
            .and_then(|base| base.join("v1/cluster"))
            .map_err(|error| {
                PipelineError::Configuration(format!(
                    "invalid cluster base URL {}: {error}",
                    config.base_url
                ))
            })?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl ClusterEngine for RemoteClusterClient {
    async fn fit_predict(
        &self,
        matrix: &Array2<f64>,
        params: &ClusterParams,
    ) -> Result<Vec<usize>> {
        let payload = FitPredictRequest {
            matrix: matrix.rows().into_iter().map(|row| row.to_vec()).collect(),
            n_clusters: params.k,
            affinity: AFFINITY,
            n_neighbors: params.n_neighbors,
            random_state: params.seed,
        };

        debug!(
            endpoint = %self.endpoint,
            rows = matrix.nrows(),
            k = params.k,
            "sending matrix to clustering oracle"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                PipelineError::Clustering(format!("clustering request failed: {error}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::Clustering(format!(
                "clustering oracle returned {status}: {}",
                truncate_error_message(&body)
            )));
        }

        let body: FitPredictResponse = response.json().await.map_err(|error| {
            PipelineError::Clustering(format!("malformed clustering response: {error}"))
        })?;

        body.labels
            .into_iter()
            .enumerate()
            .map(|(row, label)| {
                usize::try_from(label).map_err(|_| {
                    PipelineError::Clustering(format!("negative label {label} for row {row}"))
                })
            })
            .collect()
    }

    fn name(&self) -> &str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> RemoteClusterClient {
        RemoteClusterClient::new(&RemoteClusterConfig::new(format!("{}/", server.uri())))
            .expect("client builds")
    }

    #[tokio::test]
    async fn posts_matrix_and_parameters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/cluster"))
            .and(body_partial_json(json!({
                "matrix": [[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]],
                "n_clusters": 2,
                "affinity": "nearest_neighbors",
                "n_neighbors": 1,
                "random_state": 9
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"labels": [0, 1, 0]})))
            .expect(1)
            .mount(&server)
            .await;

        let params = ClusterParams::for_rows(3, 2).with_seed(Some(9));
        let labels = client(&server)
            .fit_predict(&array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]], &params)
            .await
            .expect("oracle responds");
        assert_eq!(labels, vec![0, 1, 0]);
    }

    #[tokio::test]
    async fn error_status_is_clustering_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/cluster"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let error = client(&server)
            .fit_predict(&array![[1.0], [0.0]], &ClusterParams::for_rows(2, 1))
            .await
            .expect_err("server error");
        assert!(matches!(error, PipelineError::Clustering(ref message) if message.contains("boom")));
    }

    #[tokio::test]
    async fn negative_labels_are_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/cluster"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"labels": [0, -1]})))
            .mount(&server)
            .await;

        let error = client(&server)
            .fit_predict(&array![[1.0], [0.0]], &ClusterParams::for_rows(2, 1))
            .await
            .expect_err("noise label");
        assert!(matches!(error, PipelineError::Clustering(_)));
    }

    #[test]
    fn truncates_long_error_messages() {
        let long = "x".repeat(600);
        let truncated = truncate_error_message(&long);
        assert!(truncated.ends_with("(truncated, 600 chars)"));
    }
}

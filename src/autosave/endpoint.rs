//! Manual "save to server" endpoint

use crate::graph::{GraphDocument, GraphModel};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Persists the canonical graph server-side
#[async_trait]
pub trait SaveEndpoint: Send + Sync {
    async fn save(&self, session_id: &str, graph: &GraphModel) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveRequest<'a> {
    session_id: &'a str,
    #[serde(flatten)]
    graph: GraphDocument,
}

/// POSTs `{sessionId, nodes, edges}` as JSON to a fixed URL
#[derive(Clone)]
pub struct HttpSaveEndpoint {
    client: reqwest::Client,
    url: String,
}

impl HttpSaveEndpoint {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SaveEndpoint for HttpSaveEndpoint {
    async fn save(&self, session_id: &str, graph: &GraphModel) -> Result<()> {
        let body = SaveRequest {
            session_id,
            graph: graph.to_document(),
        };
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Save rejected with {}: {}", status, text);
        }
        debug!(url = %self.url, session_id = %session_id, "Graph saved to server");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Mutation, Node, Position};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn graph() -> GraphModel {
        let mut graph = GraphModel::new();
        graph
            .apply_all(&[Mutation::InsertNode(
                Node::new("script", Position::default()).with_id("n1"),
            )])
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn test_save_posts_graph() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/pipelines/save"))
            .and(body_partial_json(serde_json::json!({
                "sessionId": "s1",
                "nodes": [{"id": "n1", "type": "script"}],
                "edges": []
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let endpoint = HttpSaveEndpoint::new(format!("{}/api/pipelines/save", server.uri())).unwrap();
        endpoint.save("s1", &graph()).await.unwrap();
    }

    #[tokio::test]
    async fn test_save_error_status_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_string("version conflict"))
            .mount(&server)
            .await;

        let endpoint = HttpSaveEndpoint::new(server.uri()).unwrap();
        let err = endpoint.save("s1", &graph()).await.unwrap_err();
        assert!(err.to_string().contains("409"));
        assert!(err.to_string().contains("version conflict"));
    }
}

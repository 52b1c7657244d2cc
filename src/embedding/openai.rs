use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::EmbeddingModel;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Chunks sent to the embeddings endpoint per request.
const INGEST_BATCH_SIZE: usize = 100;

/// OpenAI embeddings client. The configured dimension count is the same
/// global constant the vector store's table is created with, so every
/// response is validated against it before anything is persisted.
pub struct OpenAIEmbeddingModel {
    model_name: String,
    api_key: String,
    dimensions: u32,
    api_base: String,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAIEmbeddingModel {
    pub fn new(model_name: &str, api_key: &str, dimensions: u32) -> Self {
        Self {
            model_name: model_name.to_string(),
            api_key: api_key.to_string(),
            dimensions,
            api_base: OPENAI_API_BASE.to_string(),
            http_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Point the client at an OpenAI-compatible endpoint.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model_name,
            input: texts,
        };

        let resp = self
            .http_client
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("embedding API error ({status}): {body}");
        }

        let response: EmbeddingResponse = resp.json().await?;
        if response.data.len() != texts.len() {
            anyhow::bail!(
                "embedding API returned {} vectors for {} inputs",
                response.data.len(),
                texts.len()
            );
        }

        let embeddings: Vec<Vec<f32>> =
            response.data.into_iter().map(|d| d.embedding).collect();
        for emb in &embeddings {
            if emb.len() != self.dimensions as usize {
                anyhow::bail!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dimensions,
                    emb.len()
                );
            }
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingModel for OpenAIEmbeddingModel {
    async fn embed_for_ingestion(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(INGEST_BATCH_SIZE) {
            all_embeddings.extend(self.embed_batch(batch).await?);
        }
        Ok(all_embeddings)
    }

    async fn embed_for_query(&self, query: &str) -> anyhow::Result<Vec<f32>> {
        let results = self.embed_batch(&[query.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no embedding returned for query"))
    }

    fn dimensions(&self) -> u32 {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_request_serialization() {
        let input = vec!["hello world".to_string()];
        let req = EmbeddingRequest {
            model: "text-embedding-3-small",
            input: &input,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "text-embedding-3-small");
        assert_eq!(json["input"][0], "hello world");
    }

    #[test]
    fn test_embedding_response_deserialization() {
        let json = r#"{
            "data": [
                {"embedding": [0.1, 0.2, 0.3], "index": 0, "object": "embedding"}
            ],
            "model": "text-embedding-3-small",
            "object": "list",
            "usage": {"prompt_tokens": 2, "total_tokens": 2}
        }"#;
        let resp: EmbeddingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.data.len(), 1);
        assert_eq!(resp.data[0].embedding.len(), 3);
    }

    #[test]
    fn test_with_api_base_strips_trailing_slash() {
        let model =
            OpenAIEmbeddingModel::new("m", "k", 3).with_api_base("http://localhost:8081/v1/");
        assert_eq!(model.api_base, "http://localhost:8081/v1");
    }
}

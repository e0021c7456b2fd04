//! Voyage AI embeddings provider using the `/v1/embeddings` endpoint.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::{
    embedding::{EmbeddingIntent, EmbeddingProvider, TokenUsage},
    error::{Error, Result},
};

const DEFAULT_BASE_URL: &str = "https://api.voyageai.com";
const DEFAULT_MODEL: &str = "voyage-2";
const DEFAULT_DIMENSIONS: usize = 1024;

/// Environment variable holding the API key for [`VoyageProvider::from_env`].
pub const API_KEY_ENV: &str = "VOYAGE_API_KEY";

pub struct VoyageProvider {
    client: reqwest::Client,
    api_key: secrecy::Secret<String>,
    base_url: String,
    model: String,
    dims: usize,
}

fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn embeddings_endpoint(base_url: &str) -> String {
    let normalized = normalize_base_url(base_url);
    if normalized.ends_with("/embeddings") {
        return normalized;
    }
    if normalized.ends_with("/v1") {
        return format!("{normalized}/embeddings");
    }
    format!("{normalized}/v1/embeddings")
}

impl VoyageProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: secrecy::Secret::new(api_key),
            base_url: normalize_base_url(DEFAULT_BASE_URL),
            model: DEFAULT_MODEL.to_string(),
            dims: DEFAULT_DIMENSIONS,
        }
    }

    /// Build a provider from `VOYAGE_API_KEY`.
    ///
    /// A missing key is a fatal configuration error, surfaced immediately
    /// rather than on the first embedding call.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| Error::Config(format!("{API_KEY_ENV} is not set")))?;
        if api_key.trim().is_empty() {
            return Err(Error::Config(format!("{API_KEY_ENV} is empty")));
        }
        Ok(Self::new(api_key))
    }

    pub fn with_model(mut self, model: String, dims: usize) -> Self {
        self.model = model;
        self.dims = dims;
        self
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = normalize_base_url(&url);
        self
    }
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    input_type: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for VoyageProvider {
    async fn embed(&self, texts: &[String], intent: EmbeddingIntent) -> Result<Vec<Vec<f32>>> {
        let req = EmbeddingRequest {
            model: self.model.clone(),
            input: texts.to_vec(),
            input_type: intent.as_str().to_string(),
        };

        let provider_err = |message: String| Error::Provider {
            message,
            usage: TokenUsage::default(),
        };

        let resp = self
            .client
            .post(embeddings_endpoint(&self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&req)
            .send()
            .await
            .map_err(|e| provider_err(e.to_string()))?
            .error_for_status()
            .map_err(|e| provider_err(e.to_string()))?
            .json::<EmbeddingResponse>()
            .await
            .map_err(|e| provider_err(format!("malformed embedding response: {e}")))?;

        Ok(resp.data.into_iter().map(|d| d.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

//! Client for the external vision API (keyword/color extraction and
//! captioning). Only the request/response contract is modeled here; the
//! service itself is an external collaborator.

use serde::Deserialize;
use std::time::Duration;

use crate::config::VisionConfig;

#[derive(thiserror::Error, Debug)]
pub enum VisionError {
    #[error("vision api request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("vision api misconfigured: {0}")]
    Config(String),
}

/// What enrichment extracted for one image.
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    pub keywords: Vec<String>,
    pub colors: Vec<String>,
    pub caption: Option<String>,
}

/// Seam for the vision service so enrichment can run against a stub in
/// tests.
pub trait VisionApi: Send + Sync {
    fn analyze(&self, image_url: &str) -> Result<Enrichment, VisionError>;
}

#[derive(Deserialize)]
struct KeywordEntry {
    keyword: String,
}

#[derive(Deserialize)]
struct ColorEntry {
    hex: String,
}

#[derive(Deserialize)]
struct KeywordsResponse {
    status: Option<String>,
    #[serde(default)]
    keywords: Vec<KeywordEntry>,
    #[serde(default)]
    colors: Vec<ColorEntry>,
}

#[derive(Deserialize)]
struct CaptionResult {
    caption: Option<String>,
}

#[derive(Deserialize)]
struct CaptionResponse {
    status: Option<String>,
    result: Option<CaptionResult>,
}

/// Stand-in when the real client cannot be built (missing credentials or
/// TLS init failure). Every analysis fails, which marks the record failed.
pub struct VisionUnavailable(pub String);

impl VisionApi for VisionUnavailable {
    fn analyze(&self, _image_url: &str) -> Result<Enrichment, VisionError> {
        Err(VisionError::Config(self.0.clone()))
    }
}

pub struct VisionClient {
    http: reqwest::blocking::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    num_keywords: u8,
    num_colors: u8,
    lang: String,
}

impl VisionClient {
    pub fn new(config: &VisionConfig) -> Result<Self, VisionError> {
        if config.base_url.is_empty() {
            return Err(VisionError::Config("vision.base_url is empty".to_string()));
        }

        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            num_keywords: config.num_keywords,
            num_colors: config.num_colors,
            lang: config.lang.clone(),
        })
    }

    fn keywords_by_url(&self, image_url: &str) -> Result<KeywordsResponse, VisionError> {
        let num_keywords = self.num_keywords.to_string();
        let num_colors = self.num_colors.to_string();

        let response = self
            .http
            .get(format!("{}/keywords", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .query(&[
                ("url", image_url),
                ("num_keywords", num_keywords.as_str()),
                ("colors", "true"),
                ("num_colors", num_colors.as_str()),
                ("lang", self.lang.as_str()),
            ])
            .send()?
            .error_for_status()?;

        Ok(response.json()?)
    }

    fn captions_by_url(&self, image_url: &str) -> Result<CaptionResponse, VisionError> {
        let response = self
            .http
            .get(format!("{}/image_captioning", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .query(&[("url", image_url)])
            .send()?
            .error_for_status()?;

        Ok(response.json()?)
    }
}

impl VisionApi for VisionClient {
    fn analyze(&self, image_url: &str) -> Result<Enrichment, VisionError> {
        let keywording = self.keywords_by_url(image_url)?;
        let captioning = self.captions_by_url(image_url)?;

        let mut enrichment = Enrichment::default();

        if keywording.status.as_deref() == Some("ok") {
            enrichment.keywords = keywording.keywords.into_iter().map(|k| k.keyword).collect();
            enrichment.colors = keywording.colors.into_iter().map(|c| c.hex).collect();
            log::info!(
                "extracted {} keywords and {} colors",
                enrichment.keywords.len(),
                enrichment.colors.len()
            );
        }

        if captioning.status.is_some() {
            enrichment.caption = captioning.result.and_then(|r| r.caption);
        }

        Ok(enrichment)
    }
}

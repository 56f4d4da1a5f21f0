use std::time::Duration;

use serde::{Deserialize, Serialize};
use tia_core::error::AppError;

/// Candidate snippet returned by an external search collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebSnippet {
    pub title: String,
    pub snippet: String,
    pub url: String,
    #[serde(default)]
    pub relevance: Option<f32>,
}

/// External search collaborator. Callers treat every error as zero results.
pub trait WebEvidenceProvider: Send + Sync {
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSnippet>, AppError>;
}

/// Listings of national agricultural institutes, matched by containment of query words
/// at least two characters long.
#[derive(Debug, Clone)]
pub struct StaticWebDirectory {
    listings: Vec<WebSnippet>,
}

impl Default for StaticWebDirectory {
    fn default() -> Self {
        let listing = |title: &str, snippet: &str, url: &str, relevance: f32| WebSnippet {
            title: title.to_string(),
            snippet: snippet.to_string(),
            url: url.to_string(),
            relevance: Some(relevance),
        };
        Self {
            listings: vec![
                listing(
                    "Bangladesh Rice Research Institute (BRRI)",
                    "Latest research and recommendations for rice cultivation in Bangladesh",
                    "http://brri.gov.bd",
                    0.9,
                ),
                listing(
                    "Department of Agricultural Extension (DAE)",
                    "Government agricultural extension services and farmer guidance",
                    "http://dae.gov.bd",
                    0.8,
                ),
                listing(
                    "Bangladesh Agricultural Research Council",
                    "Agricultural research and development for sustainable farming",
                    "http://barc.gov.bd",
                    0.7,
                ),
            ],
        }
    }
}

impl StaticWebDirectory {
    pub fn with_listings(listings: Vec<WebSnippet>) -> Self {
        Self { listings }
    }
}

impl WebEvidenceProvider for StaticWebDirectory {
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSnippet>, AppError> {
        let words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .filter(|w| w.chars().count() > 1)
            .collect();
        Ok(self
            .listings
            .iter()
            .filter(|l| {
                let text = format!("{} {}", l.title, l.snippet).to_lowercase();
                words.iter().any(|w| text.contains(w.as_str()))
            })
            .take(max_results)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<WebSnippet>,
}

/// JSON search endpoint: `GET <endpoint>?q=<query>&limit=<n>` answering
/// `{"results": [{"title", "snippet", "url", "relevance"?}]}`.
#[derive(Debug, Clone)]
pub struct HttpWebSearch {
    endpoint: String,
    timeout: Duration,
}

impl HttpWebSearch {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, AppError> {
        let endpoint = endpoint.trim().trim_end_matches('/').to_string();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(AppError::new(
                "CONFIG_WEB_SEARCH_URL_INVALID",
                "Web search endpoint must be an http(s) URL",
            )
            .with_details(format!("endpoint={endpoint}")));
        }
        Ok(Self { endpoint, timeout })
    }
}

impl WebEvidenceProvider for HttpWebSearch {
    fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebSnippet>, AppError> {
        let resp = ureq::get(&self.endpoint)
            .query("q", query)
            .query("limit", &max_results.to_string())
            .timeout(self.timeout)
            .call();

        match resp {
            Ok(r) if r.status() == 200 => {
                let body: SearchResponse = r.into_json().map_err(|e| {
                    AppError::evidence_unavailable("Failed to decode web search response")
                        .with_details(e.to_string())
                })?;
                let mut results = body.results;
                results.truncate(max_results);
                Ok(results)
            }
            Ok(r) => Err(AppError::evidence_unavailable("Web search request failed")
                .with_details(format!("status={}", r.status()))),
            Err(ureq::Error::Status(code, _)) => {
                Err(AppError::evidence_unavailable("Web search request failed")
                    .with_details(format!("status={code}")))
            }
            Err(e) => Err(AppError::evidence_unavailable("Failed to reach web search endpoint")
                .with_details(e.to_string())
                .with_retryable(true)),
        }
    }
}

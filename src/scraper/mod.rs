pub mod cleaner;
pub mod http_client;
pub mod parsers;

use crate::config::ScraperConfig;
use crate::error::FetchError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use self::http_client::HttpClient;

// ── Source trait ──────────────────────────────────────────────────────────────

/// Raw upstream documents. One call is one request; no retries, no parsing
/// beyond the envelope.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// One page of a user's timeline (`data.cards`).
    async fn timeline_page(&self, user_id: u64, page: u32) -> Result<Value, FetchError>;

    /// The profile document (`data.userInfo`).
    async fn profile(&self, user_id: u64) -> Result<Value, FetchError>;

    /// The HTML detail page of one post, with the full long-form body embedded.
    async fn post_detail(&self, post_id: i64) -> Result<String, FetchError>;

    /// One page of keyword-search results.
    async fn search_page(&self, keyword: &str, page: u32) -> Result<Value, FetchError>;
}

// ── m.weibo.cn ────────────────────────────────────────────────────────────────

const TIMELINE_PREFIX: &str = "107603";
const PROFILE_PREFIX: &str = "100505";

pub struct WeiboApi {
    client: HttpClient,
    base_url: Url,
}

impl WeiboApi {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let base = format!("{}/", config.base_url.trim_end_matches('/'));
        Ok(Self {
            client: HttpClient::new(config)?,
            base_url: Url::parse(&base)
                .with_context(|| format!("Invalid base_url {:?}", config.base_url))?,
        })
    }

    /// `/api/container/getIndex?...`
    fn index_url(&self, params: &[(&str, String)]) -> Result<String, FetchError> {
        let mut url = self
            .base_url
            .join("api/container/getIndex")
            .map_err(|e| FetchError::Transport {
                page: None,
                message: e.to_string(),
            })?;
        url.query_pairs_mut()
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())));
        Ok(url.into())
    }

    fn detail_url(&self, post_id: i64) -> Result<String, FetchError> {
        self.base_url
            .join(&format!("detail/{}", post_id))
            .map(String::from)
            .map_err(|e| FetchError::Transport {
                page: None,
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl FeedSource for WeiboApi {
    async fn timeline_page(&self, user_id: u64, page: u32) -> Result<Value, FetchError> {
        let url = self.index_url(&[
            ("containerid", format!("{}{}", TIMELINE_PREFIX, user_id)),
            ("page", page.to_string()),
        ])?;
        self.client.get_json(&url, Some(page)).await
    }

    async fn profile(&self, user_id: u64) -> Result<Value, FetchError> {
        let url = self.index_url(&[("containerid", format!("{}{}", PROFILE_PREFIX, user_id))])?;
        self.client.get_json(&url, None).await
    }

    async fn post_detail(&self, post_id: i64) -> Result<String, FetchError> {
        let url = self.detail_url(post_id)?;
        self.client.get_text(&url, None).await
    }

    async fn search_page(&self, keyword: &str, page: u32) -> Result<Value, FetchError> {
        let url = self.index_url(&[
            ("type", "wb".to_string()),
            ("queryVal", keyword.to_string()),
            ("containerid", format!("100103type=2&q={}", keyword)),
            ("page", page.to_string()),
        ])?;
        self.client.get_json(&url, Some(page)).await
    }
}

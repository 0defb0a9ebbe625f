use crate::config::ScraperConfig;
use crate::error::FetchError;
use anyhow::{Context, Result};
use rand::Rng;
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Thin reqwest wrapper: one call, one request. Retries belong to the caller.
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            // m.weibo.cn hands out a guest cookie on the first response
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { inner })
    }

    /// Fetch a URL as text. The body is decoded lossily so a charset mismatch
    /// never fails the request.
    pub async fn get_text(&self, url: &str, page: Option<u32>) -> Result<String, FetchError> {
        debug!("GET {}", url);

        let resp = self
            .inner
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                page,
                message: e.to_string(),
            })?;

        check_status(resp.status(), url, page)?;

        let bytes = resp.bytes().await.map_err(|e| FetchError::Transport {
            page,
            message: format!("reading body: {}", e),
        })?;

        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Fetch a getIndex document and check its `ok` flag.
    pub async fn get_json(&self, url: &str, page: Option<u32>) -> Result<Value, FetchError> {
        let body = self.get_text(url, page).await?;
        decode_index(&body, page)
    }
}

fn check_status(status: StatusCode, url: &str, page: Option<u32>) -> Result<(), FetchError> {
    if status.is_success() {
        return Ok(());
    }
    Err(FetchError::Status {
        status: status.as_u16(),
        page,
        url: url.to_string(),
    })
}

/// Parse a getIndex body; anything but `ok == 1` is a failed page.
fn decode_index(body: &str, page: Option<u32>) -> Result<Value, FetchError> {
    let js: Value = serde_json::from_str(body).map_err(|e| FetchError::Body {
        page,
        message: e.to_string(),
    })?;

    let ok = js.get("ok").and_then(ok_flag).unwrap_or(0);
    if ok != 1 {
        return Err(FetchError::NotOk { page, ok });
    }

    Ok(js)
}

/// `ok` shows up as 1/0 on most endpoints and as a bool on a few.
fn ok_flag(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_bool().map(i64::from))
}

// ── Throttle ──────────────────────────────────────────────────────────────────

/// Randomized pause between page requests. Looking less like a script keeps
/// the guest endpoint from rate-limiting the crawl.
#[derive(Debug, Clone)]
pub struct Throttle {
    min_ms: u64,
    max_ms: u64,
}

impl Throttle {
    pub fn new(config: &ScraperConfig) -> Self {
        Self {
            min_ms: config.delay_min_ms,
            max_ms: config.delay_max_ms.max(config.delay_min_ms),
        }
    }

    pub fn next_delay(&self) -> Duration {
        let ms = rand::rng().random_range(self.min_ms..=self.max_ms);
        Duration::from_millis(ms)
    }

    /// Sleep for a fresh random interval. Returns `false` if cancelled first.
    pub async fn pause(&self, cancel: &CancellationToken) -> bool {
        let delay = self.next_delay();
        debug!("Throttling for {:?}", delay);
        tokio::select! {
            _ = sleep(delay) => true,
            _ = cancel.cancelled() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn test_throttle_stays_in_range() {
        let config = AppConfig::default().scraper;
        let throttle = Throttle::new(&config);
        for _ in 0..200 {
            let d = throttle.next_delay();
            assert!(d >= Duration::from_millis(config.delay_min_ms));
            assert!(d <= Duration::from_millis(config.delay_max_ms));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_pause_waits_at_least_min() {
        let config = AppConfig::default().scraper;
        let throttle = Throttle::new(&config);
        let start = tokio::time::Instant::now();
        assert!(throttle.pause(&CancellationToken::new()).await);
        assert!(start.elapsed() >= Duration::from_millis(config.delay_min_ms));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_pause_cancelled() {
        let throttle = Throttle::new(&AppConfig::default().scraper);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!throttle.pause(&cancel).await);
    }

    #[test]
    fn test_check_status() {
        assert!(check_status(StatusCode::OK, "u", Some(1)).is_ok());

        let err = check_status(StatusCode::INTERNAL_SERVER_ERROR, "u", Some(3)).unwrap_err();
        assert!(matches!(
            err,
            FetchError::Status { status: 500, page: Some(3), .. }
        ));
        assert!(err.is_transient());

        let err = check_status(StatusCode::FORBIDDEN, "u", None).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_decode_index() {
        let js = decode_index(r#"{"ok":1,"data":{"cards":[]}}"#, Some(2)).unwrap();
        assert!(js["data"]["cards"].is_array());

        let err = decode_index(r#"{"ok":0,"msg":"这里还没有内容"}"#, Some(4)).unwrap_err();
        assert!(matches!(err, FetchError::NotOk { page: Some(4), ok: 0 }));

        let err = decode_index(r#"{"data":{}}"#, Some(4)).unwrap_err();
        assert!(matches!(err, FetchError::NotOk { ok: 0, .. }));

        let err = decode_index("<html>系统繁忙</html>", Some(5)).unwrap_err();
        assert!(matches!(err, FetchError::Body { page: Some(5), .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_ok_flag() {
        assert_eq!(ok_flag(&serde_json::json!(1)), Some(1));
        assert_eq!(ok_flag(&serde_json::json!(true)), Some(1));
        assert_eq!(ok_flag(&serde_json::json!("1")), None);
    }
}

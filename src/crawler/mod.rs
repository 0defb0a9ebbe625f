//! Per-subject crawl: profile, timeline pages, optional keyword-search hits.
//!
//! Pages of one subject are fetched strictly in order with a randomized pause
//! between them. A failing page or post is logged and skipped; it never ends
//! the crawl. Cancellation is honoured between pages only.

use crate::config::ScraperConfig;
use crate::error::{FetchError, PostError};
use crate::models::{Post, Subject};
use crate::scraper::http_client::Throttle;
use crate::scraper::parsers::{
    card_mblog, extract_detail_status, is_long_text, is_post_card, mblog_created_at, mblog_id,
    parse_mblog, parse_profile, parse_search_page, retweeted_status, timeline_cards,
};
use crate::scraper::FeedSource;
use chrono::{Local, NaiveDateTime};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ── Progress ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum CrawlEvent {
    SubjectStarted {
        user_name: String,
        pages: u32,
    },
    PageFetched {
        user_name: String,
        page: u32,
        of: u32,
        posts: usize,
    },
    PageFailed {
        user_name: String,
        page: u32,
        of: u32,
        reason: String,
    },
    SubjectCompleted {
        user_name: String,
        fetched_count: usize,
    },
}

/// Observer for crawl progress. Purely informational.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: CrawlEvent);
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: CrawlEvent) {}
}

// ── Report ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlReport {
    pub user_name: String,
    pub pages_requested: u32,
    pub pages_ok: u32,
    pub failed_pages: Vec<u32>,
    pub posts_dropped: usize,
    pub reposts_filtered: usize,
    pub related_posts: usize,
    pub profile_error: Option<String>,
    pub cancelled: bool,
}

impl CrawlReport {
    /// Something was lost along the way; the subject's data is incomplete.
    pub fn is_partial(&self) -> bool {
        !self.failed_pages.is_empty()
            || self.posts_dropped > 0
            || self.profile_error.is_some()
            || self.cancelled
    }
}

// ── Post resolution ───────────────────────────────────────────────────────────

/// Turns one post card into a `Post`, following long-form bodies to the
/// detail page and nesting the original under a repost.
pub struct PostResolver<'a> {
    source: &'a dyn FeedSource,
    now: NaiveDateTime,
}

impl<'a> PostResolver<'a> {
    pub fn new(source: &'a dyn FeedSource, now: NaiveDateTime) -> Self {
        Self { source, now }
    }

    pub async fn resolve(&self, card: &Value) -> Result<Post, PostError> {
        let mblog = card_mblog(card)?;

        let mut post = self.resolve_one(mblog).await?;
        post.created_at = mblog_created_at(mblog, self.now)?;

        if let Some(original) = retweeted_status(mblog) {
            let mut inner = self.resolve_one(original).await?;
            inner.created_at = mblog_created_at(original, self.now)?;
            post.retweet = Some(Box::new(inner));
        }

        Ok(post)
    }

    /// Fetch the full body of a truncated post. A detail page without the
    /// embedded status is an error; the post is not rebuilt from the stub.
    pub async fn parse_long_form(&self, post_id: i64) -> Result<Post, PostError> {
        debug!("Long-form post {}, fetching detail", post_id);
        let html = self.source.post_detail(post_id).await?;
        let status = extract_detail_status(&html)?;
        Ok(parse_mblog(&status, self.now)?)
    }

    async fn resolve_one(&self, mblog: &Value) -> Result<Post, PostError> {
        if is_long_text(mblog) {
            self.parse_long_form(mblog_id(mblog)?).await
        } else {
            Ok(parse_mblog(mblog, self.now)?)
        }
    }
}

// ── Crawler ───────────────────────────────────────────────────────────────────

pub struct SubjectCrawler {
    source: Arc<dyn FeedSource>,
    throttle: Throttle,
    max_retries: u32,
    retry_floor: Duration,
    progress: Arc<dyn ProgressSink>,
    reference_now: Option<NaiveDateTime>,
}

impl SubjectCrawler {
    pub fn new(source: Arc<dyn FeedSource>, config: &ScraperConfig) -> Self {
        Self {
            source,
            throttle: Throttle::new(config),
            max_retries: config.max_retries,
            retry_floor: Duration::from_millis(config.delay_min_ms),
            progress: Arc::new(NoProgress),
            reference_now: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Pin "now" for relative timestamps instead of reading the wall clock.
    pub fn with_reference_time(mut self, now: NaiveDateTime) -> Self {
        self.reference_now = Some(now);
        self
    }

    fn now(&self) -> NaiveDateTime {
        self.reference_now
            .unwrap_or_else(|| Local::now().naive_local())
    }

    /// Refresh the profile snapshot (followers, statuses, bio).
    pub async fn load_profile(&self, subject: &mut Subject) -> Result<(), PostError> {
        let user_id = subject.user_id;
        let js = self
            .with_retry(|| self.source.profile(user_id))
            .await?;
        let profile = parse_profile(&js)?;
        subject.apply_profile(&profile);

        info!(
            "{}: {} ({}), {} posts, {} followers, {} following{}",
            subject.user_name,
            subject.screen_name.as_deref().unwrap_or("?"),
            match subject.gender.as_deref() {
                Some("f") => "female",
                Some("m") => "male",
                _ => "unknown",
            },
            fmt_opt(subject.statuses_count),
            fmt_opt(subject.followers_count),
            fmt_opt(subject.follow_count),
            subject
                .verified_reason
                .as_deref()
                .map(|r| format!(", verified: {}", r))
                .unwrap_or_default(),
        );
        Ok(())
    }

    /// Crawl timeline pages `1..=page_count` into `subject`, replacing any
    /// posts from a previous crawl.
    pub async fn crawl(
        &self,
        subject: &mut Subject,
        page_count: u32,
        cancel: &CancellationToken,
    ) -> CrawlReport {
        let mut report = CrawlReport {
            user_name: subject.user_name.clone(),
            pages_requested: page_count,
            ..Default::default()
        };

        subject.reset_posts();
        self.progress.emit(CrawlEvent::SubjectStarted {
            user_name: subject.user_name.clone(),
            pages: page_count,
        });

        for page in 1..=page_count {
            if page > 1 && !self.throttle.pause(cancel).await {
                report.cancelled = true;
                break;
            }
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match self.crawl_page(subject, page, &mut report).await {
                Ok(kept) => {
                    report.pages_ok += 1;
                    debug!("{}: page {}/{} kept {} posts", subject.user_name, page, page_count, kept);
                    self.progress.emit(CrawlEvent::PageFetched {
                        user_name: subject.user_name.clone(),
                        page,
                        of: page_count,
                        posts: kept,
                    });
                }
                Err(e) => {
                    warn!("{}: page {} failed: {}", subject.user_name, page, e);
                    report.failed_pages.push(page);
                    self.progress.emit(CrawlEvent::PageFailed {
                        user_name: subject.user_name.clone(),
                        page,
                        of: page_count,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if report.cancelled {
            info!("{}: cancelled after {} pages", subject.user_name, report.pages_ok);
        }
        info!("{}: crawl finished, {} posts", subject.user_name, subject.fetched_count);

        self.progress.emit(CrawlEvent::SubjectCompleted {
            user_name: subject.user_name.clone(),
            fetched_count: subject.fetched_count,
        });
        report
    }

    /// Collect keyword-search hits for the subject's name into `related_posts`.
    pub async fn collect_related(
        &self,
        subject: &mut Subject,
        pages: u32,
        cancel: &CancellationToken,
        report: &mut CrawlReport,
    ) {
        let mut hits = Vec::new();

        for page in 1..=pages {
            if !self.throttle.pause(cancel).await {
                report.cancelled = true;
                break;
            }

            let keyword = subject.user_name.as_str();
            let result = self
                .with_retry(|| self.source.search_page(keyword, page))
                .await
                .map_err(PostError::from)
                .and_then(|js| parse_search_page(&js).map_err(PostError::from));

            match result {
                Ok(found) => {
                    debug!("{}: search page {} → {} hits", keyword, page, found.len());
                    hits.extend(found);
                }
                Err(e) => warn!("{}: search page {} failed: {}", keyword, page, e),
            }
        }

        report.related_posts = hits.len();
        subject.related_posts = hits;
    }

    async fn crawl_page(
        &self,
        subject: &mut Subject,
        page: u32,
        report: &mut CrawlReport,
    ) -> Result<usize, PostError> {
        let user_id = subject.user_id;
        let js = self
            .with_retry(|| self.source.timeline_page(user_id, page))
            .await?;
        let cards = timeline_cards(&js)?;

        let resolver = PostResolver::new(self.source.as_ref(), self.now());
        let mut kept = 0usize;

        for card in cards.iter().filter(|c| is_post_card(c)) {
            let post = match resolver.resolve(card).await {
                Ok(p) => p,
                Err(e) => {
                    warn!("{}: dropping post on page {}: {}", subject.user_name, page, e);
                    report.posts_dropped += 1;
                    continue;
                }
            };

            if subject.filter && post.is_repost() {
                report.reposts_filtered += 1;
                continue;
            }

            subject.push_post(post);
            kept += 1;
        }

        Ok(kept)
    }

    /// Retry transient failures (429, 5xx, network) with jittered exponential
    /// backoff. No retry waits less than the inter-page pause floor.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let floor = self.retry_floor;
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(1000)
            .max_delay(Duration::from_secs(30))
            .map(jitter)
            .map(move |d| d.max(floor))
            .take(self.max_retries as usize);

        RetryIf::spawn(strategy, op, |e: &FetchError| {
            let retry = e.is_transient();
            if retry {
                warn!("Transient failure, backing off: {}", e);
            }
            retry
        })
        .await
    }
}

fn fmt_opt(n: Option<u64>) -> String {
    n.map(|v| crate::utils::fmt_number(v as i64))
        .unwrap_or_else(|| "?".to_string())
}

// ── Fixtures ──────────────────────────────────────────────────────────────────


// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::models::SubjectOptions;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::Mutex;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 17)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn subject(filter: bool) -> Subject {
        Subject::new(SubjectOptions {
            user_name: "subject".into(),
            user_id: 1001,
            filter,
            ..Default::default()
        })
        .unwrap()
    }

    fn crawler(source: Arc<FixtureSource>) -> SubjectCrawler {
        SubjectCrawler::new(source, &ScraperConfig::default()).with_reference_time(now())
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<CrawlEvent>>);

    impl ProgressSink for Recorder {
        fn emit(&self, event: CrawlEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_two_pages() {
        let source = Arc::new(two_page_source(1001));
        let mut s = subject(false);

        let report = crawler(source.clone())
            .crawl(&mut s, 2, &CancellationToken::new())
            .await;

        assert_eq!(s.fetched_count, 2);
        assert_eq!(s.posts.len(), 2);
        assert_eq!(report.pages_ok, 2);
        assert!(!report.is_partial());

        let first = &s.posts[0];
        assert_eq!(
            (first.reposts_count, first.comments_count, first.attitudes_count),
            (100, 2_000, 30_000)
        );
        assert_eq!(first.text, "post 1");

        let repost = &s.posts[1];
        assert_eq!(repost.created_at, "2026-10-15");
        let inner = repost.retweet.as_ref().unwrap();
        assert_eq!(inner.id, 3);
        assert_eq!(inner.text, "the whole long-form body");
        assert_eq!(inner.created_at, "2025-12-31");
        assert!(inner.retweet.is_none());

        assert_eq!(
            source.requests(),
            vec!["timeline:1001:1", "timeline:1001:2", "detail:3"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_form_bodies_keep_feed_timestamps() {
        let short_original = mblog(21, "10-01", [json!(0), json!(0), json!(1)], false);
        let mut long_wrapper = mblog(20, "昨天 08:15", [json!(1), json!(1), json!(1)], true);
        long_wrapper["retweeted_status"] = short_original;
        let long_plain = mblog(10, "3小时前", [json!(4), json!(5), json!(6)], true);

        let mut full_plain = mblog(10, "Fri Oct 17 09:00:00 +0800 2026", [json!(4), json!(5), json!(6)], false);
        full_plain["text"] = json!("ten, in full");
        let mut full_wrapper = mblog(20, "Thu Oct 16 08:15:00 +0800 2026", [json!(1), json!(1), json!(1)], false);
        full_wrapper["text"] = json!("twenty, in full");

        let mut source = FixtureSource::default();
        source
            .pages
            .insert((1001, 1), page(vec![long_plain, long_wrapper]));
        source.details.insert(10, detail_html(full_plain));
        source.details.insert(20, detail_html(full_wrapper));
        let source = Arc::new(source);
        let mut s = subject(false);

        crawler(source.clone())
            .crawl(&mut s, 1, &CancellationToken::new())
            .await;

        assert_eq!(s.fetched_count, 2);

        let plain = &s.posts[0];
        assert_eq!(plain.text, "ten, in full");
        assert_eq!(plain.created_at, "2026-10-17");
        assert!(!plain.is_repost());

        let wrapper = &s.posts[1];
        assert_eq!(wrapper.text, "twenty, in full");
        assert_eq!(wrapper.created_at, "2026-10-16");
        let inner = wrapper.retweet.as_ref().unwrap();
        assert_eq!(inner.id, 21);
        assert_eq!(inner.text, "post 21");
        assert_eq!(inner.created_at, "2026-10-01");

        // the short original is taken from the feed as is
        assert_eq!(
            source.requests(),
            vec!["timeline:1001:1", "detail:10", "detail:20"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_filter_excludes_reposts() {
        let source = Arc::new(two_page_source(1001));
        let mut s = subject(true);

        let report = crawler(source).crawl(&mut s, 2, &CancellationToken::new()).await;

        assert_eq!(s.fetched_count, 1);
        assert_eq!(s.posts[0].id, 1);
        assert_eq!(report.reposts_filtered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_throttles_between_pages() {
        let source = Arc::new(two_page_source(1001));
        let mut s = subject(false);
        let start = tokio::time::Instant::now();

        crawler(source).crawl(&mut s, 3, &CancellationToken::new()).await;

        // two pauses of at least 2s each
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_survives_bad_page() {
        let source = Arc::new(two_page_source(1001));
        let mut s = subject(false);

        // page 3 is unknown to the fixture → 404
        let report = crawler(source).crawl(&mut s, 3, &CancellationToken::new()).await;

        assert_eq!(report.failed_pages, vec![3]);
        assert_eq!(report.pages_ok, 2);
        assert_eq!(s.fetched_count, 2);
        assert!(report.is_partial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_crawl_retries_transient_failures() {
        let source = two_page_source(1001);
        source.flaky.lock().unwrap().insert(1, 2);
        let source = Arc::new(source);
        let mut s = subject(false);

        let report = crawler(source.clone())
            .crawl(&mut s, 1, &CancellationToken::new())
            .await;

        assert_eq!(report.pages_ok, 1);
        assert_eq!(s.fetched_count, 1);
        assert_eq!(
            source.requests(),
            vec!["timeline:1001:1", "timeline:1001:1", "timeline:1001:1"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_at_least_pause_floor() {
        let floor = Duration::from_millis(ScraperConfig::default().delay_min_ms);

        for _ in 0..20 {
            let source = two_page_source(1001);
            source.flaky.lock().unwrap().insert(1, 1);
            let mut s = subject(false);
            let start = tokio::time::Instant::now();

            // one page: no inter-page pause, only the retry wait
            let report = crawler(Arc::new(source))
                .crawl(&mut s, 1, &CancellationToken::new())
                .await;

            assert_eq!(report.pages_ok, 1);
            assert!(start.elapsed() >= floor, "retried after {:?}", start.elapsed());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unparseable_long_form_is_dropped() {
        let mut source = two_page_source(1001);
        source.details.insert(3, "<html>系统繁忙</html>".into());
        let source = Arc::new(source);
        let mut s = subject(false);

        let report = crawler(source).crawl(&mut s, 2, &CancellationToken::new()).await;

        assert_eq!(s.fetched_count, 1);
        assert_eq!(report.posts_dropped, 1);
        assert_eq!(report.failed_pages, Vec::<u32>::new());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_at_page_boundary() {
        struct CancelAfterFirst(CancellationToken);
        impl ProgressSink for CancelAfterFirst {
            fn emit(&self, event: CrawlEvent) {
                if let CrawlEvent::PageFetched { page: 1, .. } = event {
                    self.0.cancel();
                }
            }
        }

        let source = Arc::new(two_page_source(1001));
        let cancel = CancellationToken::new();
        let mut s = subject(false);

        let report = crawler(source.clone())
            .with_progress(Arc::new(CancelAfterFirst(cancel.clone())))
            .crawl(&mut s, 2, &cancel)
            .await;

        assert!(report.cancelled);
        assert_eq!(s.fetched_count, 1);
        assert_eq!(source.requests(), vec!["timeline:1001:1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_events() {
        let source = Arc::new(two_page_source(1001));
        let recorder = Arc::new(Recorder::default());
        let mut s = subject(false);

        crawler(source)
            .with_progress(recorder.clone())
            .crawl(&mut s, 2, &CancellationToken::new())
            .await;

        let events = recorder.0.lock().unwrap().clone();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], CrawlEvent::SubjectStarted { pages: 2, .. }));
        assert!(matches!(events[2], CrawlEvent::PageFetched { page: 2, of: 2, posts: 1, .. }));
        assert_eq!(
            events[3],
            CrawlEvent::SubjectCompleted {
                user_name: "subject".into(),
                fetched_count: 2
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_profile() {
        let mut source = FixtureSource::default();
        source.profiles.insert(
            1001,
            json!({"ok": 1, "data": {"userInfo": {
                "screen_name": "某位", "gender": "f", "followers_count": "120万",
                "statuses_count": 3000, "follow_count": 12, "description": "简介\u{200b}"
            }}}),
        );
        let mut s = subject(false);

        crawler(Arc::new(source)).load_profile(&mut s).await.unwrap();

        assert_eq!(s.followers_count, Some(1_200_000));
        assert_eq!(s.statuses_count, Some(3_000));
        assert_eq!(s.description.as_deref(), Some("简介"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_related() {
        let mut source = FixtureSource::default();
        source.search.insert(
            1,
            json!({"ok": 1, "data": {"cards": [{"card_group": [
                {"mblog": {"id": 9, "text": "#话题# 好", "created_at": "刚刚",
                           "reposts_count": 0, "comments_count": 1, "attitudes_count": 2,
                           "user": {"id": 4, "screen_name": "fan"}}}
            ]}]}}),
        );
        let mut s = subject(false);
        let mut report = CrawlReport::default();

        crawler(Arc::new(source))
            .collect_related(&mut s, 2, &CancellationToken::new(), &mut report)
            .await;

        assert_eq!(s.related_posts.len(), 1);
        assert_eq!(s.related_posts[0].text, "好");
        assert_eq!(report.related_posts, 1);
    }
}

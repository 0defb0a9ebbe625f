//! Pipeline orchestrator: ties crawler → scoring together.
//!
//! ## Run
//!
//! `run()`:
//!   1. For each subject (at most `crawl.concurrency` at once): refresh the
//!      profile, crawl timeline pages in order, optionally collect keyword hits.
//!   2. Once every subject is back, score and normalize the whole batch.
//!
//! A subject that fails entirely is reported as skipped; the rest of the batch
//! still gets scored.

use crate::config::AppConfig;
use crate::crawler::{CrawlReport, ProgressSink, SubjectCrawler};
use crate::models::{ScoreRecord, Subject};
use crate::scoring::normalize_batch;
use crate::scraper::FeedSource;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Pipeline {
    config: AppConfig,
    crawler: Arc<SubjectCrawler>,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        source: Arc<dyn FeedSource>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let crawler = SubjectCrawler::new(source, &config.scraper).with_progress(progress);
        Self {
            config,
            crawler: Arc::new(crawler),
        }
    }

    #[cfg(test)]
    fn with_crawler(config: AppConfig, crawler: SubjectCrawler) -> Self {
        Self {
            config,
            crawler: Arc::new(crawler),
        }
    }

    pub async fn run(&self, subjects: Vec<Subject>, cancel: &CancellationToken) -> Result<RunOutcome> {
        let pages = self.config.crawl.page_count;
        let related_pages = self.config.crawl.related_pages;

        info!(
            "=== Crawling {} subjects × {} pages (concurrency {}) ===",
            subjects.len(),
            pages,
            self.config.crawl.concurrency
        );

        let sem = Arc::new(Semaphore::new(self.config.crawl.concurrency));
        let mut handles = Vec::new();

        for subject in subjects {
            let fallback = subject.clone();
            let crawler = Arc::clone(&self.crawler);
            let sem = Arc::clone(&sem);
            let cancel = cancel.clone();

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await?;
                let mut subject = subject;

                if cancel.is_cancelled() {
                    let report = CrawlReport {
                        user_name: subject.user_name.clone(),
                        pages_requested: pages,
                        cancelled: true,
                        ..Default::default()
                    };
                    return Ok::<_, anyhow::Error>((subject, report));
                }

                let profile_error = match crawler.load_profile(&mut subject).await {
                    Ok(()) => None,
                    Err(e) => {
                        warn!("{}: profile unavailable: {}", subject.user_name, e);
                        Some(e.to_string())
                    }
                };

                let mut report = crawler.crawl(&mut subject, pages, &cancel).await;
                report.profile_error = profile_error;

                if related_pages > 0 && !report.cancelled {
                    crawler
                        .collect_related(&mut subject, related_pages, &cancel, &mut report)
                        .await;
                }

                Ok((subject, report))
            });

            handles.push((fallback, handle));
        }

        let mut crawled = Vec::with_capacity(handles.len());
        let mut reports = Vec::with_capacity(handles.len());
        let mut skipped = Vec::new();

        for (fallback, handle) in handles {
            match handle.await {
                Ok(Ok((subject, report))) => {
                    crawled.push(subject);
                    reports.push(report);
                }
                Ok(Err(e)) => {
                    warn!("{}: {:#}", fallback.user_name, e);
                    skipped.push(fallback.user_name.clone());
                    crawled.push(fallback);
                }
                Err(e) => {
                    error!("Task panic for {}: {}", fallback.user_name, e);
                    skipped.push(fallback.user_name.clone());
                    crawled.push(fallback);
                }
            }
        }

        // ── Score the batch ────────────────────────────────────────────────────
        let scores = normalize_batch(&mut crawled, self.config.scoring.margin);

        let summary = RunSummary::build(&crawled, &reports, skipped, &scores, cancel.is_cancelled());
        summary.log();

        Ok(RunOutcome {
            subjects: crawled,
            scores,
            summary,
        })
    }
}

#[derive(Debug)]
pub struct RunOutcome {
    pub subjects: Vec<Subject>,
    pub scores: Vec<ScoreRecord>,
    pub summary: RunSummary,
}

#[derive(Debug, Default, PartialEq)]
pub struct RunSummary {
    pub subjects_crawled: usize,
    pub posts_per_subject: Vec<(String, usize)>,
    /// Crawled, but with failed pages, dropped posts or no profile.
    pub partial: Vec<String>,
    /// Nothing usable came back.
    pub skipped: Vec<String>,
    /// Left out of at least one score axis.
    pub score_excluded: Vec<String>,
    pub cancelled: bool,
}

impl RunSummary {
    fn build(
        subjects: &[Subject],
        reports: &[CrawlReport],
        mut skipped: Vec<String>,
        scores: &[ScoreRecord],
        cancelled: bool,
    ) -> Self {
        let mut partial = Vec::new();
        for r in reports {
            if r.pages_requested > 0 && r.pages_ok == 0 && !r.cancelled {
                skipped.push(r.user_name.clone());
            } else if r.is_partial() {
                partial.push(r.user_name.clone());
            }
        }

        Self {
            subjects_crawled: reports.len(),
            posts_per_subject: subjects
                .iter()
                .map(|s| (s.user_name.clone(), s.fetched_count))
                .collect(),
            partial,
            skipped,
            score_excluded: scores
                .iter()
                .filter(|r| !r.flags.is_empty())
                .map(|r| r.user_name.clone())
                .collect(),
            cancelled,
        }
    }

    pub fn total_posts(&self) -> usize {
        self.posts_per_subject.iter().map(|(_, n)| n).sum()
    }

    pub fn log(&self) {
        for (name, n) in &self.posts_per_subject {
            info!("  {}: {} posts", name, n);
        }
        if !self.partial.is_empty() {
            warn!("Partial: {}", self.partial.join(", "));
        }
        if !self.skipped.is_empty() {
            warn!("Skipped: {}", self.skipped.join(", "));
        }
        if !self.score_excluded.is_empty() {
            warn!("Not fully scored: {}", self.score_excluded.join(", "));
        }
        info!(
            "=== Done: {} subjects | {} posts | {} partial | {} skipped{} ===",
            self.subjects_crawled,
            self.total_posts(),
            self.partial.len(),
            self.skipped.len(),
            if self.cancelled { " | cancelled" } else { "" },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::fixtures::*;
    use crate::models::SubjectOptions;
    use chrono::NaiveDate;
    use serde_json::json;

    fn subject(name: &str, id: u64) -> Subject {
        Subject::new(SubjectOptions {
            user_name: name.into(),
            user_id: id,
            ..Default::default()
        })
        .unwrap()
    }

    fn pipeline(source: FixtureSource) -> Pipeline {
        let mut config = AppConfig::default();
        config.crawl.page_count = 2;
        let now = NaiveDate::from_ymd_opt(2026, 10, 17)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let crawler = SubjectCrawler::new(Arc::new(source), &config.scraper).with_reference_time(now);
        Pipeline::with_crawler(config, crawler)
    }

    fn profile(followers: u64, statuses: u64) -> serde_json::Value {
        json!({"ok": 1, "data": {"userInfo": {
            "followers_count": followers, "statuses_count": statuses
        }}})
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_scores_batch_and_reports() {
        let mut source = two_page_source(1001);
        source.profiles.insert(1001, profile(50_000, 100));
        source.profiles.insert(2002, profile(900, 10));
        // 2002 has no timeline pages at all

        let outcome = pipeline(source)
            .run(vec![subject("a", 1001), subject("b", 2002)], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.subjects[0].user_name, "a");
        assert_eq!(outcome.subjects[0].fetched_count, 2);
        assert_eq!(outcome.subjects[1].fetched_count, 0);

        let s = &outcome.summary;
        assert_eq!(s.subjects_crawled, 2);
        assert_eq!(s.total_posts(), 2);
        assert_eq!(s.skipped, vec!["b".to_string()]);
        assert_eq!(s.score_excluded, vec!["b".to_string()]);

        // b keeps a cognition score but is off the attention axis
        assert!(outcome.subjects[1].norm_cognition_score.is_some());
        assert_eq!(outcome.subjects[1].norm_attention_score, None);
        assert_eq!(outcome.subjects[0].norm_attention_score, Some(100.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_cancelled_before_start() {
        let source = two_page_source(1001);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = pipeline(source)
            .run(vec![subject("a", 1001)], &cancel)
            .await
            .unwrap();

        assert!(outcome.summary.cancelled);
        assert_eq!(outcome.subjects[0].fetched_count, 0);
        assert!(outcome.summary.skipped.is_empty());
    }
}

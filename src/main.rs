mod config;
mod crawler;
mod error;
mod loader;
mod models;
mod pipeline;
mod scoring;
mod scraper;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::loader::load_roster;
use crate::models::{ScoreRecord, Subject};
use crate::pipeline::Pipeline;
use crate::scoring::normalize_batch;
use crate::scraper::WeiboApi;
use crate::storage::{export_scores_csv, SnapshotStore};
use crate::utils::{fmt_number, fmt_score, BarProgress};

const DEFAULT_STEM: &str = "subjects";

#[derive(Parser)]
#[command(name = "weibo-pulse", about = "Weibo recognition / attention scores", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl every subject of a roster, score the batch, write a snapshot
    Crawl {
        /// Roster CSV (user_name,user_id[,filter])
        #[arg(short, long)]
        roster: PathBuf,

        /// Timeline pages per subject (overrides crawl.page_count)
        #[arg(short, long)]
        pages: Option<u32>,

        /// Keyword-search pages per subject (overrides crawl.related_pages)
        #[arg(long)]
        related_pages: Option<u32>,

        /// Snapshot name; `score` and `show` read the same default
        #[arg(long, default_value = DEFAULT_STEM)]
        stem: String,
    },

    /// Re-score the latest snapshot
    Score {
        #[arg(long, default_value = DEFAULT_STEM)]
        stem: String,

        /// Also write the score table as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Show profiles and post counts from the latest snapshot
    Show {
        #[arg(long, default_value = DEFAULT_STEM)]
        stem: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "weibo_pulse=info,warn",
        1 => "weibo_pulse=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Crawl {
            roster,
            pages,
            related_pages,
            stem,
        } => {
            let _t = utils::Timer::start("Crawl");
            if let Some(p) = pages {
                config.crawl.page_count = p;
            }
            if let Some(p) = related_pages {
                config.crawl.related_pages = p;
            }
            config.validate()?;

            let subjects = load_roster(&roster)?;
            if subjects.is_empty() {
                warn!("Roster {:?} has no usable rows", roster);
                return Ok(());
            }

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt: finishing current pages, then stopping");
                    on_signal.cancel();
                }
            });

            let source = Arc::new(WeiboApi::new(&config.scraper)?);
            let store = SnapshotStore::open(&config.storage.output_dir)?;
            let outcome = Pipeline::new(config, source, Arc::new(BarProgress::new()))
                .run(subjects, &cancel)
                .await?;

            store.write(&stem, &outcome.subjects)?;
            print_scores(&outcome.scores);

            let summary = &outcome.summary;
            println!(
                "  {} subjects, {} posts{}{}",
                summary.subjects_crawled,
                fmt_number(summary.total_posts() as i64),
                if summary.skipped.is_empty() {
                    String::new()
                } else {
                    format!(", skipped: {}", summary.skipped.join(", "))
                },
                if summary.partial.is_empty() {
                    String::new()
                } else {
                    format!(", partial: {}", summary.partial.join(", "))
                },
            );
        }

        Command::Score { stem, csv } => {
            let store = SnapshotStore::open(&config.storage.output_dir)?;
            let (_path, mut subjects) = store.read_latest(&stem)?;

            let scores = normalize_batch(&mut subjects, config.scoring.margin);
            print_scores(&scores);

            if let Some(path) = csv {
                export_scores_csv(&path, &scores)?;
            }
        }

        Command::Show { stem } => {
            let store = SnapshotStore::open(&config.storage.output_dir)?;
            let (path, subjects) = store.read_latest(&stem)?;
            info!("{} subjects in {:?}", subjects.len(), path);
            print_subjects(&subjects);
        }
    }

    Ok(())
}

fn print_scores(scores: &[ScoreRecord]) {
    println!("──────────────────────────────────────────────────────────────");
    println!(
        "  {:<16} {:>12} {:>12} {:>10} {:>10}",
        "subject", "cognition", "attention", "norm cog", "norm att"
    );
    println!("──────────────────────────────────────────────────────────────");
    for r in scores {
        println!(
            "  {:<16} {:>12} {:>12} {:>10} {:>10}",
            r.user_name,
            fmt_score(r.cognition_score),
            fmt_score(r.attention_score),
            fmt_score(r.norm_cognition_score),
            fmt_score(r.norm_attention_score),
        );
        for flag in &r.flags {
            println!("      ! {}", flag);
        }
    }
    println!("──────────────────────────────────────────────────────────────");
}

fn print_subjects(subjects: &[Subject]) {
    let count = |n: Option<u64>| n.map(|v| fmt_number(v as i64)).unwrap_or("—".into());
    for s in subjects {
        println!("──────────────────────────────────────────");
        println!("  {} (id {})", s.user_name, s.user_id);
        if let Some(name) = &s.screen_name {
            println!("  Screen name : {}", name);
        }
        println!("  Followers   : {}", count(s.followers_count));
        println!("  Following   : {}", count(s.follow_count));
        println!("  Posts total : {}", count(s.statuses_count));
        println!(
            "  Fetched     : {} ({} reposts)",
            s.fetched_count,
            s.posts.iter().filter(|p| p.is_repost()).count()
        );
        println!("  Related     : {}", s.related_posts.len());
        if let Some(reason) = &s.verified_reason {
            println!("  Verified    : {}", reason);
        }
        if let Some(desc) = &s.description {
            println!("  Bio         : {}", desc);
        }
    }
    println!("──────────────────────────────────────────");
}

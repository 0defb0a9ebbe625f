//! Snapshot files: the whole batch as one JSON array per run, named
//! `{stem}_{YYYY-MM-DD-HH-MM-SS}.json` under the output directory.

use crate::models::{ScoreRecord, Subject};
use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("Could not create dir {:?}", dir))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Write a new timestamped snapshot; never overwrites an older one.
    pub fn write(&self, stem: &str, subjects: &[Subject]) -> Result<PathBuf> {
        let stamp = Local::now().format("%Y-%m-%d-%H-%M-%S");
        let mut path = self.dir.join(format!("{}_{}.json", stem, stamp));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}_{}_{}.json", stem, stamp, n));
            n += 1;
        }

        let json = serde_json::to_string_pretty(subjects).context("Serializing snapshot")?;
        fs::write(&path, json).with_context(|| format!("Writing {:?}", path))?;

        info!("Snapshot: {} subjects → {:?}", subjects.len(), path);
        Ok(path)
    }

    pub fn read(&self, path: &Path) -> Result<Vec<Subject>> {
        let raw = fs::read_to_string(path).with_context(|| format!("Reading {:?}", path))?;
        let subjects: Vec<Subject> =
            serde_json::from_str(&raw).with_context(|| format!("Parsing snapshot {:?}", path))?;
        debug!("{:?}: {} subjects", path, subjects.len());
        Ok(subjects)
    }

    /// Most recently modified snapshot for `stem`, if any.
    pub fn latest(&self, stem: &str) -> Result<Option<PathBuf>> {
        let prefix = format!("{}_", stem);
        let mut candidates = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let matches = path.is_file()
                && path.extension().map(|e| e == "json").unwrap_or(false)
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix))
                    .unwrap_or(false);
            if matches {
                candidates.push((fs::metadata(&path)?.modified()?, path));
            }
        }

        // Same-second writes can share an mtime; the name breaks the tie.
        Ok(candidates.into_iter().max().map(|(_, p)| p))
    }

    pub fn read_latest(&self, stem: &str) -> Result<(PathBuf, Vec<Subject>)> {
        let path = self
            .latest(stem)?
            .with_context(|| format!("No snapshot named {}_*.json in {:?}", stem, self.dir))?;
        info!("Loading latest snapshot {:?}", path);
        let subjects = self.read(&path)?;
        Ok((path, subjects))
    }
}

/// Score table for the charting front-end.
pub fn export_scores_csv(path: &Path, scores: &[ScoreRecord]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Creating {:?}", path))?;

    writer.write_record([
        "user_name",
        "cognition_score",
        "attention_score",
        "norm_cognition_score",
        "norm_attention_score",
        "flags",
    ])?;

    let cell = |v: Option<f64>| v.map(|x| format!("{:.4}", x)).unwrap_or_default();
    for r in scores {
        writer.write_record([
            r.user_name.clone(),
            cell(r.cognition_score),
            cell(r.attention_score),
            cell(r.norm_cognition_score),
            cell(r.norm_attention_score),
            r.flags.join("; "),
        ])?;
    }

    writer.flush()?;
    info!("Scores: {} rows → {:?}", scores.len(), path);
    Ok(())
}

//! Recognition (cognition) and attention scores.
//!
//! Raw scores are per subject. Normalized scores only mean something relative
//! to the batch they were computed over, so `normalize_batch` always takes the
//! full batch and rewrites every subject's normalized fields.

use crate::error::ScoreError;
use crate::models::{ScoreRecord, Subject};
use tracing::warn;

/// `followers / ln(statuses + 1)`: audience size, dampened by how much the
/// account posts.
pub fn cognition_score(subject: &Subject) -> Result<f64, ScoreError> {
    let missing = |field| ScoreError::MissingProfile {
        user_name: subject.user_name.clone(),
        field,
    };
    let followers = subject.followers_count.ok_or_else(|| missing("followers_count"))?;
    let statuses = subject.statuses_count.ok_or_else(|| missing("statuses_count"))?;

    if statuses == 0 {
        return Err(ScoreError::LogDomain {
            user_name: subject.user_name.clone(),
        });
    }

    Ok(followers as f64 / (statuses as f64 + 1.0).ln())
}

/// Mean engagement (reposts + comments + likes) per fetched post.
pub fn attention_score(subject: &Subject) -> Result<f64, ScoreError> {
    if subject.fetched_count == 0 {
        return Err(ScoreError::NoFetchedPosts {
            user_name: subject.user_name.clone(),
        });
    }
    Ok(subject.total_engagement() as f64 / subject.fetched_count as f64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawScores {
    pub cognition: Result<f64, ScoreError>,
    pub attention: Result<f64, ScoreError>,
}

pub fn compute_raw(subject: &Subject) -> RawScores {
    RawScores {
        cognition: cognition_score(subject),
        attention: attention_score(subject),
    }
}

// ── Batch normalization ───────────────────────────────────────────────────────

/// Bounds of one score axis, widened by `margin` on both sides so nobody sits
/// exactly on 0 or 100.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisBounds {
    pub min: f64,
    pub max: f64,
}

impl AxisBounds {
    /// `None` when no subject has a valid value on this axis.
    pub fn from_values(values: &[f64], margin: f64) -> Option<Self> {
        let (lo, hi) = values.iter().fold(None, |acc: Option<(f64, f64)>, &v| {
            Some(match acc {
                None => (v, v),
                Some((lo, hi)) => (lo.min(v), hi.max(v)),
            })
        })?;

        // All-equal axis: every subject lands on 100.
        if lo == hi {
            return Some(Self { min: lo, max: hi });
        }

        Some(Self {
            min: lo * (1.0 - margin),
            max: hi * (1.0 + margin),
        })
    }

    pub fn scale(&self, x: f64) -> f64 {
        min_max_scale(x, self.max, self.min)
    }
}

/// `(x - min) * 100 / (max - min)`, or 100 on a degenerate range.
pub fn min_max_scale(x: f64, max: f64, min: f64) -> f64 {
    if max != min {
        (x - min) * 100.0 / (max - min)
    } else {
        100.0
    }
}

/// Score every subject in `subjects` against the others and attach the
/// normalized values. Subjects without a valid raw score on an axis are left
/// out of that axis' range, get `None`, and are flagged in their record.
pub fn normalize_batch(subjects: &mut [Subject], margin: f64) -> Vec<ScoreRecord> {
    let raw: Vec<RawScores> = subjects.iter().map(compute_raw).collect();

    let cognition_values: Vec<f64> = raw
        .iter()
        .filter_map(|r| r.cognition.as_ref().ok().copied())
        .collect();
    let attention_values: Vec<f64> = raw
        .iter()
        .filter_map(|r| r.attention.as_ref().ok().copied())
        .collect();
    let cognition_bounds = AxisBounds::from_values(&cognition_values, margin);
    let attention_bounds = AxisBounds::from_values(&attention_values, margin);

    subjects
        .iter_mut()
        .zip(raw)
        .map(|(subject, scores)| {
            let mut flags = Vec::new();
            let mut axis = |score: Result<f64, ScoreError>, bounds: Option<AxisBounds>| match score {
                Ok(v) => (Some(v), bounds.map(|b| b.scale(v))),
                Err(e) => {
                    warn!("Excluded from normalization: {}", e);
                    flags.push(e.to_string());
                    (None, None)
                }
            };

            let (cognition, norm_cognition) = axis(scores.cognition, cognition_bounds);
            let (attention, norm_attention) = axis(scores.attention, attention_bounds);

            subject.norm_cognition_score = norm_cognition;
            subject.norm_attention_score = norm_attention;

            ScoreRecord {
                user_name: subject.user_name.clone(),
                cognition_score: cognition,
                attention_score: attention,
                norm_cognition_score: norm_cognition,
                norm_attention_score: norm_attention,
                flags,
            }
        })
        .collect()
}

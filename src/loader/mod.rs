//! Roster loader: the list of subjects to crawl.
//!
//! CSV with a header row; `user_name` and `user_id` are required, every other
//! `SubjectOptions` column (`filter`, `followers_count`, ...) is optional.
//!
//! ```text
//! user_name,user_id,filter
//! 宁静,1234567890,1
//! ```

use crate::models::{Subject, SubjectOptions};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

/// Load and validate a roster. Bad rows are logged and skipped; duplicate ids
/// keep their first row.
pub fn load_roster(path: &Path) -> Result<Vec<Subject>> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Opening roster {:?}", path))?;

    let subjects = read_roster(reader)?;
    info!("{:?}: {} subjects", path, subjects.len());
    Ok(subjects)
}

fn read_roster<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Vec<Subject>> {
    let headers = reader.headers().context("Reading roster header")?.clone();
    let mut subjects: Vec<Subject> = Vec::new();

    for (i, result) in reader.records().enumerate() {
        let row = i + 2; // header is line 1
        let mut record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Roster line {}: {}", row, e);
                continue;
            }
        };

        // Short rows leave trailing optional columns out entirely.
        while record.len() < headers.len() {
            record.push_field("");
        }

        let opts: SubjectOptions = match record.deserialize(Some(&headers)) {
            Ok(o) => o,
            Err(e) => {
                warn!("Roster line {}: {}", row, e);
                continue;
            }
        };

        match Subject::new(opts) {
            Ok(s) if subjects.iter().any(|x| x.user_id == s.user_id) => {
                warn!("Roster line {}: duplicate user_id {}, skipped", row, s.user_id);
            }
            Ok(s) => subjects.push(s),
            Err(e) => warn!("Roster line {}: {}", row, e),
        }
    }

    Ok(subjects)
}

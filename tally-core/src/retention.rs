//! Keep-latest-N retention for timestamped output files.
//!
//! A file matches when it is named `{prefix}-{YYYYMMDD-HHMMSS}.{ext}` or
//! `{prefix}-{YYYYMMDD}.{ext}` and sits directly in the directory. Recency is
//! the stamp in the name, not the file's mtime.

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::time::parse_stamp;

pub const DEFAULT_KEEP: usize = 7;

#[derive(Error, Debug)]
pub enum RetentionError {
    #[error("invalid file pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub prefix: String,
    pub extension: String,
    pub keep: usize,
    pattern: Regex,
}

impl RetentionPolicy {
    pub fn new(prefix: &str, extension: &str) -> Result<Self, RetentionError> {
        let pattern = Regex::new(&format!(
            r"^{}-(?P<day>\d{{8}})(?:-(?P<time>\d{{6}}))?\.{}$",
            regex::escape(prefix),
            regex::escape(extension)
        ))?;
        Ok(Self {
            prefix: prefix.to_string(),
            extension: extension.to_string(),
            keep: DEFAULT_KEEP,
            pattern,
        })
    }

    pub fn with_keep(mut self, keep: usize) -> Self {
        self.keep = keep;
        self
    }

    /// Stamp embedded in `file_name`, if the name matches the policy.
    pub fn stamp_of(&self, file_name: &str) -> Option<NaiveDateTime> {
        let caps = self.pattern.captures(file_name)?;
        match caps.name("time") {
            Some(t) => parse_stamp(&format!("{}-{}", &caps["day"], t.as_str())),
            None => NaiveDate::parse_from_str(&caps["day"], "%Y%m%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0)),
        }
    }

    /// Matching files in `dir`, newest first.
    pub fn matching(&self, dir: &Path) -> Result<Vec<PathBuf>, RetentionError> {
        let mut found: Vec<(NaiveDateTime, PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(stamp) = self.stamp_of(name) {
                found.push((stamp, entry.path()));
            }
        }
        found.sort_by(|a, b| b.cmp(a));
        Ok(found.into_iter().map(|(_, p)| p).collect())
    }

    /// Delete all but the `keep` newest matching files. Returns what was deleted.
    pub fn apply(&self, dir: &Path) -> Result<Vec<PathBuf>, RetentionError> {
        let files = self.matching(dir)?;
        let stale: Vec<PathBuf> = files.into_iter().skip(self.keep).collect();
        for p in &stale {
            debug!(path = %p.display(), "removing old export");
            fs::remove_file(p)?;
        }
        if !stale.is_empty() {
            info!(
                dir = %dir.display(),
                prefix = %self.prefix,
                removed = stale.len(),
                kept = self.keep,
                "applied retention"
            );
        }
        Ok(stale)
    }
}

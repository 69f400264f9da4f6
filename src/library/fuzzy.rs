//! Finds episodes already on disk under slightly different names.
//!
//! The expected relative path is walked one component at a time (series
//! directory, season directory, episode file). At each level the exact name
//! wins; otherwise the best-scoring sibling above the threshold is followed.
//! Siblings whose numbers (season, episode, part) differ from the wanted
//! name are never candidates, however close the rest of the name is.

use std::path::{Path, PathBuf};
use strsim::{jaro_winkler, normalized_levenshtein};
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    threshold: f64,
}

impl FuzzyMatcher {
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Similarity of two names in `0.0..=1.0`.
    #[must_use]
    pub fn score(a: &str, b: &str) -> f64 {
        let a = normalize_for_matching(a);
        let b = normalize_for_matching(b);
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        if a == b {
            return 1.0;
        }
        jaro_winkler(&a, &b).max(normalized_levenshtein(&a, &b))
    }

    /// Resolves `relative` (a `/`-separated path with extension) under `root`.
    #[must_use]
    pub fn find_existing(&self, root: &Path, relative: &str) -> Option<PathBuf> {
        let components: Vec<&str> = relative.split('/').filter(|c| !c.is_empty()).collect();
        let (file_name, dirs) = components.split_last()?;

        let mut current = root.to_path_buf();
        for dir in dirs {
            current = self.best_match(&current, dir, true)?;
        }

        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name);
        self.best_match(&current, stem, false)
    }

    fn best_match(&self, parent: &Path, wanted: &str, want_dir: bool) -> Option<PathBuf> {
        let exact = parent.join(wanted);
        if want_dir && exact.is_dir() {
            return Some(exact);
        }

        let wanted_numbers = number_tokens(wanted);
        let mut best: Option<(f64, PathBuf)> = None;
        for entry in WalkDir::new(parent)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(Result::ok)
        {
            if entry.file_type().is_dir() != want_dir {
                continue;
            }
            let path = entry.path();
            let name = if want_dir {
                path.file_name().and_then(|s| s.to_str())
            } else {
                path.file_stem().and_then(|s| s.to_str())
            };
            let Some(name) = name else { continue };
            if number_tokens(name) != wanted_numbers {
                continue;
            }

            let score = Self::score(wanted, name);
            if score >= self.threshold && best.as_ref().is_none_or(|(b, _)| score > *b) {
                best = Some((score, path.to_path_buf()));
            }
        }

        if let Some((score, path)) = &best {
            debug!(wanted, found = %path.display(), score, "Fuzzy match");
        }
        best.map(|(_, path)| path)
    }
}

/// Lowercases, turns separators into spaces and drops punctuation.
#[must_use]
pub fn normalize_for_matching(s: &str) -> String {
    let s = s
        .to_lowercase()
        .replace(['.', '_', '-', '[', ']', '(', ')'], " ");

    s.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Numeric runs of a name, leading zeros ignored.
fn number_tokens(s: &str) -> Vec<u64> {
    s.split(|c: char| !c.is_ascii_digit())
        .filter(|run| !run.is_empty())
        .map(|run| run.parse().unwrap_or(u64::MAX))
        .collect()
}

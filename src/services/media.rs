use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::parser::lang::{base_language, normalize_audio, normalize_subtitle};

/// Languages found in a local media file, lowercased.
///
/// Subtitle locales also contribute their base language, so a file with an
/// `en-US` track satisfies a wanted `en`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalTracks {
    pub dubs: BTreeSet<String>,
    pub subs: BTreeSet<String>,
}

/// Adds `en` for every `en-us` style entry.
#[must_use]
pub fn with_base_languages<I, S>(locales: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = BTreeSet::new();
    for locale in locales {
        let lowered = locale.as_ref().to_lowercase();
        out.insert(base_language(&lowered).to_string());
        out.insert(lowered);
    }
    out
}

/// Reads the tracks of a finished file.
#[async_trait]
pub trait TrackInspector: Send + Sync {
    async fn local_tracks(&self, path: &Path) -> LocalTracks;
}

pub struct MediaService {
    timeout: Duration,
}

impl MediaService {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn read_tracks(path: &Path) -> Result<LocalTracks> {
        let output = ffprobe::ffprobe(path)
            .with_context(|| format!("Failed to run ffprobe on {}", path.display()))?;

        let mut dubs = BTreeSet::new();
        let mut subs = Vec::new();

        for stream in &output.streams {
            let Some(language) = stream
                .tags
                .as_ref()
                .and_then(|t| t.language.as_deref())
                .filter(|l| !l.is_empty() && *l != "und")
            else {
                continue;
            };

            match stream.codec_type.as_deref() {
                Some("audio") => {
                    let code = normalize_audio(language).unwrap_or_else(|| language.to_lowercase());
                    dubs.insert(code.to_lowercase());
                }
                Some("subtitle") => {
                    let locale = normalize_subtitle(language).unwrap_or_else(|| language.to_string());
                    subs.push(locale);
                }
                _ => {}
            }
        }

        let tracks = LocalTracks {
            dubs,
            subs: with_base_languages(subs),
        };
        debug!(path = %path.display(), dubs = ?tracks.dubs, subs = ?tracks.subs, "Probed local file");
        Ok(tracks)
    }

    /// Probes a file off the runtime threads. Failure or timeout yields empty sets.
    pub async fn probe(&self, path: &Path) -> LocalTracks {
        let owned: PathBuf = path.to_path_buf();
        let task = tokio::task::spawn_blocking(move || Self::read_tracks(&owned));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(tracks))) => tracks,
            Ok(Ok(Err(e))) => {
                warn!(path = %path.display(), error = %e, "Media probe failed");
                LocalTracks::default()
            }
            Ok(Err(e)) => {
                warn!(path = %path.display(), error = %e, "Media probe task failed");
                LocalTracks::default()
            }
            Err(_) => {
                warn!(path = %path.display(), timeout_secs = self.timeout.as_secs(), "Media probe timed out");
                LocalTracks::default()
            }
        }
    }
}

#[async_trait]
impl TrackInspector for MediaService {
    async fn local_tracks(&self, path: &Path) -> LocalTracks {
        self.probe(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_base_languages() {
        let out = with_base_languages(["en-US", "pt-BR", "ja"]);
        let expected: BTreeSet<String> = ["en", "en-us", "pt", "pt-br", "ja"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn test_probe_missing_file_is_empty() {
        let service = MediaService::new(Duration::from_secs(5));
        let path = std::env::temp_dir().join(format!("mdnx-autodl-missing-{}.mkv", uuid::Uuid::new_v4()));
        assert_eq!(service.probe(&path).await, LocalTracks::default());
    }
}

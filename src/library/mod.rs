pub mod fuzzy;
pub mod transfer;

use crate::config::DownloadConfig;
use crate::models::{Episode, Season, Series};
use std::path::{Path, PathBuf};

pub use fuzzy::FuzzyMatcher;
pub use transfer::{FileTransfer, TransferError};

/// Computes where finished episodes live under the data directory.
pub struct LibraryService {
    data_dir: PathBuf,
    naming_format: String,
    extension: String,
}

impl LibraryService {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, config: &DownloadConfig) -> Self {
        Self {
            data_dir: data_dir.into(),
            naming_format: config.naming_format.clone(),
            extension: config.output_extension.trim_start_matches('.').to_string(),
        }
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    #[must_use]
    pub fn get_destination_path(&self, series: &Series, season: &Season, episode: &Episode) -> PathBuf {
        let relative = self.format_path(series, season, episode);
        // Titles may contain dots, so the extension is appended rather than replaced.
        self.data_dir.join(format!("{relative}.{}", self.extension))
    }

    #[must_use]
    pub fn format_path(&self, series: &Series, season: &Season, episode: &Episode) -> String {
        let season_number = season.naming_number();

        let path_str = self
            .naming_format
            .replace("{Series Title}", &sanitize_filename(&series.name))
            .replace("{Series Id}", &sanitize_filename(&series.id))
            .replace("{Season Title}", &sanitize_filename(&season.name))
            .replace("{Season:02}", &format!("{season_number:02}"))
            .replace("{Episode:02}", &format!("{:02}", episode.number))
            .replace("{Season}", &season_number.to_string())
            .replace("{Episode}", &episode.number.to_string())
            .replace("{Title}", &sanitize_filename(&episode.title));

        path_str
            .split('/')
            .map(cleanup_path)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn cleanup_path(path: &str) -> String {
    let mut p = path.to_string();
    let mut prev_len = 0;

    while p.len() != prev_len {
        prev_len = p.len();
        p = p
            .replace("[]", "")
            .replace("()", "")
            .replace("  ", " ")
            .replace(" - - ", " - ")
            .replace(" .", ".");
    }

    let p = p.trim();
    let p = p.trim_end_matches(" - ");
    let p = p.trim_end_matches('-');
    let p = p.trim_start_matches(" - ");
    let p = p.trim_start_matches('-');

    p.trim().to_string()
}

/// Replaces characters that are invalid in file names and collapses whitespace.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    name.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Series, Season, Episode) {
        let series = Series::new("GG5H5XQX4", "Frieren: Beyond Journey's End");
        let season = Season::new(Some("GY1".to_string()), "Frieren Season 1", 1);
        let episode = Episode::new(5, 5, "Phantoms of the Dead");
        (series, season, episode)
    }

    fn service(format: &str) -> LibraryService {
        let config = DownloadConfig {
            naming_format: format.to_string(),
            ..DownloadConfig::default()
        };
        LibraryService::new("/data", &config)
    }

    #[test]
    fn test_destination_path_default_format() {
        let (series, season, episode) = fixture();
        let path = service(&DownloadConfig::default().naming_format)
            .get_destination_path(&series, &season, &episode);

        assert_eq!(
            path,
            PathBuf::from(
                "/data/Frieren Beyond Journey's End/Season 1/Frieren Beyond Journey's End - S01E05.mkv"
            )
        );
    }

    #[test]
    fn test_season_override_drives_naming() {
        let (series, mut season, episode) = fixture();
        season.number_override = Some(2);
        let path = service("{Series Title} - S{Season:02}E{Episode:02} - {Title}")
            .format_path(&series, &season, &episode);
        assert_eq!(path, "Frieren Beyond Journey's End - S02E05 - Phantoms of the Dead");
    }

    #[test]
    fn test_empty_tokens_are_cleaned() {
        let (series, season, mut episode) = fixture();
        episode.title = String::new();
        let path = service("{Series Title}/{Series Title} - E{Episode} - {Title} [{Title}]")
            .format_path(&series, &season, &episode);
        assert_eq!(path, "Frieren Beyond Journey's End/Frieren Beyond Journey's End - E5");
    }

    #[test]
    fn test_title_with_dots_keeps_extension() {
        let (series, season, mut episode) = fixture();
        episode.title = "Mr. Ed".to_string();
        let path = service("{Title}").get_destination_path(&series, &season, &episode);
        assert_eq!(path, PathBuf::from("/data/Mr. Ed.mkv"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Test: Title"), "Test Title");
        assert_eq!(sanitize_filename("A/B\\C"), "A B C");
        assert_eq!(sanitize_filename("Normal Title"), "Normal Title");
    }
}

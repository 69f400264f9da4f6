//! Download events collected during an iteration and flushed as one summary.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt::Write as _;

use crate::domain::ServiceKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadAction {
    /// First download of an episode.
    New,
    /// Re-download that added dubs or subtitles.
    Updated,
}

/// Track state of one episode at notification time.
#[derive(Clone, Debug, Serialize)]
pub struct EpisodeSnapshot {
    pub service: ServiceKind,
    pub series_title: String,
    pub season_number: u32,
    pub episode_number: u32,
    pub episode_title: String,
    pub action: DownloadAction,
    pub dubs: Vec<String>,
    pub subs: Vec<String>,
    pub previous_dubs: Vec<String>,
    pub previous_subs: Vec<String>,
    pub timestamp: DateTime<Local>,
}

impl EpisodeSnapshot {
    fn label(&self) -> String {
        format!(
            "{} S{:02}E{:02} - {}",
            self.series_title, self.season_number, self.episode_number, self.episode_title
        )
    }
}

/// Accumulates snapshots until the housekeeping step flushes them.
#[derive(Debug, Default)]
pub struct NotificationBuffer {
    items: Vec<EpisodeSnapshot>,
}

impl NotificationBuffer {
    pub fn push(&mut self, snapshot: EpisodeSnapshot) {
        self.items.push(snapshot);
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn count(&self, action: DownloadAction) -> usize {
        self.items.iter().filter(|s| s.action == action).count()
    }

    /// Renders the summary and clears the buffer. `None` when nothing happened.
    pub fn drain_summary(&mut self, now: DateTime<Local>) -> Option<Summary> {
        if self.items.is_empty() {
            return None;
        }

        let new = self.count(DownloadAction::New);
        let updated = self.count(DownloadAction::Updated);
        let subject = format!(
            "Download summary: {new} new, {updated} updated ({})",
            now.format("%Y-%m-%d %H:%M")
        );

        let mut body = String::new();
        if new > 0 {
            body.push_str("New downloads:\n");
            for item in self.items.iter().filter(|s| s.action == DownloadAction::New) {
                let _ = writeln!(
                    body,
                    "  [{}] {} (dubs: {}; subs: {})",
                    item.service,
                    item.label(),
                    join_or_none(&item.dubs),
                    join_or_none(&item.subs)
                );
            }
        }

        if updated > 0 {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str("Updates (new dub/sub detected):\n");
            for item in self
                .items
                .iter()
                .filter(|s| s.action == DownloadAction::Updated)
            {
                let _ = writeln!(
                    body,
                    "  [{}] {} (dubs: {} -> {}; subs: {} -> {})",
                    item.service,
                    item.label(),
                    join_or_none(&item.previous_dubs),
                    join_or_none(&item.dubs),
                    join_or_none(&item.previous_subs),
                    join_or_none(&item.subs)
                );
            }
        }

        self.items.clear();
        Some(Summary { subject, body })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Summary {
    pub subject: String,
    pub body: String,
}

fn join_or_none(values: &[String]) -> String {
    if values.is_empty() {
        "none".to_string()
    } else {
        values.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(action: DownloadAction, episode: u32) -> EpisodeSnapshot {
        EpisodeSnapshot {
            service: ServiceKind::Crunchyroll,
            series_title: "Frieren".to_string(),
            season_number: 1,
            episode_number: episode,
            episode_title: "Journey".to_string(),
            action,
            dubs: vec!["jpn".to_string(), "eng".to_string()],
            subs: vec!["en-US".to_string()],
            previous_dubs: vec!["jpn".to_string()],
            previous_subs: vec![],
            timestamp: Local::now(),
        }
    }

    #[test]
    fn test_empty_buffer_has_no_summary() {
        let mut buffer = NotificationBuffer::default();
        assert!(buffer.drain_summary(Local::now()).is_none());
    }

    #[test]
    fn test_summary_groups_actions() {
        let mut buffer = NotificationBuffer::default();
        buffer.push(snapshot(DownloadAction::New, 1));
        buffer.push(snapshot(DownloadAction::New, 2));
        buffer.push(snapshot(DownloadAction::Updated, 3));

        let summary = buffer.drain_summary(Local::now()).unwrap();
        assert!(summary.subject.starts_with("Download summary: 2 new, 1 updated"));
        assert!(summary.body.contains("New downloads:"));
        assert!(summary.body.contains("Updates (new dub/sub detected):"));
        assert!(summary.body.contains("Frieren S01E03 - Journey"));
        assert!(summary.body.contains("jpn -> jpn, eng"));
        assert!(buffer.is_empty());
    }
}

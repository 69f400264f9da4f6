//! Line classification for the tool's listing output.
//!
//! Every function here looks at exactly one line and keeps no state. The
//! reducer decides what a classified line means for the tree being built.

use regex::{Captures, Regex};
use std::sync::OnceLock;

fn get_regex(re: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    re.get_or_init(|| Regex::new(pattern).expect("Invalid regex pattern defined in code"))
}

fn number<T: std::str::FromStr>(caps: &Captures<'_>, name: &str) -> Option<T> {
    caps.name(name)?.as_str().parse().ok()
}

fn text<'a>(caps: &Captures<'a>, name: &str) -> Option<&'a str> {
    caps.name(name).map(|m| m.as_str().trim())
}

/// A classified Crunchyroll listing line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrunchyLine<'a> {
    Series {
        id: &'a str,
        name: &'a str,
        seasons_count: u32,
        episodes_count: u32,
    },
    Season {
        id: &'a str,
        name: &'a str,
        number: u32,
    },
    /// `[E12] ...` rows. `special` is set for `[S1] ...` rows.
    Episode {
        special: bool,
        number: u32,
        full_name: &'a str,
    },
    /// `- Subtitles: en-US, es-419` under a season.
    Subtitles { list: &'a str },
    Other,
}

#[must_use]
pub fn classify_crunchy(line: &str) -> CrunchyLine<'_> {
    static SERIES: OnceLock<Regex> = OnceLock::new();
    static SEASON: OnceLock<Regex> = OnceLock::new();
    static EPISODE: OnceLock<Regex> = OnceLock::new();
    static SUBTITLES: OnceLock<Regex> = OnceLock::new();

    let line = line.trim();

    let series = get_regex(
        &SERIES,
        r"^\[Z:(?P<id>\w+)\]\s+(?P<name>.+?)\s+\(Seasons:\s*(?P<seasons>\d+),\s*EPs:\s*(?P<eps>\d+)\)",
    );
    if let Some(caps) = series.captures(line)
        && let (Some(id), Some(name), Some(seasons_count), Some(episodes_count)) = (
            text(&caps, "id"),
            text(&caps, "name"),
            number(&caps, "seasons"),
            number(&caps, "eps"),
        )
    {
        return CrunchyLine::Series {
            id,
            name,
            seasons_count,
            episodes_count,
        };
    }

    let season = get_regex(
        &SEASON,
        r"^\[S:(?P<id>\w+)\]\s+(?P<name>.+?)\s+\(Season:\s*(?P<number>\d+)\)",
    );
    if let Some(caps) = season.captures(line)
        && let (Some(id), Some(name), Some(number)) =
            (text(&caps, "id"), text(&caps, "name"), number(&caps, "number"))
    {
        return CrunchyLine::Season { id, name, number };
    }

    let episode = get_regex(
        &EPISODE,
        r"^\[(?P<kind>E|S)(?P<number>\d+)\]\s+(?P<name>.+?)\s+\[",
    );
    if let Some(caps) = episode.captures(line)
        && let (Some(kind), Some(number), Some(full_name)) =
            (text(&caps, "kind"), number(&caps, "number"), text(&caps, "name"))
    {
        return CrunchyLine::Episode {
            special: kind == "S",
            number,
            full_name,
        };
    }

    let subtitles = get_regex(&SUBTITLES, r"^-\s*Subtitles:\s*(?P<list>.+)");
    if let Some(caps) = subtitles.captures(line)
        && let Some(list) = text(&caps, "list")
    {
        return CrunchyLine::Subtitles { list };
    }

    CrunchyLine::Other
}

/// `- Season 2 -` inside a Crunchyroll episode row.
#[must_use]
pub fn crunchy_season_token(line: &str) -> Option<u32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex(&RE, r"- Season (\d+) -");
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Trailing `[English, Japanese]` list of a Crunchyroll episode row.
#[must_use]
pub fn crunchy_dub_list(line: &str) -> Option<&str> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex(&RE, r"\[([^\]]+)\]\s*$");
    re.captures(line.trim()).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Leading `[2024-01-05]` air date of a Crunchyroll episode name.
#[must_use]
pub fn strip_air_date(name: &str) -> &str {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex(&RE, r"^\[\d{4}-\d{2}-\d{2}\]\s*");
    re.find(name).map_or(name, |m| &name[m.end()..])
}

/// Episode number of a flat HiDive row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlatNumber {
    Whole(u32),
    /// `E7.5` style extras.
    Fractional(f64),
}

/// A classified HiDive listing line.
#[derive(Debug, Clone, PartialEq)]
pub enum HidiveLine<'a> {
    /// `[ERROR]` / `[WARN]` lines printed by the tool.
    Diagnostic,
    Series {
        id: &'a str,
        name: &'a str,
        seasons_count: u32,
    },
    Season {
        id: &'a str,
        number: u32,
        label: Option<&'a str>,
        episodes_count: u32,
    },
    /// OVA, movie, recap and similar seasons.
    SpecialSeason {
        id: &'a str,
        number: Option<u32>,
        label: &'a str,
        episodes_count: u32,
    },
    Episode {
        id: &'a str,
        title: &'a str,
    },
    Flat {
        season_code: u32,
        number: FlatNumber,
        title: &'a str,
    },
    Other,
}

const SPECIAL_LABELS: &str = "OVA|OAD|ONA|Specials?|Recap|Compilation|Summary|Movie|Film";

#[must_use]
pub fn classify_hidive(line: &str) -> HidiveLine<'_> {
    static SERIES: OnceLock<Regex> = OnceLock::new();
    static SEASON_ANY_SPECIAL: OnceLock<Regex> = OnceLock::new();
    static SEASON_MAIN: OnceLock<Regex> = OnceLock::new();
    static SEASON_SPECIAL: OnceLock<Regex> = OnceLock::new();
    static EPISODE: OnceLock<Regex> = OnceLock::new();
    static FLAT: OnceLock<Regex> = OnceLock::new();

    let line = line.trim();
    if line.starts_with("[ERROR]") || line.starts_with("[WARN]") {
        return HidiveLine::Diagnostic;
    }

    let series = get_regex(
        &SERIES,
        r"(?i)^\[Z\.(?P<id>\d+)\]\s+(?P<name>.+)\s+\((?P<seasons>\d+)\s+Seasons?\)\s*$",
    );
    if let Some(caps) = series.captures(line)
        && let (Some(id), Some(name), Some(seasons_count)) =
            (text(&caps, "id"), text(&caps, "name"), number(&caps, "seasons"))
    {
        return HidiveLine::Series {
            id,
            name,
            seasons_count,
        };
    }

    let any_special = get_regex(
        &SEASON_ANY_SPECIAL,
        &format!(
            r"(?i)^\[S\.(?P<id>\d+)\]\s+(?:Season\s+(?P<number>\d+)\s+)?(?P<label>{SPECIAL_LABELS})\s*\((?P<eps>\d+)\s*(?:Episodes?|Eps?)\)\s*$"
        ),
    );
    if let Some(caps) = any_special.captures(line)
        && let (Some(id), Some(label), Some(episodes_count)) =
            (text(&caps, "id"), text(&caps, "label"), number(&caps, "eps"))
    {
        return HidiveLine::SpecialSeason {
            id,
            number: number(&caps, "number"),
            label,
            episodes_count,
        };
    }

    let main = get_regex(
        &SEASON_MAIN,
        r"(?i)^\[S\.(?P<id>\d+)\]\s+Season\s+(?P<number>\d+)(?:\s+(?P<label>[^()]+?))?\s*\((?P<eps>\d+)\s*(?:Episodes?|Eps?)\)\s*$",
    );
    if let Some(caps) = main.captures(line)
        && let (Some(id), Some(number), Some(episodes_count)) =
            (text(&caps, "id"), number(&caps, "number"), number(&caps, "eps"))
    {
        let label = text(&caps, "label").filter(|l| !l.is_empty());
        if let Some(label) = label
            && is_special_season_label(label)
        {
            return HidiveLine::SpecialSeason {
                id,
                number: Some(number),
                label,
                episodes_count,
            };
        }
        return HidiveLine::Season {
            id,
            number,
            label,
            episodes_count,
        };
    }

    let special = get_regex(
        &SEASON_SPECIAL,
        &format!(
            r"(?i)^\[S\.(?P<id>\d+)\]\s+(?P<label>{SPECIAL_LABELS})(?:\s+(?P<number>\d+))?\s*\((?P<eps>\d+)\s*(?:Episodes?|Eps?)\)\s*$"
        ),
    );
    if let Some(caps) = special.captures(line)
        && let (Some(id), Some(label), Some(episodes_count)) =
            (text(&caps, "id"), text(&caps, "label"), number(&caps, "eps"))
    {
        return HidiveLine::SpecialSeason {
            id,
            number: number(&caps, "number"),
            label,
            episodes_count,
        };
    }

    let episode = get_regex(
        &EPISODE,
        r"(?i)^\[E\.(?P<id>\d+)\]\s+(?P<title>.+?)\s*$",
    );
    if let Some(caps) = episode.captures(line)
        && let (Some(id), Some(title)) = (text(&caps, "id"), text(&caps, "title"))
    {
        return HidiveLine::Episode { id, title };
    }

    let flat = get_regex(
        &FLAT,
        r"(?i)^\[S(?P<code>\d{1,3})\s*E(?P<number>\d{1,4}(?:\.\d+)?)\]\s+(?P<title>.+?)\s*$",
    );
    if let Some(caps) = flat.captures(line)
        && let (Some(season_code), Some(raw), Some(title)) =
            (number(&caps, "code"), text(&caps, "number"), text(&caps, "title"))
    {
        let number = if raw.contains('.') {
            raw.parse().ok().map(FlatNumber::Fractional)
        } else {
            raw.parse().ok().map(FlatNumber::Whole)
        };
        if let Some(number) = number {
            return HidiveLine::Flat {
                season_code,
                number,
                title,
            };
        }
    }

    HidiveLine::Other
}

/// Season labels naming OVAs, movies, recaps and other specials.
#[must_use]
pub fn is_special_season_label(label: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    get_regex(&RE, &format!(r"(?i)\b({SPECIAL_LABELS})\b")).is_match(label)
}

/// Titles marking recaps, digests, previews and other extras.
#[must_use]
pub fn is_special_episode_title(title: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    get_regex(
        &RE,
        r"(?i)\b(recaps?|digest|compilation|summary|omake|extra|preview|prologue|specials?|ova|oad|ona)\b",
    )
    .is_match(title)
}

/// Titles of episodes that are listed but not out yet.
#[must_use]
pub fn is_unreleased_title(title: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    get_regex(
        &RE,
        r"(?i)^\s*(coming|tba|tbd|available\s+on|premieres?|releasing)\b",
    )
    .is_match(title)
}

/// Crunchyroll promotional videos are listed as regular episodes named `PV ...`.
#[must_use]
pub fn is_trailer_title(title: &str) -> bool {
    title.trim_start().to_lowercase().starts_with("pv")
}

/// Track list markers in a probe response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackLine<'a> {
    /// `Audios: English, Japanese`; the payload is the text after the colon.
    AudioHeader(&'a str),
    /// `Subtitles: en-US`; the payload is the text after the colon.
    SubtitleHeader(&'a str),
    Blank,
    Text(&'a str),
}

#[must_use]
pub fn classify_track_line(line: &str) -> TrackLine<'_> {
    static AUDIO: OnceLock<Regex> = OnceLock::new();
    static SUBS: OnceLock<Regex> = OnceLock::new();

    let trimmed = line.trim();
    if trimmed.is_empty() {
        return TrackLine::Blank;
    }

    let audio = get_regex(&AUDIO, r"(?i)\bAudio(?:s|(?:\s+Tracks)?)\s*:\s*");
    if let Some(m) = audio.find(line) {
        return TrackLine::AudioHeader(line[m.end()..].trim());
    }

    let subs = get_regex(&SUBS, r"(?i)\bSub(?:s|titles?)\s*:\s*");
    if let Some(m) = subs.find(line) {
        return TrackLine::SubtitleHeader(line[m.end()..].trim());
    }

    TrackLine::Text(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crunchy_series_header() {
        let line = "[Z:GRMG8ZQZR] One Piece (Seasons: 30, EPs: 1100)";
        assert_eq!(
            classify_crunchy(line),
            CrunchyLine::Series {
                id: "GRMG8ZQZR",
                name: "One Piece",
                seasons_count: 30,
                episodes_count: 1100,
            }
        );
    }

    #[test]
    fn test_crunchy_season_and_subtitles() {
        assert_eq!(
            classify_crunchy("  [S:GYVNXMVP6] Frieren (Season: 1) [SIMULCAST]"),
            CrunchyLine::Season {
                id: "GYVNXMVP6",
                name: "Frieren",
                number: 1,
            }
        );
        assert_eq!(
            classify_crunchy("- Subtitles: en-US, de-DE"),
            CrunchyLine::Subtitles {
                list: "en-US, de-DE"
            }
        );
    }

    #[test]
    fn test_crunchy_episode_and_special() {
        let line = "[E3] Frieren - Season 1 - Killing Magic [2023-10-06] [Japanese, ☆English]";
        match classify_crunchy(line) {
            CrunchyLine::Episode {
                special,
                number,
                full_name,
            } => {
                assert!(!special);
                assert_eq!(number, 3);
                assert_eq!(full_name, "Frieren - Season 1 - Killing Magic");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(
            classify_crunchy("[S1] Recap Special [Japanese]"),
            CrunchyLine::Episode { special: true, .. }
        ));
        assert_eq!(crunchy_season_token(line), Some(1));
        assert_eq!(crunchy_dub_list(line), Some("Japanese, ☆English"));
    }

    #[test]
    fn test_crunchy_noise_is_other() {
        assert_eq!(classify_crunchy("[INFO] Fetching series"), CrunchyLine::Other);
        assert_eq!(classify_crunchy(""), CrunchyLine::Other);
    }

    #[test]
    fn test_strip_air_date() {
        assert_eq!(strip_air_date("[2024-01-05] Show - Season 2 - Ep"), "Show - Season 2 - Ep");
        assert_eq!(strip_air_date("Show"), "Show");
    }

    #[test]
    fn test_hidive_headers() {
        assert_eq!(
            classify_hidive("[Z.1234] Made in Abyss (2 Seasons)"),
            HidiveLine::Series {
                id: "1234",
                name: "Made in Abyss",
                seasons_count: 2,
            }
        );
        assert_eq!(
            classify_hidive("[S.55] Season 2 The Golden City (12 Episodes)"),
            HidiveLine::Season {
                id: "55",
                number: 2,
                label: Some("The Golden City"),
                episodes_count: 12,
            }
        );
        assert_eq!(
            classify_hidive("[S.56] OVA (2 Episodes)"),
            HidiveLine::SpecialSeason {
                id: "56",
                number: None,
                label: "OVA",
                episodes_count: 2,
            }
        );
        assert!(matches!(
            classify_hidive("[S.57] Season 1 Movie (1 Episode)"),
            HidiveLine::SpecialSeason { number: Some(1), .. }
        ));
    }

    #[test]
    fn test_hidive_episode_and_flat_rows() {
        assert_eq!(
            classify_hidive("[E.901] The Edge of the Abyss"),
            HidiveLine::Episode {
                id: "901",
                title: "The Edge of the Abyss",
            }
        );
        assert_eq!(
            classify_hidive("[S01 E03] Departure"),
            HidiveLine::Flat {
                season_code: 1,
                number: FlatNumber::Whole(3),
                title: "Departure",
            }
        );
        assert!(matches!(
            classify_hidive("[S1E7.5] Recap"),
            HidiveLine::Flat {
                number: FlatNumber::Fractional(_),
                ..
            }
        ));
        assert_eq!(classify_hidive("[WARN] slow"), HidiveLine::Diagnostic);
    }

    #[test]
    fn test_title_flags() {
        assert!(is_special_episode_title("Episode 6.5 Recap"));
        assert!(!is_special_episode_title("Specialist"));
        assert!(is_unreleased_title("Coming Soon"));
        assert!(is_unreleased_title("Available on 12/24"));
        assert!(!is_unreleased_title("The Coming Storm"));
        assert!(is_trailer_title(" PV 2"));
    }

    #[test]
    fn test_track_lines() {
        assert_eq!(
            classify_track_line("Audios: English, Japanese"),
            TrackLine::AudioHeader("English, Japanese")
        );
        assert_eq!(
            classify_track_line("[INFO] Subtitles:"),
            TrackLine::SubtitleHeader("")
        );
        assert_eq!(classify_track_line("   "), TrackLine::Blank);
        assert_eq!(classify_track_line("  Spanish"), TrackLine::Text("Spanish"));
    }
}

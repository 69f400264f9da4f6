//! Per-series override rules from the monitor list.
//!
//! Rule strings look like `S:<season>` (skip the season), `S:<season>:E:1,3-5`
//! (skip episodes), `S:<season>:dub:eng,jpn`, `S:<season>:sub:en-US` and
//! `S:<season>:num:2`. `<season>` is the service's season id or a catalog key
//! such as `S2`.

use std::ops::RangeInclusive;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{Season, Series};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlacklistError {
    #[error("Rule must start with 'S:<season>': {0}")]
    MissingSeason(String),

    #[error("Unknown rule kind '{kind}' in: {rule}")]
    UnknownKind { kind: String, rule: String },

    #[error("Invalid episode list '{list}' in: {rule}")]
    InvalidEpisodes { list: String, rule: String },

    #[error("Invalid season number in: {0}")]
    InvalidSeasonNumber(String),

    #[error("Empty value list in: {0}")]
    EmptyValues(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    SkipSeason,
    SkipEpisodes(Vec<RangeInclusive<u32>>),
    Dubs(Vec<String>),
    Subs(Vec<String>),
    SeasonNumber(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub season: String,
    pub action: RuleAction,
}

impl Rule {
    fn matches(&self, key: &str, season: &Season) -> bool {
        season.id.as_deref() == Some(self.season.as_str()) || key.eq_ignore_ascii_case(&self.season)
    }
}

fn parse_episode_list(list: &str, rule: &str) -> Result<Vec<RangeInclusive<u32>>, BlacklistError> {
    let invalid = || BlacklistError::InvalidEpisodes {
        list: list.to_string(),
        rule: rule.to_string(),
    };

    let mut ranges = Vec::new();
    for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let range = match part.split_once('-') {
            Some((start, end)) => {
                let start: u32 = start.trim().parse().map_err(|_| invalid())?;
                let end: u32 = end.trim().parse().map_err(|_| invalid())?;
                if start > end {
                    return Err(invalid());
                }
                start..=end
            }
            None => {
                let n: u32 = part.parse().map_err(|_| invalid())?;
                n..=n
            }
        };
        ranges.push(range);
    }

    if ranges.is_empty() {
        return Err(invalid());
    }
    Ok(ranges)
}

fn parse_values(values: &str, rule: &str) -> Result<Vec<String>, BlacklistError> {
    let out: Vec<String> = values
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
        .collect();
    if out.is_empty() {
        return Err(BlacklistError::EmptyValues(rule.to_string()));
    }
    Ok(out)
}

/// Parses one rule string.
pub fn parse_rule(raw: &str) -> Result<Rule, BlacklistError> {
    let rule = raw.trim();
    let mut parts = rule.splitn(4, ':');

    let (Some(prefix), Some(season)) = (parts.next(), parts.next()) else {
        return Err(BlacklistError::MissingSeason(rule.to_string()));
    };
    if !prefix.eq_ignore_ascii_case("S") || season.trim().is_empty() {
        return Err(BlacklistError::MissingSeason(rule.to_string()));
    }
    let season = season.trim().to_string();

    let action = match (parts.next(), parts.next()) {
        (None, _) => RuleAction::SkipSeason,
        (Some(kind), Some(value)) => match kind.trim().to_lowercase().as_str() {
            "e" => RuleAction::SkipEpisodes(parse_episode_list(value, rule)?),
            "dub" => RuleAction::Dubs(parse_values(value, rule)?),
            "sub" => RuleAction::Subs(parse_values(value, rule)?),
            "num" => RuleAction::SeasonNumber(
                value
                    .trim()
                    .parse()
                    .ok()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| BlacklistError::InvalidSeasonNumber(rule.to_string()))?,
            ),
            other => {
                return Err(BlacklistError::UnknownKind {
                    kind: other.to_string(),
                    rule: rule.to_string(),
                });
            }
        },
        (Some(kind), None) => {
            return Err(BlacklistError::UnknownKind {
                kind: kind.to_string(),
                rule: rule.to_string(),
            });
        }
    };

    Ok(Rule { season, action })
}

pub fn parse_rules<S: AsRef<str>>(raw: &[S]) -> Result<Vec<Rule>, BlacklistError> {
    raw.iter().map(|r| parse_rule(r.as_ref())).collect()
}

/// Parses what it can and logs the rest.
#[must_use]
pub fn parse_rules_lenient<S: AsRef<str>>(raw: &[S]) -> Vec<Rule> {
    raw.iter()
        .filter_map(|r| match parse_rule(r.as_ref()) {
            Ok(rule) => Some(rule),
            Err(e) => {
                warn!(error = %e, "Ignoring invalid override rule");
                None
            }
        })
        .collect()
}

/// Resets skip flags and overrides of the series, then applies `rules`.
pub fn apply(series: &mut Series, rules: &[Rule]) {
    for season in series.seasons.values_mut() {
        season.dub_override = None;
        season.sub_override = None;
        season.number_override = None;
        for episode in season.episodes.values_mut() {
            episode.skip = false;
        }
    }

    for rule in rules {
        let mut matched = false;
        for (key, season) in &mut series.seasons {
            if !rule.matches(key, season) {
                continue;
            }
            matched = true;

            match &rule.action {
                RuleAction::SkipSeason => {
                    for episode in season.episodes.values_mut() {
                        episode.skip = true;
                    }
                }
                RuleAction::SkipEpisodes(ranges) => {
                    for episode in season.episodes.values_mut() {
                        if ranges.iter().any(|r| r.contains(&episode.number)) {
                            episode.skip = true;
                        }
                    }
                }
                RuleAction::Dubs(dubs) => season.dub_override = Some(dubs.clone()),
                RuleAction::Subs(subs) => season.sub_override = Some(subs.clone()),
                RuleAction::SeasonNumber(n) => season.number_override = Some(*n),
            }
            debug!(series_id = %series.id, season = %key, action = ?rule.action, "Applied override rule");
        }

        if !matched {
            warn!(series_id = %series.id, season = %rule.season, "Override rule matches no season");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Episode;

    fn series_with_episodes(count: u32) -> Series {
        let mut season = Season::new(Some("GY1".to_string()), "Season 1", 1);
        for n in 1..=count {
            season
                .episodes
                .insert(format!("E{n}"), Episode::new(n, n, format!("Ep {n}")));
        }
        let mut series = Series::new("G1", "Show");
        series.seasons.insert("S1".to_string(), season);
        series
    }

    fn skipped(series: &Series) -> Vec<u32> {
        let mut out: Vec<u32> = series.seasons["S1"]
            .episodes
            .values()
            .filter(|e| e.skip)
            .map(|e| e.number)
            .collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn test_parse_rules() {
        assert_eq!(parse_rule("S:GY1").unwrap().action, RuleAction::SkipSeason);
        assert_eq!(
            parse_rule("S:GY1:E:1,3-5").unwrap().action,
            RuleAction::SkipEpisodes(vec![1..=1, 3..=5])
        );
        assert_eq!(
            parse_rule("S:GY1:dub:eng, jpn").unwrap().action,
            RuleAction::Dubs(vec!["eng".to_string(), "jpn".to_string()])
        );
        assert_eq!(
            parse_rule("S:GY1:num:3").unwrap().action,
            RuleAction::SeasonNumber(3)
        );
    }

    #[test]
    fn test_parse_rejects_bad_rules() {
        assert!(parse_rule("GY1").is_err());
        assert!(parse_rule("S:").is_err());
        assert!(parse_rule("S:GY1:E:5-3").is_err());
        assert!(parse_rule("S:GY1:E:x").is_err());
        assert!(parse_rule("S:GY1:foo:1").is_err());
        assert!(parse_rule("S:GY1:num:0").is_err());
        assert!(parse_rule("S:GY1:dub:").is_err());
    }

    #[test]
    fn test_episode_range_skips_only_listed() {
        let mut series = series_with_episodes(8);
        apply(&mut series, &parse_rules(&["S:GY1:E:3-5"]).unwrap());
        assert_eq!(skipped(&series), vec![3, 4, 5]);
    }

    #[test]
    fn test_apply_resets_previous_skips() {
        let mut series = series_with_episodes(4);
        apply(&mut series, &parse_rules(&["S:GY1"]).unwrap());
        assert_eq!(skipped(&series), vec![1, 2, 3, 4]);

        apply(&mut series, &parse_rules(&["S:S1:E:2"]).unwrap());
        assert_eq!(skipped(&series), vec![2]);
    }

    #[test]
    fn test_overrides_are_set_and_cleared() {
        let mut series = series_with_episodes(1);
        apply(
            &mut series,
            &parse_rules(&["S:GY1:dub:eng", "S:GY1:sub:en-US", "S:GY1:num:2"]).unwrap(),
        );
        let season = &series.seasons["S1"];
        assert_eq!(season.dub_override, Some(vec!["eng".to_string()]));
        assert_eq!(season.sub_override, Some(vec!["en-US".to_string()]));
        assert_eq!(season.naming_number(), 2);

        apply(&mut series, &[]);
        assert_eq!(series.seasons["S1"].dub_override, None);
        assert_eq!(series.seasons["S1"].naming_number(), 1);
    }

    #[test]
    fn test_lenient_parse_drops_invalid() {
        let rules = parse_rules_lenient(&["S:GY1", "nonsense"]);
        assert_eq!(rules.len(), 1);
    }
}

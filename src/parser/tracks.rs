use super::lang::{dedupe_casefold, normalize_audio, normalize_subtitle};
use super::matcher::{TrackLine, classify_track_line};

/// Audio and subtitle tracks the tool reported for one episode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackList {
    pub dubs: Vec<String>,
    pub subs: Vec<String>,
}

#[derive(Clone, Copy)]
enum Block {
    None,
    Audio,
    Subtitles,
}

fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(',').map(str::trim).filter(|t| !t.is_empty())
}

/// Reads `Audio:`/`Subtitles:` blocks out of a probe response.
///
/// A header may carry values on its own line and on the lines that follow;
/// a blank line ends the block. Unknown names are dropped.
#[must_use]
pub fn parse_track_output(output: &str) -> TrackList {
    let mut dubs = Vec::new();
    let mut subs = Vec::new();
    let mut block = Block::None;

    let mut collect = |block: Block, text: &str| match block {
        Block::Audio => dubs.extend(tokens(text).filter_map(normalize_audio)),
        Block::Subtitles => subs.extend(tokens(text).filter_map(normalize_subtitle)),
        Block::None => {}
    };

    for line in output.lines() {
        match classify_track_line(line) {
            TrackLine::Blank => block = Block::None,
            TrackLine::AudioHeader(rest) => {
                block = Block::Audio;
                collect(block, rest);
            }
            TrackLine::SubtitleHeader(rest) => {
                block = Block::Subtitles;
                collect(block, rest);
            }
            TrackLine::Text(text) => collect(block, text),
        }
    }

    TrackList {
        dubs: dedupe_casefold(dubs),
        subs: dedupe_casefold(subs),
    }
}

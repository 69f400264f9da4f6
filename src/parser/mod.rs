pub mod lang;
pub mod matcher;
pub mod reducer;
pub mod tracks;

pub use reducer::{ParsedTree, TrackProber, enrich_tracks, reduce};
pub use tracks::{TrackList, parse_track_output};

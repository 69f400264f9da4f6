pub mod catalog;

pub use catalog::{Catalog, Episode, EpisodeFlag, Season, Series, SeriesMap};

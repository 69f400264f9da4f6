pub mod media;
pub use media::{LocalTracks, MediaService, TrackInspector};

pub mod notify;
pub use notify::Notifier;

pub mod streaming_service;
pub use streaming_service::{ServiceError, StreamingService};

pub mod streaming_service_impl;
pub use streaming_service_impl::MdnxService;

pub const APP_NAME: &str = "mdnx-autodl";

pub const LOG_FILE_STEM: &str = "mdnx-autodl";

/// Name the tool is told to use for its output file inside the temp dir.
pub const DOWNLOAD_FILE_STEM: &str = "output";

pub const DEFAULT_OUTPUT_EXTENSION: &str = "mkv";

pub const STDBUF_PATH: &str = "/usr/bin/stdbuf";

pub mod markers {
    pub const SUCCESS: &[&str] = &["[mkvmerge Done]"];

    pub const AUTH_ERRORS: &[&str] = &[
        "invalid_grant",
        "Token Refresh Failed",
        "Authentication required",
        "Anonymous",
    ];
}

pub mod intervals {
    use std::time::Duration;

    pub const CANCEL_GRACE: Duration = Duration::from_secs(5);

    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

    pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
}

pub mod limits {
    /// Flat listing groups may differ from the declared season size by this much.
    pub const FLAT_GROUP_TOLERANCE: usize = 2;
}

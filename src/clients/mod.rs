pub mod mdnx;
pub mod media_server;

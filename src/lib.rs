pub mod config;
pub mod connection;
pub mod errors;
pub mod logging;
pub mod projection;
pub mod protocol;
pub mod replay;
pub mod session;
pub mod stage;
pub mod tracker;
pub mod tracker_config;
pub mod ui;

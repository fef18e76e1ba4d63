//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                   |
//! |-----------------|-----------------------------------------------------|
//! | `research`      | `Research`                                         |
//! | `interactive`   | `Interactive`                                      |
//! | `replay`        | `Replay`                                           |
//! | `stages`        | `Stages`                                           |
//! | `config`        | `Config`                                           |

pub mod config;
pub mod interactive;
pub mod replay;
pub mod research;
pub mod stages;

pub use config::cmd_config;
pub use interactive::cmd_interactive;
pub use replay::cmd_replay;
pub use research::cmd_research;
pub use stages::cmd_stages;

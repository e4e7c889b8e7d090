//! CLI command implementations

mod attributes;
mod config;
mod parse;
mod stored;

pub use attributes::attributes_command;
pub use config::{config_init, config_path, config_show, load_remote_config};
pub use parse::parse_command;
pub use stored::{forget_command, stored_command};

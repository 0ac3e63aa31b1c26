pub mod config;
pub mod keys;
pub mod serve;
pub mod sites;
pub mod status;
pub mod utils;

pub use config::init_config;
pub use keys::run_key_command;
pub use serve::serve;
pub use sites::run_site_command;
pub use status::{check, status, unlock};

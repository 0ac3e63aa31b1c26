pub mod bridge;
pub mod platform;
pub mod settings;
pub mod site_limits;

pub use self::site_limits::*;

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use config::AppConfig;
pub use error::{PayloadError, UnknownStatus};
pub use time::{local_date, parse_timezone};
pub use types::*;

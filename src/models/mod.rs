pub mod account;
pub mod config;

pub use account::{Account, AccountStatus, AccountToken, Provider, Quota};
pub use config::{default_data_dir, AppConfig};

pub mod app;
pub mod config;
pub mod error;
pub mod platform;

pub use app::{App, AppState};
pub use config::AppConfig;
pub use error::{AppError, AppResult};

use std::path::PathBuf;

use segfault_gfx::GfxError;
use segfault_renderer::RenderThreadError;

use crate::app::AppState;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("cannot init platform: {0}")]
    Platform(String),

    #[error("cannot init window: {0}")]
    Window(String),

    #[error(transparent)]
    Gfx(#[from] GfxError),

    #[error(transparent)]
    RenderThread(#[from] RenderThreadError),

    #[error("`{op}` is not allowed while the app is {state:?}")]
    InvalidState { op: &'static str, state: AppState },

    #[error("failed to read config `{}`: {source}", path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),
}

pub type AppResult<T> = Result<T, AppError>;

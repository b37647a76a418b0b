use anyhow::Context;
use segfault_app::app::{App, panic_handler};
use segfault_app::config::AppConfig;
use segfault_crate_tools::init_log::init_log;
use segfault_gfx::DrawCommand;

/// 用法：`hello_world [config.toml]`
fn main() {
    std::panic::set_hook(Box::new(panic_handler));

    init_log();
    tracy_client::Client::start();
    tracy_client::set_thread_name!("MainThread");

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{:#}", e);
            std::process::exit(-1);
        }
    };

    let code = match run(config) {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{:#}", e);
            -1
        }
    };
    log::info!("end run.");
    std::process::exit(code);
}

fn load_config() -> anyhow::Result<AppConfig> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(AppConfig::default());
    };
    AppConfig::from_file(&path).with_context(|| format!("failed to load config from {}", path))
}

fn run(config: AppConfig) -> anyhow::Result<()> {
    let window = config.window.clone();
    let mut app = App::from_config(config).context("failed to create app")?;

    if let Err(e) =
        app.init("hello_world", window.x, window.y, window.width, window.height, &window.title, window.fullscreen)
    {
        app.shutdown().ok();
        return Err(e).context("Cannot init app");
    }

    // 一个三角形
    app.add_draw_command(DrawCommand::draw(3, 1))?;

    while app.mainloop() {
        app.draw_frame();
    }
    log::info!("{} frames presented", app.frames());

    app.shutdown()?;
    Ok(())
}

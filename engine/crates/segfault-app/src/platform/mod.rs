pub mod headless_provider;
pub mod surface_provider;
// pump_app_events 在这些平台上不可用
#[cfg(not(any(target_os = "ios", target_arch = "wasm32")))]
pub mod winit_provider;

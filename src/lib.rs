/// MathAssist Library
///
/// Shared modules for the tutoring GUI and the headless sensor monitor

pub mod label_mapper;
pub mod serial_reader;
pub mod prompts;
pub mod completion_client;
pub mod hint_workflow;
pub mod config_loader;

/// env_logger with `info` as the default filter (`debug` when asked); RUST_LOG still wins
pub fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .try_init();
}

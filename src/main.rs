//! Fleet Gateway entrypoint: loads the AEAD master key, opens the
//! persistent store, starts the logger and the background workers, then
//! serves the proxy + admin HTTP surface until the process is signaled.

use fleet_gateway_lib::{config, crypto, logger, resolver, server, store, tokens};

#[tokio::main]
async fn main() {
    std::panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());
        logger::error("panic", &format!("PANIC occurred: message='{}', location='{}'", message, location));
        eprintln!("FATAL PANIC: {} at {}", message, location);
    }));

    logger::init();

    if let Err(err) = crypto::init_master_key() {
        logger::error("startup", &format!("fatal: failed to initialize master key: {err}"));
        eprintln!("fatal: failed to initialize master key: {err}");
        std::process::exit(1);
    }

    store::init();
    config::init();
    config::spawn_reload_tick();
    resolver::spawn_health_worker();
    tokens::spawn_bump_worker();

    logger::info("startup", "fleet gateway initialized, serving requests");

    server::serve().await;
}

mod camera;
mod capture;
mod config;
mod frame;
mod motion;
mod server;
mod stream;

use config::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    if let Err(e) = std::fs::create_dir_all(&config.capture.output_dir) {
        eprintln!(
            "Failed to create output directory {}: {e}",
            config.capture.output_dir
        );
        std::process::exit(1);
    }

    info!(
        camera_url = config.camera.url,
        output_dir = config.capture.output_dir,
        min_area = config.motion.min_area,
        cooldown_secs = config.capture.cooldown_secs,
        frames_to_confirm = config.capture.frames_to_confirm,
        "starting camwatch"
    );

    let addr = format!("0.0.0.0:{}", config.server.port);
    let state = Arc::new(server::AppState::new(config));
    let app = server::router(state);

    info!(addr, "camwatch HTTP server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    axum::serve(listener, app).await.unwrap();
}

use std::path::PathBuf;

use friendfinder_server::config::ConfigError;
use friendfinder_server::server;

#[tokio::main]
async fn main() -> Result<(), ConfigError> {
    let config_path = std::env::var("SERVER_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("crates/server/res/config.toml"));
    server::run(&config_path).await
}

use log::{error, info};
use mimalloc::MiMalloc;
use rudis::config::ServerConfig;
use rudis::server;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = ServerConfig::from_env();
    info!("starting rudis-server with log at {}", config.log_path);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
        }
    };

    if let Err(e) = server::run(config, shutdown).await {
        error!("server exited with error: {e}");
        std::process::exit(1);
    }
}

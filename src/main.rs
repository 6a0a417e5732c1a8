use log::*;
use service::{config::Config, logging::Logger, AppState};
use std::error::Error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::new();
    Logger::init_logger(&config)?;

    info!("Starting up...");
    info!(
        "Using {} backend for fan-out and tickets",
        config.store_backend
    );

    let backends = service::init_backends(&config).await?;
    let app_state = AppState::start(config, backends);
    let broker = app_state.broker.clone();

    web::init_server(app_state).await?;

    if !broker.is_finished() {
        debug!("Broker tasks still winding down at exit");
    }
    info!("Shut down cleanly");
    Ok(())
}

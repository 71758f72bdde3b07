use std::sync::Arc;

use clap::Parser;
use log::info;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

use webrtc_relay_signaling_server::config::Config;
use webrtc_relay_signaling_server::connection;
use webrtc_relay_signaling_server::gateway::MediaGateway;
use webrtc_relay_signaling_server::kurento::KurentoConnector;
use webrtc_relay_signaling_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    let log_config = ConfigBuilder::new()
        .add_filter_ignore_str("tungstenite")
        .add_filter_ignore_str("tokio_tungstenite")
        .add_filter_ignore_str("hyper")
        .build();
    TermLogger::init(
        config.log_level,
        log_config,
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;
    config.validate()?;

    let connector = KurentoConnector::new(config.media_server_uri.clone(), config.keepalive());
    let gateway = MediaGateway::new(connector, config.provision_timeout());
    let state = Arc::new(AppState::new(gateway));

    let signaling_channel = connection::routes(state.clone(), config.ws_path.clone());
    let (address, server) = warp::serve(signaling_channel)
        .try_bind_with_graceful_shutdown(config.listen, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("failed to listen for shutdown signal: {e}");
            }
        })?;
    info!(
        "signaling relay listening on ws://{}/{}, media server {}",
        address, config.ws_path, config.media_server_uri
    );

    server.await;
    info!("shutting down");
    state.release_all().await;
    Ok(())
}

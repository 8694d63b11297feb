use roomrelay::{app, config::Config, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("roomrelay=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    let listen_addr = config.listen_addr;
    let app_state = AppState::connect(config).await?;

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app(app_state)).await?;
    Ok(())
}

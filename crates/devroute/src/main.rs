//! devroute binary: load configuration, initialize tracing, serve.

use devroute::config::DevrouteConfig;

fn main() -> anyhow::Result<()> {
    // Determine config path
    let config_path = {
        let args: Vec<String> = std::env::args().collect();
        // Check for --config flag first
        args.iter()
            .position(|a| a == "--config")
            .and_then(|i| args.get(i + 1).cloned())
            // Fall back to positional arg
            .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
            .or_else(|| std::env::var("DEVROUTE_CONFIG").ok())
            .unwrap_or_else(|| "devroute.toml".to_string())
    };

    let config = DevrouteConfig::load(&config_path)?;

    // Build the runtime before tracing: the tonic OTLP exporter needs a reactor
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let _tracing_guard = devroute_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address(),
            allow_loopback = config.forward.allow_loopback,
            connect_timeout_secs = config.forward.connect_timeout_secs,
            response_timeout_secs = config.forward.response_timeout_secs,
            "Starting devroute"
        );

        devroute::server::run(&config).await
    })
}

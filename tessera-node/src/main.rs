use clap::Parser;
use tessera_node::{
    cli::{init_config, write_init_config, Cli, Commands},
    config::NodeConfig,
    rpc::start_rpc_server,
    runtime::NodeBuilder,
};
use tracing::{error, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Commands::Init { node_id, listen, peers, force }) = &cli.command {
        let config = init_config(node_id, listen, peers);
        write_init_config(&cli.config, &config, *force)?;
        println!("wrote {}", cli.config.display());
        return Ok(());
    }

    let mut config = NodeConfig::load_from_file(&cli.config)?;
    cli.apply_overrides(&mut config);

    std::panic::set_hook(Box::new(|info| {
        let msg = match info.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<Any>",
            },
        };
        let location = match info.location() {
            Some(l) => format!("at {}:{}:{}", l.file(), l.line(), l.column()),
            None => "unknown location".to_string(),
        };
        let err_msg = format!("CRASH: {} {}\n", msg, location);
        eprintln!("{}", err_msg);
        let _ = std::fs::write("panic.log", err_msg);
    }));

    // Audit trail: only `consensus` target lines go to the file.
    let log_filename = format!("logs/consensus-{}.log", config.node_id);
    let file_appender = tracing_appender::rolling::never(".", log_filename);
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let consensus_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target() == "consensus"
        }));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tessera_node=debug".into()),
        )
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target() != "consensus"
        }));

    tracing_subscriber::registry()
        .with(consensus_layer)
        .with(stdout_layer)
        .init();

    info!("--- INICIANDO NÓ TESSERA ---");
    info!("Config: {}", cli.config.display());
    info!("Nó {} ({}), {} membros", config.node_id, config.env, config.cluster.nodes.len());

    let listen = config.listen_addr.clone();
    let runtime = match NodeBuilder::new(config).build().await {
        Ok(rt) => rt,
        Err(e) => {
            error!("Falha ao iniciar o nó: {}.", e);
            return Err(e.into());
        }
    };

    let (addr, server) = start_rpc_server(&listen, runtime.handle.clone()).await?;
    info!("Nó iniciado em {}. Pressione Ctrl+C para parar.", addr);

    tokio::signal::ctrl_c().await?;
    info!("Encerrando...");
    server.abort();
    runtime.shutdown().await;
    Ok(())
}

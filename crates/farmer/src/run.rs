//! Process bootstrap: assemble the components, run the server, and take the
//! node down cleanly.

use {
    crate::{
        PROTOCOL_VERSION, api,
        arguments::{Arguments, Command},
        config::{self, Config, ValidatedConfig},
        engine::{Engine, EngineConfig},
        heartbeat::{Heartbeat, NoPortMapper},
        outbound::HttpTransport,
        shutdown, status,
    },
    anyhow::{Context, Result},
    clap::Parser,
    farmer_crypto::Signer,
    message::Contact,
    std::{
        net::{Ipv4Addr, SocketAddr},
        path::Path,
        sync::Arc,
        time::Duration,
    },
    store::Store,
    tokio::sync::oneshot,
};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(60);

pub async fn start(args: impl Iterator<Item = String>) {
    let args = Arguments::parse_from(args);
    match args.command {
        Command::New { config } => {
            if let Err(err) = config::write_template(&config) {
                eprintln!("writing configuration template failed: {err:#}");
                std::process::exit(2);
            }
            println!("wrote configuration template to {}", config.display());
        }
        Command::Start { config } => {
            let config = match Config::load(&config).and_then(Config::validate) {
                Ok(config) => config,
                Err(err) => {
                    eprintln!("configuration error: {err:#}");
                    std::process::exit(2);
                }
            };
            if let Err(err) =
                observe::tracing::initialize(&config.log_filter, config.log_file.as_deref())
            {
                eprintln!("could not open log output: {err}");
                std::process::exit(2);
            }
            observe::panic_hook::install();
            if let Err(err) = run(config).await {
                tracing::error!(?err, "farmer exited with error");
                std::process::exit(1);
            }
        }
    }
}

pub async fn run(config: ValidatedConfig) -> Result<()> {
    let store = Store::open(config.contract_db_path()).context("open contract database")?;
    let shards_dir = config.shards_dir();
    remove_partial_downloads(&shards_dir);

    let signer = Signer::from_secret_hex(&config.node_secret).context("load signing key")?;
    let contact = Contact {
        address: config.local_ip.to_string(),
        port: config.local_port,
        node_id: signer.node_id(),
        protocol: PROTOCOL_VERSION.to_string(),
    };
    tracing::info!(node_id = %contact.node_id, address = %contact.address, "farmer identity ready");

    let transport = Arc::new(HttpTransport::new()?);
    let (status_handle, status_emitter) = status::channel(Box::new(status::LogSink));
    let engine = Engine::new(
        EngineConfig {
            contact,
            shards_dir,
            payout_address: config.payout_address.clone(),
            retrieve_requires_shard: config.retrieve_requires_shard,
        },
        signer,
        store,
        transport,
        status_handle,
    );

    let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.local_port));
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let mut server = tokio::spawn(api::serve(bind, engine.clone(), shutdown_rx));
    let mut heartbeat = tokio::spawn(
        Heartbeat::new(engine.clone(), config.seeds.clone(), Arc::new(NoPortMapper)).run(),
    );
    let mut ui = tokio::spawn(status_emitter.run());

    tokio::select! {
        _ = shutdown::signal_handler() => {
            tracing::info!("shutdown requested, draining");
        }
        result = &mut heartbeat => {
            match result {
                Ok(Ok(())) => tracing::error!("disconnected from the network, shutting down"),
                Ok(Err(err)) => tracing::error!(?err, "failed to join the network"),
                Err(err) => tracing::error!(?err, "heartbeat task failed"),
            }
        }
        result = &mut server => {
            heartbeat.abort();
            ui.abort();
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err).context("server"),
                Err(err) => Err(err).context("server task"),
            };
        }
        _ = &mut ui => {
            tracing::info!("status emitter exited");
        }
    }

    heartbeat.abort();
    ui.abort();
    let _ = shutdown_tx.send(());
    match tokio::time::timeout(SHUTDOWN_DEADLINE, server).await {
        Ok(Ok(Ok(()))) => tracing::info!("server drained"),
        Ok(Ok(Err(err))) => tracing::warn!(?err, "server exited with error during drain"),
        Ok(Err(err)) => tracing::warn!(?err, "server task failed during drain"),
        Err(_) => tracing::warn!("server did not drain within the shutdown deadline"),
    }
    Ok(())
}

/// Interrupted mirror downloads leave `*.part` files behind; they are never
/// valid shards.
fn remove_partial_downloads(shards_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(shards_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_some_and(|extension| extension == "part") {
            tracing::warn!(?path, "removing interrupted download");
            if let Err(err) = std::fs::remove_file(&path) {
                tracing::warn!(?path, ?err, "could not remove partial download");
            }
        }
    }
}

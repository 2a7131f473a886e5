//! Agent entry point.
//!
//! Loads the configuration, selects the persistence backend (file over
//! database over memory), wires the buffer channel between the adapter and
//! the writer, and runs the three workers until a signal or a fatal adapter
//! error. On shutdown the writer and publisher are awaited so the in-memory
//! staging reaches the persister before the process exits.

use std::process::exit;
use std::sync::Arc;

use telemetry_agent::{
    Adapter, AdapterError, Config, DatabasePersister, FilePersister, MemoryPersister, Persister,
    Publisher, Writer, ADAPTER_PORT,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "could not load the configuration");
            exit(exitcode::CONFIG);
        }
    };

    let persister: Arc<dyn Persister> = if let Some(file) = &config.store.file {
        info!(path = %file.path.display(), "enabling file persistence");
        match FilePersister::new(&file.path) {
            Ok(persister) => Arc::new(persister),
            Err(err) => {
                error!(%err, "could not open the file store");
                exit(exitcode::IOERR);
            }
        }
    } else if let Some(database) = &config.store.database {
        info!(host = %database.host, name = %database.name, "enabling database persistence");
        match DatabasePersister::connect(database).await {
            Ok(persister) => Arc::new(persister),
            Err(err) => {
                error!(%err, "could not connect to the database store");
                exit(exitcode::UNAVAILABLE);
            }
        }
    } else {
        info!("enabling in-memory persistence");
        Arc::new(MemoryPersister::new(
            config.advanced.max_records_for_single_write,
            config.advanced.buffer_size_factor,
        ))
    };

    let shutdown = CancellationToken::new();
    let (buffer_tx, buffer_rx) = mpsc::channel::<String>(config.buffer_capacity());
    let (fatal_tx, mut fatal_rx) = mpsc::channel::<AdapterError>(1);

    let adapter = Adapter::new(
        ADAPTER_PORT,
        buffer_tx,
        config.mixer.tls.clone(),
        &shutdown,
    );
    tokio::spawn(async move {
        if let Err(err) = adapter.run().await {
            let _ = fatal_tx.send(err).await;
        }
    });

    let writer = Writer::new(
        buffer_rx,
        Arc::clone(&persister),
        config.advanced.max_records_for_single_write,
        config.buffer_timeout(),
        shutdown.clone(),
    );
    let writer_handle = tokio::spawn(writer.run());

    let publisher = Publisher::new(
        Arc::clone(&persister),
        config.sp_endpoint.url.clone(),
        reqwest::Client::new(),
        config.send_interval(),
        shutdown.clone(),
    );
    let publisher_handle = tokio::spawn(publisher.run());

    let fatal = tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received, draining");
            false
        }
        Some(err) = fatal_rx.recv() => {
            error!(%err, "adapter failed");
            true
        }
    };

    // Give the writer and publisher the chance to flush buffered records to
    // the persister before the process goes away.
    shutdown.cancel();
    let _ = writer_handle.await;
    let _ = publisher_handle.await;

    if fatal {
        exit(exitcode::SOFTWARE);
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("could not install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

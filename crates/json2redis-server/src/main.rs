// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use json2redis::{
    accumulator::Accumulator,
    accumulator_service::AccumulatorService,
    config::Config,
    flusher::{Flusher, FlusherConfig},
    listener::Listener,
    message::KeyExtractor,
    pool::MessagePool,
    sink::{RedisSink, Sink},
};

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = match Config::load(Path::new(".")) {
        Ok(config) => config,
        Err(e) => {
            // logging is not configured yet
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let env_filter = format!("h2=off,hyper=off,redis=off,{}", config.log_level);
    let filter = match EnvFilter::try_new(env_filter) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Could not parse log level in configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let sink = RedisSink::connect(&config.redis_config())
        .await
        .map_err(|e| format!("Unable to connect to redis at {}: {e}", config.redis))?;
    sink.ping()
        .await
        .map_err(|e| format!("Redis at {} is not answering: {e}", config.redis))?;
    info!("Connected to redis at {}", config.redis);

    let pool = Arc::new(MessagePool::new(config.pool_capacity())?);
    let accumulator = Accumulator::new(
        KeyExtractor::new(config.key_field.clone()),
        Arc::clone(&pool),
        config.batch_size,
    );
    let flusher = Flusher::new(FlusherConfig {
        sink: Arc::new(sink),
        pool,
        write_timeout: config.write_timeout(),
    })?;

    let cancel_token = CancellationToken::new();
    let (service, handle) = AccumulatorService::new(
        config.accumulator_config()?,
        accumulator,
        flusher,
        cancel_token.clone(),
    )?;
    let service = tokio::spawn(service.run());

    let listener_config = config.listener_config();
    let listener = Listener::bind(&listener_config, handle, cancel_token.clone())
        .await
        .map_err(|e| {
            format!(
                "Unable to listen on {}:{}: {e}",
                listener_config.host, listener_config.port
            )
        })?;
    info!("Listening on {}", listener.local_addr()?);
    let listener = tokio::spawn(async move {
        if let Err(e) = listener.serve().await {
            error!("Listener stopped: {e}");
        }
    });

    shutdown_signal().await;
    info!("Shutting down, flushing buffered payloads");
    cancel_token.cancel();

    if let Err(e) = listener.await {
        error!("Listener task failed: {e}");
    }
    service.await?;
    debug!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Unable to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

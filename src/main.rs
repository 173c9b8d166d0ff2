use std::process;

use tagcache::{
    application::error::AppError,
    cache::CacheConfig,
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    match command {
        config::Command::Serve(_) => {
            telemetry::init(&settings.logging)?;
            run_serve(settings).await
        }
        config::Command::CheckConfig(_) => {
            println!("{settings:#?}");
            Ok(())
        }
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let state = HttpState::with_demo_catalog(CacheConfig::from(&settings.cache));
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| InfraError::bind(settings.server.addr, err))?;

    info!(
        target = "tagcache::serve",
        addr = %settings.server.addr,
        cache_enabled = settings.cache.enabled,
        capacity = settings.cache.capacity.get(),
        single_flight = settings.cache.single_flight,
        "Listening"
    );

    let graceful = settings.server.graceful_shutdown;
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!(
                target = "tagcache::serve",
                timeout_secs = graceful.as_secs(),
                "Shutdown requested, draining connections"
            );
            tokio::spawn(async move {
                tokio::time::sleep(graceful).await;
                warn!(
                    target = "tagcache::serve",
                    "Graceful shutdown timed out, exiting"
                );
                process::exit(0);
            });
        })
        .await
        .map_err(InfraError::Serve)?;

    info!(target = "tagcache::serve", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

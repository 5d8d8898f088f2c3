mod capture;
mod config;
mod lifecycle;
mod routes;

use std::process::ExitCode;
use std::sync::Arc;

use actix_web::dev::Server;
use actix_web::{App, HttpServer};
use anyhow::Context;
use capture::RequestCapture;
use config::{Config, ListenAddr};
use lifecycle::{Lifecycle, Resources, Signals, State};
use sea_orm::ConnectionTrait;
use txlog_services::{
    CachedWriter, Dialect, FileSink, MemCachedWriter, SqlBuilder, TableShape, UuidGenerator,
    XxHasher, create_connection, provision,
};
use txlog_shared::TxRecord;

#[actix_web::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let config = Config::from_env();
    let debug = config.as_ref().map(|c| c.debug).unwrap_or(false);
    env_logger::init_from_env(
        env_logger::Env::new().default_filter_or(if debug { "debug" } else { "info" }),
    );

    let result = match config {
        Ok(config) => run(config).await,
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let mut lifecycle = Lifecycle::new();

    let db = create_connection(&config.db).await?;
    let backend = db.get_database_backend();
    let dialect = Dialect::resolve(config.dialect.as_deref(), backend)?;
    provision(&db, dialect).await?;

    let req_failed = Arc::new(
        FileSink::open(&config.req_failed_file, config.log_file_mode)
            .with_context(|| format!("opening {}", config.req_failed_file.display()))?,
    );
    let db_failed = Arc::new(
        FileSink::open(&config.db_failed_file, config.log_file_mode)
            .with_context(|| format!("opening {}", config.db_failed_file.display()))?,
    );

    let builder = SqlBuilder::new(
        XxHasher::default(),
        UuidGenerator,
        TableShape::default(),
        backend,
        req_failed.clone(),
    );
    let (writer, flush) = MemCachedWriter::<TxRecord>::new(
        db.clone(),
        builder,
        config.writer.clone(),
        db_failed.clone(),
    );
    let mut resources = Resources {
        server: None,
        writer: flush.spawn(),
        sinks: vec![req_failed, db_failed],
        db,
    };

    let (mut signals, server) = match listen(&config, Arc::new(writer)) {
        Ok(started) => started,
        Err(e) => {
            lifecycle.advance(State::ShuttingDown);
            if let Err(release) = resources.release(config.shutdown_mode).await {
                log::error!("{:#}", release);
            }
            lifecycle.advance(State::Stopped);
            return Err(e);
        }
    };

    resources.server = Some(server.handle());
    let serving = actix_rt::spawn(server);
    lifecycle.advance(State::Serving);
    log::info!("listening on {}", config.listen);

    let signal = signals.recv().await;
    log::info!("received {}, shutting down", signal);
    lifecycle.advance(State::ShuttingDown);

    let released = resources.release(config.shutdown_mode).await;
    let served = match serving.await {
        Ok(res) => res.context("server"),
        Err(e) => Err(anyhow::anyhow!("server task: {e}")),
    };

    lifecycle.advance(State::Stopped);
    released.and(served)
}

/// Register termination signals, then bind the listener.
fn listen(config: &Config, writer: Arc<dyn CachedWriter<TxRecord>>) -> anyhow::Result<(Signals, Server)> {
    let signals = Signals::register().context("registering signal handlers")?;

    let server = HttpServer::new(move || {
        App::new()
            .wrap(RequestCapture::new(writer.clone()))
            .configure(routes::configure)
    })
    .disable_signals()
    .shutdown_timeout(config.shutdown_grace.as_secs());

    let server = match &config.listen {
        ListenAddr::Tcp(addr) => server.bind(addr.as_str()),
        #[cfg(unix)]
        ListenAddr::Unix(path) => server.bind_uds(path),
        #[cfg(not(unix))]
        ListenAddr::Unix(_) => Err(std::io::Error::other("unix sockets are not supported here")),
    }
    .with_context(|| format!("binding {}", config.listen))?
    .run();

    Ok((signals, server))
}

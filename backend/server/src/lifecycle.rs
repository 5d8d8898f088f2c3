use std::io;
use std::sync::Arc;

use actix_web::dev::ServerHandle;
use anyhow::anyhow;
use sea_orm::DatabaseConnection;
use txlog_services::{FileSink, ShutdownMode, WriterTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Serving,
    ShuttingDown,
    Stopped,
}

#[derive(Debug)]
pub struct Lifecycle {
    state: State,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: State::Created,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Move forward one step; anything else is ignored.
    pub fn advance(&mut self, next: State) -> bool {
        let allowed = matches!(
            (self.state, next),
            (State::Created, State::Serving)
                | (State::Created, State::ShuttingDown)
                | (State::Serving, State::ShuttingDown)
                | (State::ShuttingDown, State::Stopped)
        );
        if allowed {
            log::info!("server state {:?} -> {:?}", self.state, next);
            self.state = next;
        } else {
            log::warn!("ignoring server state change {:?} -> {:?}", self.state, next);
        }
        allowed
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// SIGINT and SIGTERM, registered before the listener is bound.
pub struct Signals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl Signals {
    #[cfg(unix)]
    pub fn register() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn register() -> io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> &'static str {
        let _ = tokio::signal::ctrl_c().await;
        "Ctrl-C"
    }
}

/// Everything that must be released on the way out.
pub struct Resources {
    pub server: Option<ServerHandle>,
    pub writer: WriterTask,
    pub sinks: Vec<Arc<FileSink>>,
    pub db: DatabaseConnection,
}

impl Resources {
    /// Stop the server, then the writer, then close sinks and the
    /// connection. Every step runs even if an earlier one failed.
    pub async fn release(self, mode: ShutdownMode) -> anyhow::Result<()> {
        let mut failures = Vec::new();

        if let Some(server) = self.server {
            server.stop(true).await;
            log::info!("server stopped");
        }

        if let Err(e) = self.writer.stop(mode).await {
            failures.push(format!("writer: {e}"));
        }

        for sink in &self.sinks {
            if let Err(e) = sink.close() {
                failures.push(format!("{}: {e}", sink.path().display()));
            }
        }

        if let Err(e) = self.db.close().await {
            failures.push(format!("database: {e}"));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("shutdown failed: {}", failures.join("; ")))
        }
    }
}

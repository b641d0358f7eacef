//! Top-level server handle.
//!
//! Wires [`Config`] and a [`RequestHandler`] into a running
//! [`Scheduler`] and exposes the start/shutdown surface a command-line
//! front-end (out of scope here, per spec.md §1) would call.

use std::sync::Arc;

use crate::config::Config;
use crate::error::EngineError;
use crate::response::{EchoHandler, RequestHandler};
use crate::scheduler::Scheduler;

/// A bound, running instance of the engine.
pub struct Server {
    scheduler: Scheduler,
}

impl Server {
    /// Binds every configured listener and starts the worker pool (and,
    /// in `FairBalancing` mode, the balancer thread).
    pub fn start(config: Config, handler: Arc<dyn RequestHandler>) -> Result<Self, EngineError> {
        tracing::info!(
            workers = config.workers,
            mode = ?config.scheduler_mode,
            listeners = config.listeners.len(),
            "starting engine"
        );
        let scheduler = Scheduler::start(config, handler)?;
        Ok(Self { scheduler })
    }

    /// Convenience constructor using [`EchoHandler`] in place of a real
    /// application; useful for smoke-testing the engine on its own.
    pub fn start_with_echo(config: Config) -> Result<Self, EngineError> {
        Self::start(config, Arc::new(EchoHandler))
    }

    /// Current aggregate active-connection count across all workers.
    pub fn active_connections(&self) -> u64 {
        self.scheduler.active_connections()
    }

    /// `server_capacity` computed at startup.
    pub fn capacity(&self) -> u64 {
        self.scheduler.capacity()
    }

    /// Posts `FREE_ALL` to every worker and joins all threads
    /// (spec.md §5's graceful shutdown).
    pub fn shutdown(self) {
        tracing::info!("shutting down engine");
        self.scheduler.shutdown();
    }
}

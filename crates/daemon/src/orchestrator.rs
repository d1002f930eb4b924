//! Daemon orchestrator for wiring together all components.
//!
//! This module provides the `DaemonOrchestrator` that owns the session
//! registry, the transport controller and the HTTP listener, and drives their
//! start-up and shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::server::create_router;
use crate::session::{BackendFactory, PtyFactory, SessionRegistry};
use crate::transport::TransportController;

/// Daemon orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Initial state, not started.
    Stopped,
    /// Starting up, binding the listener.
    Starting,
    /// Running and accepting connections.
    Running,
    /// Shutting down gracefully.
    ShuttingDown,
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Orchestrator state changed.
    StateChanged(OrchestratorState),
    /// The HTTP listener is bound.
    Listening(SocketAddr),
    /// Error occurred.
    Error { message: String },
}

/// Daemon orchestrator that manages all subsystems.
pub struct DaemonOrchestrator {
    /// Configuration.
    config: Config,
    /// Current state.
    state: Arc<RwLock<OrchestratorState>>,
    /// Registry shared with the transport controller.
    registry: Arc<SessionRegistry>,
    /// Connection driver used by the HTTP routes.
    controller: TransportController,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
    /// Bound listener address, once started.
    local_addr: Option<SocketAddr>,
    /// HTTP server task.
    server_task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
    /// Event sender.
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl DaemonOrchestrator {
    /// Creates a new daemon orchestrator spawning the configured command.
    ///
    /// Session processes are killed when the orchestrator stops.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let shutdown_token = CancellationToken::new();
        let factory = PtyFactory::new(
            config.command.command.clone(),
            config
                .command
                .pty_config(Some(shutdown_token.clone())),
        );

        info!(command = %config.command.command, "Session command configured");
        Ok(Self::build(config, Arc::new(factory), shutdown_token))
    }

    /// Creates a new daemon orchestrator with a custom backend factory.
    pub fn with_factory(config: Config, factory: Arc<dyn BackendFactory>) -> Self {
        Self::build(config, factory, CancellationToken::new())
    }

    fn build(
        config: Config,
        factory: Arc<dyn BackendFactory>,
        shutdown_token: CancellationToken,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let controller =
            TransportController::new(Arc::clone(&registry), factory, shutdown_token.clone());
        let (event_tx, _) = broadcast::channel(64);

        Self {
            config,
            state: Arc::new(RwLock::new(OrchestratorState::Stopped)),
            registry,
            controller,
            shutdown_token,
            local_addr: None,
            server_task: Mutex::new(None),
            event_tx,
        }
    }

    /// Returns the current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.read().await
    }

    /// Returns a receiver for orchestrator events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Returns the transport controller.
    pub fn controller(&self) -> &TransportController {
        &self.controller
    }

    /// Returns the bound listener address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Starts the daemon orchestrator.
    pub async fn start(&mut self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != OrchestratorState::Stopped {
                anyhow::bail!("Orchestrator is already running");
            }
            if self.shutdown_token.is_cancelled() {
                anyhow::bail!("Orchestrator cannot be restarted after stop");
            }
            *state = OrchestratorState::Starting;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Starting));

        info!("Starting daemon orchestrator...");

        let server = &self.config.server;
        let listener = match TcpListener::bind((server.host.as_str(), server.port)).await {
            Ok(listener) => listener,
            Err(e) => {
                *self.state.write().await = OrchestratorState::Stopped;
                self.emit_event(OrchestratorEvent::Error {
                    message: e.to_string(),
                });
                return Err(e).with_context(|| {
                    format!("Failed to bind {}:{}", server.host, server.port)
                });
            }
        };
        let local_addr = listener
            .local_addr()
            .context("Failed to read listener address")?;
        self.local_addr = Some(local_addr);

        let router = create_router(
            self.controller.clone(),
            &server.prefix_path,
            server.index_file.clone(),
        );
        let token = self.shutdown_token.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        });
        *self.server_task.lock().await = Some(task);

        info!(
            "Listening on http://{}{}",
            local_addr,
            server.prefix_path.trim_end_matches('/')
        );
        self.emit_event(OrchestratorEvent::Listening(local_addr));

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Running;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Running));

        info!("Daemon orchestrator started successfully");
        Ok(())
    }

    /// Stops the daemon orchestrator.
    ///
    /// Cancels live connections, closes every session and waits for the
    /// HTTP server to finish.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == OrchestratorState::Stopped {
                return Ok(());
            }
            if *state == OrchestratorState::ShuttingDown {
                anyhow::bail!("Orchestrator is already shutting down");
            }
            *state = OrchestratorState::ShuttingDown;
        }
        self.emit_event(OrchestratorEvent::StateChanged(
            OrchestratorState::ShuttingDown,
        ));

        info!("Stopping daemon orchestrator...");

        // Signal shutdown to the server and every connection
        self.shutdown_token.cancel();

        // Close all sessions
        self.registry.shutdown().await;

        // Wait for the server to drain
        if let Some(task) = self.server_task.lock().await.take() {
            match task.await {
                Ok(Ok(())) => debug!("HTTP server stopped"),
                Ok(Err(e)) => warn!("HTTP server error during shutdown: {}", e),
                Err(e) => warn!("HTTP server task failed: {}", e),
            }
        }

        {
            let mut state = self.state.write().await;
            *state = OrchestratorState::Stopped;
        }
        self.emit_event(OrchestratorEvent::StateChanged(OrchestratorState::Stopped));

        info!("Daemon orchestrator stopped");
        Ok(())
    }

    /// Emits an event to all subscribers.
    fn emit_event(&self, event: OrchestratorEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.event_tx.send(event);
    }
}

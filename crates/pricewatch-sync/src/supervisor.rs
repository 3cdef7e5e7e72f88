use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use pricewatch_adapters::adapter_for_source;
use pricewatch_storage::{CatalogStore, HttpFetcher};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::reconcile::Reconciler;
use crate::runner::{TaskRunner, DEFAULT_PAGE_DELAY};
use crate::{SourceConfig, SourceRegistry};

/// Owns the shared HTTP client and catalog store and runs one task per enabled source.
pub struct Supervisor {
    http: Arc<HttpFetcher>,
    store: Arc<dyn CatalogStore>,
    page_delay: Duration,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl Supervisor {
    pub fn new(http: Arc<HttpFetcher>, store: Arc<dyn CatalogStore>) -> Self {
        Self {
            http,
            store,
            page_delay: DEFAULT_PAGE_DELAY,
            cancel: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    pub fn runner_for(&self, source: &SourceConfig) -> TaskRunner {
        let adapter = adapter_for_source(source.kind, &source.name, source.endpoint.as_deref());
        TaskRunner::new(
            source.descriptor(),
            adapter,
            Arc::clone(&self.http),
            Reconciler::new(Arc::clone(&self.store)),
        )
        .with_page_delay(self.page_delay)
    }

    /// One runner per enabled source, in registry order.
    pub fn runners(&self, registry: &SourceRegistry) -> Vec<TaskRunner> {
        registry.enabled().map(|source| self.runner_for(source)).collect()
    }

    pub fn spawn_runner(&mut self, runner: TaskRunner) {
        self.tasks.spawn(runner.run(self.cancel.child_token()));
    }

    /// Spawn a runner for every enabled source. Returns how many were started.
    pub fn spawn(&mut self, registry: &SourceRegistry) -> usize {
        let runners = self.runners(registry);
        let started = runners.len();
        for runner in runners {
            self.spawn_runner(runner);
        }
        info!(started, configured = registry.sources.len(), "task runners spawned");
        started
    }

    /// Cancel every runner and wait for all of them to stop.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "task runner ended abnormally");
            }
        }
        info!("all task runners stopped");
    }

    pub async fn run_until_shutdown(mut self, registry: &SourceRegistry) -> Result<()> {
        if self.spawn(registry) == 0 {
            warn!("no enabled sources; nothing to crawl");
            return Ok(());
        }
        shutdown_signal().await.context("waiting for shutdown signal")?;
        info!("shutdown requested");
        self.shutdown().await;
        Ok(())
    }
}

/// Resolves on SIGINT, or on unix also SIGTERM, SIGHUP or SIGQUIT.
pub async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;
        let mut quit = signal(SignalKind::quit())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = term.recv() => Ok(()),
            _ = hangup.recv() => Ok(()),
            _ = quit.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

//! Broker connection supervisor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use rnode_queue::{BoxedDelivery, Broker, BrokerSession, QueueError};

use crate::backoff::Backoff;
use crate::config::WorkerConfig;
use crate::metrics;

/// Work done for each delivery, inside one pool slot.
#[async_trait]
pub trait AssignmentHandler: Send + Sync + 'static {
    /// Must resolve the delivery before returning.
    async fn handle(&self, delivery: BoxedDelivery);
}

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Worker pool capacity
    pub pool_size: usize,
    /// Grace period when closing the connection
    pub close_grace: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            pool_size: 1,
            close_grace: Duration::from_secs(5),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(900), // 15 minutes
        }
    }
}

impl From<&WorkerConfig> for SupervisorSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            pool_size: config.pool_size,
            close_grace: config.close_grace,
            ..Default::default()
        }
    }
}

/// Why a session stopped consuming.
enum SessionEnd {
    Shutdown,
    Failed(QueueError),
}

/// Keeps one broker subscription alive and feeds deliveries to a bounded pool.
pub struct QueueSupervisor<B, H> {
    broker: B,
    handler: Arc<H>,
    settings: SupervisorSettings,
    pool: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl<B, H> QueueSupervisor<B, H>
where
    B: Broker,
    H: AssignmentHandler,
{
    pub fn new(
        broker: B,
        handler: Arc<H>,
        settings: SupervisorSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let pool_size = settings.pool_size.max(1);
        Self {
            broker,
            handler,
            settings: SupervisorSettings {
                pool_size,
                ..settings
            },
            pool: Arc::new(Semaphore::new(pool_size)),
            shutdown,
        }
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Token that stops [`QueueSupervisor::run`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Connect, consume and reconnect until shut down.
    ///
    /// Returns once shutdown was requested and in-flight assignments finished.
    pub async fn run(&self) {
        info!(pool_size = self.settings.pool_size, "Starting queue supervisor");
        let mut backoff = Backoff::new(self.settings.initial_backoff, self.settings.max_backoff);

        loop {
            let connected = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.broker.connect() => result,
            };
            metrics::record_connect_attempt(connected.is_ok());

            match connected {
                Ok(session) => {
                    backoff.reset();
                    match self.consume(session).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Failed(e) => {
                            error!(error = %e, "Broker session failed");
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to connect to broker");
                }
            }

            let delay = backoff.next_delay();
            metrics::record_backoff(delay.as_secs_f64());
            warn!(
                attempt = backoff.failures(),
                delay_secs = delay.as_secs(),
                "Reconnecting to broker after backoff"
            );

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Shutdown requested, waiting for in-flight assignments");
        self.wait_for_assignments().await;
        info!("Queue supervisor stopped");
    }

    async fn consume(&self, mut session: Box<dyn BrokerSession>) -> SessionEnd {
        loop {
            // A slot must be free before the next delivery is pulled.
            let permit = tokio::select! {
                _ = self.shutdown.cancelled() => None,
                permit = Arc::clone(&self.pool).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                return self.finish(session).await;
            };

            if !session.is_open() {
                drop(permit);
                session.close(self.settings.close_grace).await;
                return SessionEnd::Failed(QueueError::ChannelClosed);
            }

            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => None,
                next = session.next_delivery() => Some(next),
            };
            let Some(next) = next else {
                drop(permit);
                return self.finish(session).await;
            };

            let delivery = match next {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    session.close(self.settings.close_grace).await;
                    return SessionEnd::Failed(QueueError::SubscriptionEnded);
                }
                Err(e) => {
                    session.close(self.settings.close_grace).await;
                    return SessionEnd::Failed(e);
                }
            };

            debug!(delivery_tag = delivery.delivery_tag(), "Dispatching delivery");
            let handler = Arc::clone(&self.handler);
            let pool = Arc::clone(&self.pool);
            let pool_size = self.settings.pool_size;
            tokio::spawn(async move {
                metrics::set_assignments_in_flight(pool_size - pool.available_permits());
                handler.handle(delivery).await;
                drop(permit);
                metrics::set_assignments_in_flight(pool_size - pool.available_permits());
            });
        }
    }

    /// Stop pulling, let in-flight work resolve on the open channel, then close.
    async fn finish(&self, session: Box<dyn BrokerSession>) -> SessionEnd {
        info!("Shutdown requested, draining worker pool before closing connection");
        self.wait_for_assignments().await;
        session.close(self.settings.close_grace).await;
        SessionEnd::Shutdown
    }

    async fn wait_for_assignments(&self) {
        let permits = u32::try_from(self.settings.pool_size).unwrap_or(u32::MAX);
        if let Ok(all) = self.pool.acquire_many(permits).await {
            drop(all);
        }
    }
}

//! Stream supervisor
//!
//! Owns the single background task that receives option quote updates and
//! feeds them to the `StreamReconciler`.
//!
//! Lifecycle:
//! - `start` is idempotent for the same set of contracts, however each key
//!   is spelled; a different set restarts the task with the new subscription
//! - `stop` signals the task, which unsubscribes and logs out, and waits for
//!   it to finish; no update is merged after `stop` returns
//! - transport failures are retried with exponential backoff; once retries
//!   are exhausted the task ends with a `Failed` status instead of an error
//!   surfacing on the consumer side

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use types::errors::StreamError;
use types::ids::ContractKey;

use crate::config::StreamConfig;
use crate::contract_key::normalize;
use crate::events::StreamUpdate;
use crate::reconciler::StreamReconciler;

/// Upstream push transport.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Establish the session (connect and log in).
    async fn connect(&self) -> Result<(), StreamError>;

    /// Subscribe to `keys`; updates arrive on the returned channel until the
    /// transport drops its sender.
    async fn subscribe(
        &self,
        keys: &[String],
        capacity: usize,
    ) -> Result<mpsc::Receiver<StreamUpdate>, StreamError>;

    async fn unsubscribe(&self, keys: &[String]) -> Result<(), StreamError>;

    async fn logout(&self) -> Result<(), StreamError>;
}

/// Supervisor state as seen by consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StreamStatus {
    Idle,
    Connecting,
    Streaming,
    Reconnecting { attempt: u32 },
    Stopped,
    Failed { reason: String },
}

impl StreamStatus {
    /// The task is not running and will not recover on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamStatus::Stopped | StreamStatus::Failed { .. })
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamStatus::Idle => f.write_str("idle"),
            StreamStatus::Connecting => f.write_str("connecting"),
            StreamStatus::Streaming => f.write_str("streaming"),
            StreamStatus::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
            StreamStatus::Stopped => f.write_str("stopped"),
            StreamStatus::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

struct RunningStream {
    /// Normalized contract → the spelling handed to the transport.
    contracts: BTreeMap<ContractKey, String>,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Starts, restarts, and stops the receive task.
pub struct StreamSupervisor {
    transport: Arc<dyn StreamTransport>,
    reconciler: Arc<StreamReconciler>,
    config: StreamConfig,
    status: Arc<watch::Sender<StreamStatus>>,
    running: Mutex<Option<RunningStream>>,
}

impl StreamSupervisor {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        reconciler: Arc<StreamReconciler>,
        config: StreamConfig,
    ) -> Self {
        let (status, _) = watch::channel(StreamStatus::Idle);
        Self {
            transport,
            reconciler,
            config,
            status: Arc::new(status),
            running: Mutex::new(None),
        }
    }

    pub fn status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status transition.
    pub fn watch_status(&self) -> watch::Receiver<StreamStatus> {
        self.status.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    pub async fn subscribed_keys(&self) -> Vec<String> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| r.contracts.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Subscribe to `keys`. Returns `false` if a live task already streams
    /// exactly these contracts.
    ///
    /// Keys are compared after normalization, and the first spelling of each
    /// contract is the one subscribed. An unrecognized key rejects the call.
    pub async fn start<I, S>(&self, keys: I) -> Result<bool, StreamError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut contracts = BTreeMap::new();
        for raw in keys {
            let raw: String = raw.into();
            let key = normalize(&raw)
                .map_err(|e| StreamError::SubscriptionRejected(e.to_string()))?;
            contracts.entry(key).or_insert(raw);
        }
        if contracts.is_empty() {
            return Err(StreamError::SubscriptionRejected(
                "empty contract key list".to_string(),
            ));
        }

        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            if current.contracts.keys().eq(contracts.keys()) && !current.handle.is_finished() {
                debug!(keys = contracts.len(), "Stream already running for key set");
                return Ok(false);
            }
        }
        if let Some(previous) = running.take() {
            info!(
                old_keys = previous.contracts.len(),
                new_keys = contracts.len(),
                "Restarting stream with new key set"
            );
            shutdown(previous).await;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = ReceiveTask {
            transport: Arc::clone(&self.transport),
            reconciler: Arc::clone(&self.reconciler),
            config: self.config.clone(),
            keys: contracts.values().cloned().collect(),
            status: Arc::clone(&self.status),
            shutdown: shutdown_rx,
        };
        let handle = tokio::spawn(task.run());
        info!(keys = contracts.len(), "Stream task started");

        *running = Some(RunningStream {
            contracts,
            shutdown: shutdown_tx,
            handle,
        });
        Ok(true)
    }

    /// Stop the task and wait for it to exit. Returns `false` if nothing was
    /// running.
    pub async fn stop(&self) -> bool {
        let previous = self.running.lock().await.take();
        match previous {
            Some(running) => {
                shutdown(running).await;
                info!(status = %self.status(), "Stream task stopped");
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for StreamSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSupervisor")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}

async fn shutdown(running: RunningStream) {
    let _ = running.shutdown.send(true);
    if let Err(e) = running.handle.await {
        warn!(error = %e, "Stream task ended abnormally");
    }
}

struct ReceiveTask {
    transport: Arc<dyn StreamTransport>,
    reconciler: Arc<StreamReconciler>,
    config: StreamConfig,
    keys: Vec<String>,
    status: Arc<watch::Sender<StreamStatus>>,
    shutdown: watch::Receiver<bool>,
}

impl ReceiveTask {
    async fn run(mut self) {
        let mut attempt: u32 = 0;
        let mut subscribed = false;

        'session: loop {
            if *self.shutdown.borrow() {
                break;
            }
            self.status.send_replace(if attempt == 0 {
                StreamStatus::Connecting
            } else {
                StreamStatus::Reconnecting { attempt }
            });

            let transport = Arc::clone(&self.transport);
            let keys = self.keys.clone();
            let capacity = self.config.channel_capacity;
            let session = async move {
                transport.connect().await?;
                transport.subscribe(&keys, capacity).await
            };
            let connected = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break 'session,
                result = session => result,
            };

            let failure = match connected {
                Ok(mut updates) => {
                    subscribed = true;
                    attempt = 0;
                    self.status.send_replace(StreamStatus::Streaming);
                    info!(keys = self.keys.len(), "Stream subscribed");

                    loop {
                        tokio::select! {
                            biased;
                            _ = self.shutdown.changed() => break 'session,
                            message = updates.recv() => match message {
                                // Rejections are logged and counted by the reconciler.
                                Some(update) => {
                                    let _ = self.reconciler.merge_update(update);
                                }
                                None => break StreamError::ChannelClosed,
                            },
                        }
                    }
                }
                Err(e) => e,
            };

            attempt += 1;
            if attempt > self.config.max_retries {
                let terminal = StreamError::RetriesExhausted {
                    attempts: attempt,
                    last_error: failure.to_string(),
                };
                error!(error = %terminal, "Stream task giving up");
                self.teardown(subscribed).await;
                self.status.send_replace(StreamStatus::Failed {
                    reason: terminal.to_string(),
                });
                return;
            }

            let backoff_ms = self.config.backoff_ms(attempt);
            self.reconciler.metrics().record_reconnect();
            warn!(attempt, backoff_ms, error = %failure, "Stream interrupted, retrying");
            self.status.send_replace(StreamStatus::Reconnecting { attempt });

            tokio::select! {
                biased;
                _ = self.shutdown.changed() => break 'session,
                _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
            }
        }

        self.teardown(subscribed).await;
        self.status.send_replace(StreamStatus::Stopped);
    }

    async fn teardown(&self, subscribed: bool) {
        if subscribed {
            if let Err(e) = self.transport.unsubscribe(&self.keys).await {
                debug!(error = %e, "Unsubscribe failed during teardown");
            }
        }
        if let Err(e) = self.transport.logout().await {
            debug!(error = %e, "Logout failed during teardown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct RefusingTransport {
        connects: AtomicU32,
    }

    #[async_trait]
    impl StreamTransport for RefusingTransport {
        async fn connect(&self) -> Result<(), StreamError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Err(StreamError::Connection("refused".to_string()))
        }

        async fn subscribe(
            &self,
            _keys: &[String],
            _capacity: usize,
        ) -> Result<mpsc::Receiver<StreamUpdate>, StreamError> {
            Err(StreamError::SubscriptionRejected("not connected".to_string()))
        }

        async fn unsubscribe(&self, _keys: &[String]) -> Result<(), StreamError> {
            Ok(())
        }

        async fn logout(&self) -> Result<(), StreamError> {
            Ok(())
        }
    }

    fn fast_config(max_retries: u32) -> StreamConfig {
        StreamConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            channel_capacity: 16,
        }
    }

    #[test]
    fn test_status_display() {
        assert_eq!(StreamStatus::Streaming.to_string(), "streaming");
        assert_eq!(
            StreamStatus::Reconnecting { attempt: 2 }.to_string(),
            "reconnecting (attempt 2)"
        );
        assert!(StreamStatus::Failed { reason: "x".to_string() }.is_terminal());
        assert!(!StreamStatus::Connecting.is_terminal());
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_a_status() {
        let transport = Arc::new(RefusingTransport {
            connects: AtomicU32::new(0),
        });
        let reconciler = Arc::new(StreamReconciler::with_defaults());
        let supervisor = StreamSupervisor::new(transport.clone(), reconciler.clone(), fast_config(3));

        let mut status = supervisor.watch_status();
        assert!(supervisor.start(["AAPL240119C150"]).await.unwrap());
        let failed = tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| matches!(s, StreamStatus::Failed { .. })),
        )
        .await;
        assert!(failed.is_ok());

        assert_eq!(transport.connects.load(Ordering::SeqCst), 4);
        assert_eq!(reconciler.metrics().export()["stream_reconnects"], 3);
        assert!(supervisor.status().to_string().contains("refused"));
        assert!(!supervisor.is_running().await);
    }

    #[tokio::test]
    async fn test_empty_key_set_rejected() {
        let transport = Arc::new(RefusingTransport {
            connects: AtomicU32::new(0),
        });
        let supervisor = StreamSupervisor::new(
            transport.clone(),
            Arc::new(StreamReconciler::with_defaults()),
            fast_config(0),
        );
        let result = supervisor.start(Vec::<String>::new()).await;
        assert!(matches!(result, Err(StreamError::SubscriptionRejected(_))));
        let result = supervisor.start(["AAPL240119C150", "not a contract"]).await;
        assert!(matches!(result, Err(StreamError::SubscriptionRejected(_))));
        assert_eq!(transport.connects.load(Ordering::SeqCst), 0);
        assert!(!supervisor.stop().await);
        assert_eq!(supervisor.status(), StreamStatus::Idle);
    }
}

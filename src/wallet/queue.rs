//! Per-wallet payment serializer
//!
//! Every wallet gets one queue and one consumer task. The consumer executes a
//! single request at a time from sequence read to confirmation, so two
//! transfers never race the same sequence counter. Requests run in submission
//! order.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use super::{ChainClient, ChainError, WalletHandle};
use crate::config::WalletConfig;
use crate::constants::chain::{ACTIVATION_MEMO, ACTIVATION_RESERVE_NANO, ACTIVATION_TRANSFER_NANO};
use crate::models::{PaymentRequest, PaymentResult};
use crate::utils::format_nano;

/// Queue timings
#[derive(Debug, Clone)]
pub struct WalletQueueSettings {
    pub capacity: usize,
    pub submit_timeout: Duration,
    pub broadcast_timeout: Duration,
    pub confirm_interval: Duration,
    pub confirm_max_polls: u32,
    pub activation_broadcast_timeout: Duration,
    pub activation_wait: Duration,
}

impl From<&WalletConfig> for WalletQueueSettings {
    fn from(config: &WalletConfig) -> Self {
        Self {
            capacity: config.queue_capacity.max(1),
            submit_timeout: Duration::from_millis(config.submit_timeout_ms),
            broadcast_timeout: Duration::from_millis(config.broadcast_timeout_ms),
            confirm_interval: Duration::from_millis(config.confirm_poll_interval_ms),
            confirm_max_polls: config.confirm_max_polls,
            activation_broadcast_timeout: Duration::from_millis(config.activation_broadcast_timeout_ms),
            activation_wait: Duration::from_millis(config.activation_wait_ms),
        }
    }
}

impl Default for WalletQueueSettings {
    fn default() -> Self {
        Self::from(&WalletConfig::default())
    }
}

struct Job {
    request: PaymentRequest,
    reply: oneshot::Sender<PaymentResult>,
}

/// Handle to a wallet's payment queue
pub struct WalletQueue {
    wallet: WalletHandle,
    client: Arc<dyn ChainClient>,
    tx: mpsc::Sender<Job>,
    submit_timeout: Duration,
}

impl WalletQueue {
    /// Create the queue and spawn its consumer
    pub fn spawn(
        client: Arc<dyn ChainClient>,
        wallet: WalletHandle,
        settings: WalletQueueSettings,
        cancel_token: CancellationToken,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(settings.capacity);

        let queue = Arc::new(Self {
            wallet: wallet.clone(),
            client: client.clone(),
            tx,
            submit_timeout: settings.submit_timeout,
        });

        let worker = QueueWorker {
            client,
            wallet,
            settings,
            rx,
        };
        tokio::spawn(worker.run(cancel_token));

        queue
    }

    pub fn address(&self) -> &str {
        &self.wallet.address
    }

    /// Balance of this wallet in nano
    pub async fn balance(&self) -> Result<u64, ChainError> {
        self.client.read_balance(&self.wallet.address).await
    }

    /// Enqueue a payment and wait for its result
    ///
    /// Always yields a result: a queue still full after the submission
    /// timeout, or a closed queue, produce a failure result.
    pub async fn submit(&self, request: PaymentRequest) -> PaymentResult {
        let (reply, response) = oneshot::channel();
        let job = Job {
            request: request.clone(),
            reply,
        };

        match self.tx.send_timeout(job, self.submit_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!(
                    wallet = %self.wallet.address,
                    timeout_ms = self.submit_timeout.as_millis() as u64,
                    "Wallet queue saturated, rejecting payment"
                );
                return PaymentResult::failed(
                    &self.wallet.address,
                    &request,
                    format!("wallet queue full after {:?}", self.submit_timeout),
                );
            }
            Err(SendTimeoutError::Closed(_)) => {
                return PaymentResult::failed(&self.wallet.address, &request, "wallet queue closed");
            }
        }

        match response.await {
            Ok(result) => result,
            Err(_) => PaymentResult::failed(
                &self.wallet.address,
                &request,
                "wallet queue dropped the request",
            ),
        }
    }
}

/// Consumer side: owns the receiver and executes jobs one by one
struct QueueWorker {
    client: Arc<dyn ChainClient>,
    wallet: WalletHandle,
    settings: WalletQueueSettings,
    rx: mpsc::Receiver<Job>,
}

impl QueueWorker {
    async fn run(mut self, cancel_token: CancellationToken) {
        tracing::info!(wallet = %self.wallet.address, "Wallet queue started");

        loop {
            // Cancellation is only observed between jobs; a broadcast in
            // flight always runs to its own timeout.
            let job = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                job = self.rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let result = self.execute(&job.request).await;
            if job.reply.send(result).is_err() {
                tracing::debug!(wallet = %self.wallet.address, "Payment submitter went away");
            }
        }

        self.rx.close();
        while let Ok(job) = self.rx.try_recv() {
            let _ = job.reply.send(PaymentResult::failed(
                &self.wallet.address,
                &job.request,
                "wallet queue shut down",
            ));
        }

        tracing::info!(wallet = %self.wallet.address, "Wallet queue stopped");
    }

    async fn execute(&self, request: &PaymentRequest) -> PaymentResult {
        let source = self.wallet.address.as_str();

        if request.is_expired() {
            return PaymentResult::failed(source, request, "request deadline passed before execution");
        }

        let initial = match self.read_sequence_or_activate().await {
            Ok(seqno) => seqno,
            Err(e) => {
                tracing::warn!(wallet = %source, error = %e, "Cannot read wallet sequence");
                return PaymentResult::failed(source, request, e.to_string());
            }
        };

        tracing::info!(
            wallet = %source,
            to = %request.destination,
            amount = %format_nano(request.amount),
            seqno = initial,
            "Broadcasting transfer"
        );

        let sent = timeout(
            self.settings.broadcast_timeout,
            self.client
                .broadcast(&self.wallet, &request.destination, request.amount, &request.memo),
        )
        .await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(wallet = %source, error = %e, "Broadcast failed");
                return PaymentResult::failed(source, request, e.to_string());
            }
            Err(_) => {
                let e = ChainError::BroadcastTimeout(self.settings.broadcast_timeout);
                tracing::warn!(wallet = %source, error = %e, "Broadcast timed out");
                return PaymentResult::failed(source, request, e.to_string());
            }
        }

        match self.wait_for_sequence(initial + 1).await {
            Some(seqno) => {
                tracing::info!(wallet = %source, seqno, "Transfer confirmed");
                PaymentResult::succeeded(source, request, format!("{}:{}", source, initial))
            }
            None => {
                // The transfer may still land later; reported as a failure
                tracing::warn!(
                    wallet = %source,
                    polls = self.settings.confirm_max_polls,
                    "Sequence counter did not advance"
                );
                PaymentResult::failed(
                    source,
                    request,
                    format!(
                        "transfer not confirmed after {} polls",
                        self.settings.confirm_max_polls
                    ),
                )
            }
        }
    }

    /// Poll until the counter reaches `target`
    async fn wait_for_sequence(&self, target: u64) -> Option<u64> {
        for attempt in 1..=self.settings.confirm_max_polls {
            sleep(self.settings.confirm_interval).await;
            match self.client.read_sequence(&self.wallet.address).await {
                Ok(seqno) if seqno >= target => return Some(seqno),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(wallet = %self.wallet.address, attempt, error = %e, "Sequence poll failed");
                }
            }
        }
        None
    }

    async fn read_sequence_or_activate(&self) -> Result<u64, ChainError> {
        match self.client.read_sequence(&self.wallet.address).await {
            Ok(seqno) => Ok(seqno),
            Err(ChainError::NotActive(reason)) => {
                tracing::info!(wallet = %self.wallet.address, reason = %reason, "Wallet not active, activating");
                self.activate().await
            }
            Err(e) => Err(e),
        }
    }

    /// Deploy the wallet with a small self-transfer, then wait until its
    /// counter is readable
    async fn activate(&self) -> Result<u64, ChainError> {
        let address = self.wallet.address.as_str();

        let balance = self.client.read_balance(address).await?;
        if balance < ACTIVATION_RESERVE_NANO {
            return Err(ChainError::InsufficientReserve {
                balance,
                required: ACTIVATION_RESERVE_NANO,
            });
        }

        let sent = timeout(
            self.settings.activation_broadcast_timeout,
            self.client
                .broadcast(&self.wallet, address, ACTIVATION_TRANSFER_NANO, ACTIVATION_MEMO),
        )
        .await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(ChainError::BroadcastTimeout(self.settings.activation_broadcast_timeout)),
        }

        let deadline = Instant::now() + self.settings.activation_wait;
        loop {
            sleep(self.settings.confirm_interval).await;
            match self.client.read_sequence(address).await {
                Ok(seqno) => {
                    tracing::info!(wallet = %address, seqno, "Wallet activated");
                    return Ok(seqno);
                }
                Err(_) if Instant::now() < deadline => continue,
                Err(_) => return Err(ChainError::ActivationTimeout(self.settings.activation_wait)),
            }
        }
    }
}

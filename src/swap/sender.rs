//! Redundant resend of the last outbound protocol message.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::id::SwapId;
use super::messages::MessageType;
use super::services::Messenger;

const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Sends one payload to a peer right away and then on every interval until
/// stopped.
pub struct RedundantSender {
    stop: CancellationToken,
}

impl RedundantSender {
    pub fn start(
        messenger: Arc<dyn Messenger>,
        peer_id: String,
        payload: Vec<u8>,
        msg_type: MessageType,
        interval: Duration,
        stop: CancellationToken,
    ) -> Self {
        let token = stop.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = messenger.send_message(&peer_id, &payload, msg_type).await {
                            tracing::warn!(
                                peer = %peer_id,
                                message = msg_type.name(),
                                error = %err,
                                "redundant send failed"
                            );
                        }
                    }
                }
            }
        });
        Self { stop }
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }
}

/// Owns the running resend loop of every swap.
pub struct SenderManager {
    messenger: Arc<dyn Messenger>,
    interval: Duration,
    senders: Mutex<HashMap<SwapId, RedundantSender>>,
    shutdown: CancellationToken,
}

impl SenderManager {
    pub fn new(messenger: Arc<dyn Messenger>, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            messenger,
            interval,
            senders: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Starts resending `payload`. A sender already running for the swap is
    /// stopped first, so re-running the owning action does not stack loops.
    pub fn add_sender(&self, swap_id: SwapId, peer_id: &str, payload: Vec<u8>, msg_type: MessageType) {
        let sender = RedundantSender::start(
            Arc::clone(&self.messenger),
            peer_id.to_string(),
            payload,
            msg_type,
            self.interval,
            self.shutdown.child_token(),
        );
        if let Some(previous) = self.lock().insert(swap_id, sender) {
            previous.stop();
        }
        tracing::debug!(swap_id = %swap_id, message = msg_type.name(), "redundant sender started");
    }

    pub fn remove_sender(&self, swap_id: &SwapId) {
        if let Some(sender) = self.lock().remove(swap_id) {
            sender.stop();
            tracing::debug!(swap_id = %swap_id, "redundant sender stopped");
        }
    }

    pub fn is_sending(&self, swap_id: &SwapId) -> bool {
        self.lock().contains_key(swap_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SwapId, RedundantSender>> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

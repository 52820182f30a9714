//! The swap orchestrator.
//!
//! Every active swap is an actor: a worker task owns the swap's
//! [`StateMachine`] and drains an inbox of commands, so transitions of one
//! swap never overlap while unrelated swaps run in parallel. The service
//! keeps the inbox handles in its active table, routes peer messages and
//! collaborator callbacks to them, and resumes stored swaps on start.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use anyhow::Context as _;
use tokio::sync::{mpsc, oneshot};

use super::data::{Chain, SwapData, SwapRecord, SwapRole, SwapType};
use super::error::{FsmError, SwapError};
use super::fsm::{EventContext, Progress, StateMachine};
use super::id::SwapId;
use super::messages::{MessageType, PeerMessage, SwapRequest};
use super::requested::{RequestedSwapsSummary, aggregate};
use super::services::SwapServices;
use super::states::EventType;
use super::PROTOCOL_VERSION;
use crate::lightning::{InvoiceLabel, InvoiceType};

const INBOX_CAPACITY: usize = 32;

type Reply = oneshot::Sender<Result<Progress, FsmError>>;

enum Command {
    Event {
        event: EventType,
        context: Option<EventContext>,
        reply: Reply,
    },
    Recover {
        reply: Reply,
    },
}

#[derive(Clone)]
struct SwapHandle {
    inbox: mpsc::Sender<Command>,
    peer_id: String,
    scid: String,
}

struct Inner {
    services: Arc<SwapServices>,
    active: Mutex<HashMap<SwapId, SwapHandle>>,
}

impl Inner {
    fn active(&self) -> MutexGuard<'_, HashMap<SwapId, SwapHandle>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct SwapService {
    inner: Arc<Inner>,
}

impl SwapService {
    pub fn new(services: SwapServices) -> Self {
        Self {
            inner: Arc::new(Inner {
                services: Arc::new(services),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn services(&self) -> &SwapServices {
        &self.inner.services
    }

    /// Hooks the service into its collaborators and resumes every stored
    /// swap that has not finished.
    pub fn start(&self) -> Result<(), SwapError> {
        let services = &self.inner.services;
        let weak = Arc::downgrade(&self.inner);

        services.messenger.add_message_handler(Arc::new({
            let weak = weak.clone();
            move |peer_id, msg_type, payload| {
                let Some(service) = upgrade(&weak) else {
                    return;
                };
                tokio::spawn(async move {
                    if let Err(err) = service.on_message(&peer_id, msg_type, &payload).await {
                        log_dropped(&err, "peer message dropped");
                    }
                });
            }
        }));

        services.lightning.add_payment_notifier(Arc::new({
            let weak = weak.clone();
            move |label| {
                let Some(service) = upgrade(&weak) else {
                    return;
                };
                tokio::spawn(async move {
                    if let Err(err) = service.on_payment(&label).await {
                        log_dropped(&err, "payment notification dropped");
                    }
                });
            }
        }));

        for onchain in [services.bitcoin.as_ref(), services.liquid.as_ref()]
            .into_iter()
            .flatten()
        {
            onchain.tx_watcher.add_confirmation_callback(Arc::new({
                let weak = weak.clone();
                move |swap_id, tx_hex| {
                    let Some(service) = upgrade(&weak) else {
                        return;
                    };
                    tokio::spawn(async move {
                        if let Err(err) = service.on_tx_confirmed(swap_id, tx_hex).await {
                            log_dropped(&err, "confirmation dropped");
                        }
                    });
                }
            }));
            onchain.tx_watcher.add_csv_callback(Arc::new({
                let weak = weak.clone();
                move |swap_id| {
                    let Some(service) = upgrade(&weak) else {
                        return;
                    };
                    tokio::spawn(async move {
                        if let Err(err) = service.on_csv_passed(swap_id).await {
                            log_dropped(&err, "csv notification dropped");
                        }
                    });
                }
            }));
        }

        services.timeouts.set_callback(Arc::new(move |swap_id| {
            let Some(service) = upgrade(&weak) else {
                return;
            };
            tokio::spawn(async move {
                if let Err(err) = service.on_timeout(swap_id).await {
                    log_dropped(&err, "timeout dropped");
                }
            });
        }));

        self.recover_stored()
    }

    /// Cancels timers, resends and running payment retries, and lets the
    /// swap workers exit.
    pub fn stop(&self) {
        self.inner.services.shutdown.cancel();
        self.inner.active().clear();
        tracing::info!("swap service stopped");
    }

    fn recover_stored(&self) -> Result<(), SwapError> {
        let records = self
            .inner
            .services
            .store
            .list_all()
            .context("list stored swaps")?;

        for record in records.into_iter().filter(|r| !r.is_terminal()) {
            let swap_id = record.swap_id;
            let peer_id = record.data.peer_node_id.clone();
            let scid = record.data.scid().to_string();
            let state = record.current;

            let inbox = match self.register(swap_id, &peer_id, &scid) {
                Ok(inbox) => inbox,
                Err(err) => {
                    tracing::warn!(swap_id = %swap_id, error = %err, "not resuming swap");
                    continue;
                }
            };
            let machine = StateMachine::from_record(record, Arc::clone(&self.inner.services));
            self.spawn_worker(machine, inbox);
            tracing::info!(swap_id = %swap_id, state = %state, "resuming swap");

            let service = self.clone();
            tokio::spawn(async move {
                if let Err(err) = service.recover_swap(swap_id).await {
                    tracing::warn!(swap_id = %swap_id, error = %err, "recover swap failed");
                }
            });
        }
        Ok(())
    }

    /// Asks the channel peer for on-chain funds in exchange for outbound
    /// channel balance.
    pub async fn swap_out(
        &self,
        peer_id: &str,
        scid: &str,
        chain: Chain,
        amount_sat: u64,
        premium_limit_sat: Option<u64>,
    ) -> Result<SwapId, SwapError> {
        let services = &self.inner.services;
        services.onchain(chain)?;
        self.ensure_channel_free(scid)?;

        let needed = amount_sat
            .checked_mul(1000)
            .context("swap amount does not fit in msat")?;
        let available = services
            .lightning
            .spendable_msat(scid)
            .await
            .context("query spendable balance")?;
        if available < needed {
            return Err(SwapError::InsufficientBalance { needed, available });
        }

        self.start_swap(
            SwapType::SwapOut,
            peer_id,
            scid,
            chain,
            amount_sat,
            premium_limit_sat,
        )
        .await
    }

    /// Offers on-chain funds to the channel peer in exchange for inbound
    /// channel balance.
    pub async fn swap_in(
        &self,
        peer_id: &str,
        scid: &str,
        chain: Chain,
        amount_sat: u64,
        premium_limit_sat: Option<u64>,
    ) -> Result<SwapId, SwapError> {
        let onchain = self.inner.services.onchain(chain)?;
        self.ensure_channel_free(scid)?;

        let available = onchain
            .wallet
            .get_onchain_balance()
            .await
            .context("query onchain balance")?;
        if available < amount_sat {
            return Err(SwapError::InsufficientBalance {
                needed: amount_sat,
                available,
            });
        }

        self.start_swap(
            SwapType::SwapIn,
            peer_id,
            scid,
            chain,
            amount_sat,
            premium_limit_sat,
        )
        .await
    }

    async fn start_swap(
        &self,
        swap_type: SwapType,
        peer_id: &str,
        scid: &str,
        chain: Chain,
        amount_sat: u64,
        premium_limit_sat: Option<u64>,
    ) -> Result<SwapId, SwapError> {
        let services = &self.inner.services;
        let wallet = &services.onchain(chain)?.wallet;
        let (asset, network) = match chain {
            Chain::Bitcoin => (String::new(), wallet.network()),
            Chain::Liquid => (wallet.asset(), String::new()),
        };

        let swap_id = SwapId::random();
        let mut data = SwapData::new(
            swap_id,
            swap_type,
            SwapRole::Sender,
            services.node_id.clone(),
            peer_id,
        );
        let request = SwapRequest {
            protocol_version: PROTOCOL_VERSION,
            swap_id,
            asset,
            network,
            scid: scid.to_string(),
            amount: amount_sat,
            pubkey: data.pubkey_hex()?,
            premium_limit: premium_limit_sat,
            twohop: None,
        };
        let start = match swap_type {
            SwapType::SwapIn => {
                data.swap_in_request = Some(request);
                EventType::OnSwapInStarted
            }
            SwapType::SwapOut => {
                data.swap_out_request = Some(request);
                EventType::OnSwapOutStarted
            }
        };

        let inbox = self.register(swap_id, peer_id, scid)?;
        self.spawn_worker(StateMachine::new(data, Arc::clone(services)), inbox);
        tracing::info!(
            swap_id = %swap_id,
            swap_type = %swap_type,
            chain = %chain,
            peer = %peer_id,
            amount_sat,
            "swap created"
        );

        self.deliver(swap_id, start, None).await?;
        Ok(swap_id)
    }

    /// Entry point of the messenger: decodes a peer message and hands it to
    /// its swap, creating the swap for a request.
    pub async fn on_message(
        &self,
        peer_id: &str,
        raw_type: u32,
        payload: &[u8],
    ) -> Result<(), SwapError> {
        let msg_type = MessageType::from_code(raw_type)?;
        let message = PeerMessage::decode(msg_type, payload)?;
        let swap_id = message.swap_id();
        tracing::debug!(
            swap_id = %swap_id,
            peer = %peer_id,
            msg_type = msg_type.name(),
            "peer message"
        );

        if let Some(swap_type) = message.opens_swap() {
            return self.on_request(peer_id, swap_type, message).await;
        }

        let handle = self
            .handle(&swap_id)
            .ok_or(SwapError::SwapNotActive(swap_id))?;
        if handle.peer_id != peer_id {
            return Err(SwapError::UnexpectedPeer {
                swap_id,
                expected: handle.peer_id,
                got: peer_id.to_string(),
            });
        }

        let event = message.event();
        self.deliver(swap_id, event, Some(EventContext::Message(message)))
            .await?;
        Ok(())
    }

    async fn on_request(
        &self,
        peer_id: &str,
        swap_type: SwapType,
        message: PeerMessage,
    ) -> Result<(), SwapError> {
        let swap_id = message.swap_id();
        let scid = message
            .request()
            .map(|r| r.scid.clone())
            .context("request message without request body")?;

        if self
            .inner
            .services
            .store
            .get_data(&swap_id)
            .context("look up requested swap")?
            .is_some()
        {
            return Err(SwapError::DuplicateSwap(swap_id));
        }

        let data = SwapData::from_request(swap_id, swap_type, peer_id);
        let mut machine = StateMachine::new(data, Arc::clone(&self.inner.services));
        let event = message.event();
        let context = Some(EventContext::Message(message));

        match self.register(swap_id, peer_id, &scid) {
            Ok(inbox) => {
                self.spawn_worker(machine, inbox);
                tracing::info!(
                    swap_id = %swap_id,
                    swap_type = %swap_type,
                    peer = %peer_id,
                    "swap requested"
                );
                self.deliver(swap_id, event, context).await?;
                Ok(())
            }
            Err(SwapError::ActiveSwapOnChannel(scid)) => {
                tracing::info!(
                    swap_id = %swap_id,
                    peer = %peer_id,
                    scid = %scid,
                    "request on busy channel"
                );
                machine.handle_error(SwapError::ActiveSwapOnChannel(scid));
                machine
                    .send_event(EventType::OnInvalidMessage, context)
                    .await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Entry point of the payment notifier.
    pub async fn on_payment(&self, label: &str) -> Result<Progress, SwapError> {
        let label: InvoiceLabel = label.parse()?;
        let event = match label.invoice_type {
            InvoiceType::Fee => EventType::OnFeeInvoicePaid,
            InvoiceType::Claim => EventType::OnClaimInvoicePaid,
        };
        self.deliver(label.swap_id, event, None).await
    }

    pub async fn on_tx_confirmed(
        &self,
        swap_id: SwapId,
        tx_hex: String,
    ) -> Result<Progress, SwapError> {
        self.deliver(
            swap_id,
            EventType::OnTxConfirmed,
            Some(EventContext::OpeningTxConfirmed { tx_hex }),
        )
        .await
    }

    pub async fn on_csv_passed(&self, swap_id: SwapId) -> Result<Progress, SwapError> {
        self.deliver(swap_id, EventType::OnCsvPassed, None).await
    }

    pub async fn on_timeout(&self, swap_id: SwapId) -> Result<Progress, SwapError> {
        tracing::info!(swap_id = %swap_id, "peer response timed out");
        self.deliver(swap_id, EventType::OnTimeout, None).await
    }

    /// Re-runs the current action of an active swap; the way to move a
    /// parked swap on.
    pub async fn recover_swap(&self, swap_id: SwapId) -> Result<Progress, SwapError> {
        self.dispatch(swap_id, |reply| Command::Recover { reply })
            .await
    }

    pub fn get_swap(&self, swap_id: &SwapId) -> Result<Option<SwapRecord>, SwapError> {
        Ok(self
            .inner
            .services
            .store
            .get_data(swap_id)
            .context("get swap")?)
    }

    pub fn list_swaps(&self) -> Result<Vec<SwapRecord>, SwapError> {
        Ok(self.inner.services.store.list_all().context("list swaps")?)
    }

    pub fn list_swaps_by_peer(&self, peer_id: &str) -> Result<Vec<SwapRecord>, SwapError> {
        Ok(self
            .inner
            .services
            .store
            .list_all_by_peer(peer_id)
            .context("list swaps by peer")?)
    }

    pub fn active_swap_ids(&self) -> Vec<SwapId> {
        let mut ids: Vec<SwapId> = self.inner.active().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Rejected requests per peer, swap type and chain.
    pub fn requested_swaps(&self) -> Result<RequestedSwapsSummary, SwapError> {
        let entries = self
            .inner
            .services
            .requested_swaps
            .get_all()
            .context("read requested swaps")?;
        Ok(aggregate(&entries))
    }

    fn handle(&self, swap_id: &SwapId) -> Option<SwapHandle> {
        self.inner.active().get(swap_id).cloned()
    }

    fn ensure_channel_free(&self, scid: &str) -> Result<(), SwapError> {
        if self.inner.active().values().any(|h| h.scid == scid) {
            return Err(SwapError::ActiveSwapOnChannel(scid.to_string()));
        }
        Ok(())
    }

    /// Claims the swap id and the channel in one step.
    fn register(
        &self,
        swap_id: SwapId,
        peer_id: &str,
        scid: &str,
    ) -> Result<mpsc::Receiver<Command>, SwapError> {
        let mut active = self.inner.active();
        if active.contains_key(&swap_id) {
            return Err(SwapError::DuplicateSwap(swap_id));
        }
        if active.values().any(|h| h.scid == scid) {
            return Err(SwapError::ActiveSwapOnChannel(scid.to_string()));
        }

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        active.insert(
            swap_id,
            SwapHandle {
                inbox: tx,
                peer_id: peer_id.to_string(),
                scid: scid.to_string(),
            },
        );
        Ok(rx)
    }

    fn spawn_worker(&self, mut machine: StateMachine, mut inbox: mpsc::Receiver<Command>) {
        let entry = ActiveEntry {
            inner: Arc::downgrade(&self.inner),
            swap_id: machine.swap_id(),
        };
        tokio::spawn(async move {
            let swap_id = machine.swap_id();
            while let Some(command) = inbox.recv().await {
                let (result, reply) = match command {
                    Command::Event {
                        event,
                        context,
                        reply,
                    } => (machine.send_event(event, context).await, reply),
                    Command::Recover { reply } => (machine.recover().await, reply),
                };

                let finished = matches!(result, Ok(Progress::Finished));
                if finished {
                    entry.release();
                }
                // The caller may have given up waiting.
                let _ = reply.send(result);
                if finished {
                    break;
                }
            }
            tracing::debug!(swap_id = %swap_id, state = %machine.current(), "swap worker stopped");
        });
    }

    async fn deliver(
        &self,
        swap_id: SwapId,
        event: EventType,
        context: Option<EventContext>,
    ) -> Result<Progress, SwapError> {
        let result = self
            .dispatch(swap_id, |reply| Command::Event {
                event,
                context,
                reply,
            })
            .await;
        if let Err(SwapError::Fsm(err @ FsmError::EventRejected { .. })) = &result {
            tracing::debug!(swap_id = %swap_id, error = %err, "event rejected");
        }
        result
    }

    async fn dispatch(
        &self,
        swap_id: SwapId,
        command: impl FnOnce(Reply) -> Command,
    ) -> Result<Progress, SwapError> {
        let handle = self
            .handle(&swap_id)
            .ok_or(SwapError::SwapNotActive(swap_id))?;
        let (reply, response) = oneshot::channel();
        handle
            .inbox
            .send(command(reply))
            .await
            .map_err(|_| SwapError::SwapNotActive(swap_id))?;
        let progress = response
            .await
            .map_err(|_| SwapError::SwapNotActive(swap_id))??;
        Ok(progress)
    }
}

/// A worker's slot in the active table. The slot is freed when the worker
/// goes away, so a worker that dies mid-action does not hold its channel.
struct ActiveEntry {
    inner: Weak<Inner>,
    swap_id: SwapId,
}

impl ActiveEntry {
    fn release(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.active().remove(&self.swap_id).is_some())
    }
}

impl Drop for ActiveEntry {
    fn drop(&mut self) {
        if self.release() {
            tracing::error!(swap_id = %self.swap_id, "swap worker exited before the swap finished");
        }
    }
}

fn upgrade(weak: &Weak<Inner>) -> Option<SwapService> {
    weak.upgrade().map(|inner| SwapService { inner })
}

/// Late or duplicate deliveries (resent messages, callbacks for finished
/// swaps) are expected; anything else is worth a warning.
fn log_dropped(err: &SwapError, msg: &str) {
    match err {
        SwapError::SwapNotActive(_) | SwapError::Fsm(FsmError::EventRejected { .. }) => {
            tracing::debug!(error = %err, "{msg}");
        }
        _ => tracing::warn!(error = %err, "{msg}"),
    }
}

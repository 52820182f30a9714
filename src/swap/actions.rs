//! The action library. Each action is bound to a state in a role table.

use anyhow::Context as _;
use async_trait::async_trait;
use bitcoin::secp256k1::SecretKey;

use super::data::{Chain, SwapData, SwapType, random_secret_key};
use super::error::{RequestRejection, SwapError};
use super::fsm::Action;
use super::messages::{
    Cancel, CoopClose, OpeningTxBroadcasted, PeerMessage, SwapInAgreement, SwapOutAgreement,
};
use super::requested::RequestedSwap;
use super::retry::{Attempt, RetryError, RetryPolicy, retry};
use super::services::{OnchainServices, SwapServices};
use super::states::EventType;
use super::PROTOCOL_VERSION;
use crate::lightning::preimage::Preimage;
use crate::lightning::{InvoiceLabel, InvoiceType};

/// Unwraps a result or records the error on the swap and fails the action.
macro_rules! try_or_fail {
    ($swap:expr, $res:expr) => {
        match $res {
            Ok(value) => value,
            Err(err) => return $swap.handle_error(format!("{err:#}")),
        }
    };
}

fn onchain<'a>(services: &'a SwapServices, swap: &SwapData) -> anyhow::Result<&'a OnchainServices> {
    let chain = swap.chain()?;
    Ok(services.onchain(chain)?)
}

/// Height used as the CSV baseline, recording the current one if none is
/// set yet.
async fn starting_height(onchain: &OnchainServices, swap: &mut SwapData) -> anyhow::Result<u32> {
    if let Some(height) = swap.starting_block_height() {
        return Ok(height);
    }
    let height = onchain.tx_watcher.get_block_height().await?;
    Ok(swap.set_starting_block_height(height))
}

pub struct NoOpAction;

#[async_trait]
impl Action for NoOpAction {
    async fn execute(&self, _services: &SwapServices, _swap: &mut SwapData) -> EventType {
        EventType::NoOp
    }
}

/// Terminal action of the claimed states.
pub struct NoOpDoneAction;

#[async_trait]
impl Action for NoOpDoneAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        services.senders.remove_sender(&swap.id);
        tracing::info!(swap_id = %swap.id, claim_tx_id = ?swap.claim_tx_id, "swap claimed");
        EventType::Done
    }
}

/// Terminal action of the canceled state.
pub struct CancelAction;

#[async_trait]
impl Action for CancelAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        services.senders.remove_sender(&swap.id);
        tracing::info!(swap_id = %swap.id, reason = %swap.cancel_message, "swap canceled");
        EventType::Done
    }
}

/// Runs the request gate before delegating. A rejected request is written
/// to the audit log and fails the action with the rejection as reason.
pub struct CheckRequestWrapperAction {
    pub next: Box<dyn Action>,
}

impl CheckRequestWrapperAction {
    pub fn new(next: impl Action + 'static) -> Self {
        Self {
            next: Box::new(next),
        }
    }
}

fn check_request(services: &SwapServices, swap: &SwapData) -> Result<(), RequestRejection> {
    let policy = &services.policy;
    if !policy.new_swaps_allowed() {
        return Err(RequestRejection::NewSwapsDisabled);
    }

    let request = swap.request().ok_or(RequestRejection::InvalidChain)?;
    let chain = request
        .chain()
        .map_err(|_| RequestRejection::InvalidChain)?;
    let onchain = services
        .onchain(chain)
        .map_err(|_| RequestRejection::ChainDisabled(chain))?;

    if request.protocol_version != PROTOCOL_VERSION {
        return Err(RequestRejection::IncompatibleVersion);
    }

    // Amount and premium must stay representable in msat on every path
    // that prices the swap.
    let premium = policy.premium_sat(swap.swap_type, chain, request.amount);
    if request
        .amount
        .checked_add(premium)
        .and_then(|sat| sat.checked_mul(1000))
        .is_none()
    {
        return Err(RequestRejection::AmountTooLarge(request.amount));
    }
    let amount_msat = request.amount.saturating_mul(1000);
    let min_msat = policy.min_swap_amount_msat();
    if amount_msat < min_msat {
        return Err(RequestRejection::AmountBelowMinimum {
            amount_msat,
            min_msat,
        });
    }

    match chain {
        Chain::Liquid if request.asset != onchain.wallet.asset() => {
            return Err(RequestRejection::InvalidAsset(request.asset.clone()));
        }
        Chain::Bitcoin if request.network != onchain.wallet.network() => {
            return Err(RequestRejection::InvalidNetwork(request.network.clone()));
        }
        _ => {}
    }

    if !policy.is_peer_allowed(&swap.peer_node_id) {
        return Err(RequestRejection::PeerNotAllowed);
    }
    if policy.is_peer_suspicious(&swap.peer_node_id) {
        return Err(RequestRejection::PeerSuspicious);
    }
    Ok(())
}

#[async_trait]
impl Action for CheckRequestWrapperAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        if let Err(rejection) = check_request(services, swap) {
            let asset = match swap.chain() {
                Ok(chain) => chain.as_str().to_string(),
                Err(_) => format!("{}/{}", swap.asset(), swap.network()),
            };
            let entry = RequestedSwap {
                asset,
                amount_msat: swap.amount_sat().saturating_mul(1000),
                swap_type: swap.swap_type,
                rejection_reason: rejection.to_string(),
            };
            if let Err(err) = services.requested_swaps.add(&swap.peer_node_id, entry) {
                tracing::warn!(swap_id = %swap.id, error = %err, "record rejected request failed");
            }
            tracing::info!(
                swap_id = %swap.id,
                peer = %swap.peer_node_id,
                reason = %rejection,
                "swap request rejected"
            );
            return swap.handle_error(rejection);
        }
        self.next.execute(services, swap).await
    }
}

/// Stops the swap's redundant sender before delegating.
pub struct StopResendWrapperAction {
    pub next: Box<dyn Action>,
}

impl StopResendWrapperAction {
    pub fn new(next: impl Action + 'static) -> Self {
        Self {
            next: Box::new(next),
        }
    }
}

#[async_trait]
impl Action for StopResendWrapperAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        services.senders.remove_sender(&swap.id);
        self.next.execute(services, swap).await
    }
}

/// Generates the blinding key of a Liquid opening transaction before
/// delegating. An existing key is kept.
pub struct SetBlindingKeyWrapperAction {
    pub next: Box<dyn Action>,
}

impl SetBlindingKeyWrapperAction {
    pub fn new(next: impl Action + 'static) -> Self {
        Self {
            next: Box::new(next),
        }
    }
}

#[async_trait]
impl Action for SetBlindingKeyWrapperAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        let chain = try_or_fail!(swap, swap.chain());
        if chain == Chain::Liquid && swap.blinding_key_hex.is_none() {
            swap.blinding_key_hex = Some(hex::encode(random_secret_key()));
        }
        self.next.execute(services, swap).await
    }
}

/// Flags the peer as suspicious before delegating. Used when a swap ends
/// in a CSV claim: the peer let the swap run out.
pub struct AddSuspiciousPeerAction {
    pub next: Box<dyn Action>,
}

impl AddSuspiciousPeerAction {
    pub fn new(next: impl Action + 'static) -> Self {
        Self {
            next: Box::new(next),
        }
    }
}

#[async_trait]
impl Action for AddSuspiciousPeerAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        match services.policy.add_to_suspicious_peer_list(&swap.peer_node_id) {
            Ok(()) => tracing::info!(peer = %swap.peer_node_id, "peer added to suspicious list"),
            Err(err) => tracing::warn!(
                peer = %swap.peer_node_id,
                error = %err,
                "add suspicious peer failed"
            ),
        }
        self.next.execute(services, swap).await
    }
}

/// Queues our own request and arms the peer response timer.
pub struct CreateSwapRequestAction;

#[async_trait]
impl Action for CreateSwapRequestAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        let Some(request) = swap.request().cloned() else {
            return swap.handle_error("swap has no request");
        };
        swap.next_message = Some(match swap.swap_type {
            SwapType::SwapIn => PeerMessage::SwapInRequest(request),
            SwapType::SwapOut => PeerMessage::SwapOutRequest(request),
        });
        services
            .timeouts
            .add(swap.id, services.config.peer_response_timeout());
        EventType::ActionSucceeded
    }
}

/// Swap-out receiver: prices the swap, issues the fee invoice and queues
/// the agreement.
pub struct CreateSwapOutFromRequestAction;

#[async_trait]
impl Action for CreateSwapOutFromRequestAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        let chain = try_or_fail!(swap, swap.chain());
        let onchain = try_or_fail!(swap, services.onchain(chain));
        let amount = swap.amount_sat();

        let available = try_or_fail!(swap, onchain.wallet.get_onchain_balance().await);
        if available < amount {
            return swap.handle_error(SwapError::InsufficientBalance {
                needed: amount,
                available,
            });
        }

        let flat_fee = try_or_fail!(swap, onchain.wallet.get_flat_swap_out_fee().await);
        let premium = services
            .policy
            .premium_sat(SwapType::SwapOut, chain, amount);
        let fee_msat = try_or_fail!(
            swap,
            flat_fee
                .checked_add(premium)
                .and_then(|sat| sat.checked_mul(1000))
                .context("swap out fee does not fit in msat")
        );

        let fee_preimage = Preimage::random();
        let label = InvoiceLabel::new(InvoiceType::Fee, swap.id).to_string();
        let payreq = try_or_fail!(
            swap,
            services
                .lightning
                .get_payreq(
                    fee_msat,
                    &fee_preimage,
                    &label,
                    services.config.fee_invoice_expiry_secs,
                )
                .await
        );

        let agreement = SwapOutAgreement {
            protocol_version: PROTOCOL_VERSION,
            swap_id: swap.id,
            pubkey: try_or_fail!(swap, swap.pubkey_hex()),
            payreq,
            premium,
        };
        swap.swap_out_agreement = Some(agreement.clone());
        swap.next_message = Some(PeerMessage::SwapOutAgreement(agreement));

        services
            .timeouts
            .add(swap.id, services.config.peer_response_timeout());
        EventType::ActionSucceeded
    }
}

/// Swap-in receiver: checks that the claim invoice can be paid through the
/// channel and queues the agreement.
pub struct SwapInReceiverInitAction;

#[async_trait]
impl Action for SwapInReceiverInitAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        let chain = try_or_fail!(swap, swap.chain());
        let amount = swap.amount_sat();
        let premium = services.policy.premium_sat(SwapType::SwapIn, chain, amount);
        let needed_msat = try_or_fail!(
            swap,
            amount
                .checked_add(premium)
                .and_then(|sat| sat.checked_mul(1000))
                .context("swap in amount does not fit in msat")
        );
        let scid = swap.scid().to_string();

        let spendable = try_or_fail!(swap, services.lightning.spendable_msat(&scid).await);
        if spendable < needed_msat {
            return swap.handle_error(SwapError::InsufficientBalance {
                needed: needed_msat,
                available: spendable,
            });
        }
        let routable = try_or_fail!(
            swap,
            services.lightning.probe_payment(&scid, needed_msat).await
        );
        if !routable {
            return swap.handle_error(format!(
                "probe payment of {needed_msat} msat through {scid} failed"
            ));
        }

        let agreement = SwapInAgreement {
            protocol_version: PROTOCOL_VERSION,
            swap_id: swap.id,
            pubkey: try_or_fail!(swap, swap.pubkey_hex()),
            premium,
        };
        swap.swap_in_agreement = Some(agreement.clone());
        swap.next_message = Some(PeerMessage::SwapInAgreement(agreement));

        services
            .timeouts
            .add(swap.id, services.config.peer_response_timeout());
        EventType::ActionSucceeded
    }
}

/// Sends the queued message once.
pub struct SendMessageAction;

#[async_trait]
impl Action for SendMessageAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        let Some(message) = &swap.next_message else {
            return swap.handle_error("no message queued for sending");
        };
        let msg_type = message.message_type();
        let payload = try_or_fail!(swap, message.encode());
        try_or_fail!(
            swap,
            services
                .messenger
                .send_message(&swap.peer_node_id, &payload, msg_type)
                .await
        );
        EventType::ActionSucceeded
    }
}

/// Sends the queued message now and keeps resending it until a later state
/// stops the sender.
pub struct SendMessageWithRetryAction;

#[async_trait]
impl Action for SendMessageWithRetryAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        let Some(message) = &swap.next_message else {
            return swap.handle_error("no message queued for sending");
        };
        let msg_type = message.message_type();
        let payload = try_or_fail!(swap, message.encode());
        services
            .senders
            .add_sender(swap.id, &swap.peer_node_id, payload, msg_type);
        EventType::ActionSucceeded
    }
}

pub struct SendCancelAction;

#[async_trait]
impl Action for SendCancelAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        tracing::info!(swap_id = %swap.id, reason = %swap.cancel_message, "canceling swap");
        let message = PeerMessage::Cancel(Cancel {
            swap_id: swap.id,
            message: swap.cancel_message.clone(),
        });
        let payload = try_or_fail!(swap, message.encode());
        try_or_fail!(
            swap,
            services
                .messenger
                .send_message(&swap.peer_node_id, &payload, message.message_type())
                .await
        );
        EventType::ActionSucceeded
    }
}

/// Queues the coop close message that reveals the taker's private key.
pub struct TakerSendPrivkeyAction;

#[async_trait]
impl Action for TakerSendPrivkeyAction {
    async fn execute(&self, _services: &SwapServices, swap: &mut SwapData) -> EventType {
        swap.next_message = Some(PeerMessage::CoopClose(CoopClose {
            swap_id: swap.id,
            message: swap.cancel_message.clone(),
            privkey: swap.privkey_hex(),
        }));
        EventType::ActionSucceeded
    }
}

/// Swap-out sender: pays the maker's fee invoice through the swap channel.
pub struct PayFeeInvoiceAction;

#[async_trait]
impl Action for PayFeeInvoiceAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        if swap.fee_preimage.is_some() {
            return EventType::ActionSucceeded;
        }
        let Some(payreq) = swap.swap_out_agreement.as_ref().map(|a| a.payreq.clone()) else {
            return swap.handle_error("swap has no fee invoice");
        };

        let decoded = try_or_fail!(swap, services.lightning.decode_payreq(&payreq));
        swap.opening_tx_fee_sat = decoded.amount_msat / 1000;

        let scid = swap.scid().to_string();
        let preimage = try_or_fail!(
            swap,
            services
                .lightning
                .pay_invoice_via_channel(&payreq, &scid)
                .await
        );
        tracing::info!(swap_id = %swap.id, fee_sat = swap.opening_tx_fee_sat, "fee invoice paid");
        swap.fee_preimage = Some(preimage);
        EventType::ActionSucceeded
    }
}

/// Maker: creates the claim invoice, funds and broadcasts the opening
/// transaction and queues the broadcast message. A swap that already
/// broadcast skips straight to success.
pub struct CreateAndBroadcastOpeningTransaction;

#[async_trait]
impl Action for CreateAndBroadcastOpeningTransaction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        if swap.opening_tx_broadcasted.is_some() {
            return EventType::ActionSucceeded;
        }
        let chain = try_or_fail!(swap, swap.chain());
        let onchain = try_or_fail!(swap, services.onchain(chain));

        let claim_amount_msat = try_or_fail!(swap, swap.claim_amount_msat());
        let preimage = Preimage::random();
        let label = InvoiceLabel::new(InvoiceType::Claim, swap.id).to_string();
        let payreq = try_or_fail!(
            swap,
            services
                .lightning
                .get_payreq(
                    claim_amount_msat,
                    &preimage,
                    &label,
                    chain.invoice_expiry_secs(),
                )
                .await
        );
        swap.claim_payment_hash = Some(preimage.payment_hash());

        let params = try_or_fail!(swap, swap.opening_params());
        let opening = try_or_fail!(swap, onchain.wallet.create_opening_transaction(&params).await);
        let broadcast = try_or_fail!(swap, onchain.wallet.broadcast_opening_tx(&opening.tx_hex).await);
        tracing::info!(swap_id = %swap.id, tx_id = %broadcast.tx_id, "opening tx broadcast");

        let height = try_or_fail!(swap, onchain.tx_watcher.get_block_height().await);
        swap.set_starting_block_height(height);
        swap.opening_tx_hex = Some(broadcast.tx_hex);
        swap.opening_tx_fee_sat = opening.fee_sat;

        let message = OpeningTxBroadcasted {
            swap_id: swap.id,
            payreq,
            tx_id: broadcast.tx_id,
            script_out: opening.vout,
            blinding_key: swap.blinding_key_hex.clone().unwrap_or_default(),
        };
        swap.opening_tx_broadcasted = Some(message.clone());
        swap.next_message = Some(PeerMessage::OpeningTxBroadcasted(message));
        EventType::ActionSucceeded
    }
}

pub struct SetStartingBlockHeightAction;

#[async_trait]
impl Action for SetStartingBlockHeightAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        let onchain = try_or_fail!(swap, onchain(services, swap));
        let height = try_or_fail!(swap, onchain.tx_watcher.get_block_height().await);
        swap.set_starting_block_height(height);
        EventType::NoOp
    }
}

/// Taker: checks the claim invoice against the swap and registers the
/// opening transaction with the confirmation watcher.
pub struct AwaitTxConfirmationAction;

#[async_trait]
impl Action for AwaitTxConfirmationAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        let onchain = try_or_fail!(swap, onchain(services, swap));
        let Some(opening) = swap.opening_tx_broadcasted.clone() else {
            return swap.handle_error("swap has no opening tx message");
        };

        let decoded = try_or_fail!(swap, services.lightning.decode_payreq(&opening.payreq));
        let expected = try_or_fail!(swap, swap.claim_amount_msat());
        if decoded.amount_msat != expected {
            return swap.handle_error(format!(
                "claim invoice amount {} msat does not equal swap amount {expected} msat",
                decoded.amount_msat
            ));
        }
        swap.claim_payment_hash = Some(decoded.payment_hash);

        let params = try_or_fail!(swap, swap.opening_params());
        let script = try_or_fail!(swap, onchain.wallet.get_output_script(&params));
        let height = try_or_fail!(swap, starting_height(onchain, swap).await);
        try_or_fail!(
            swap,
            onchain
                .tx_watcher
                .add_wait_for_confirmation_tx(swap.id, &opening.tx_id, opening.script_out, height, &script)
                .await
        );
        EventType::NoOp
    }
}

/// Maker: registers the opening output with the CSV watcher and waits for
/// a payment, a coop close or CSV maturity.
pub struct AwaitCsvAction;

#[async_trait]
impl Action for AwaitCsvAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        let onchain = try_or_fail!(swap, onchain(services, swap));
        let Some(opening) = swap.opening_tx_broadcasted.clone() else {
            return swap.handle_error("swap has no opening tx");
        };
        let params = try_or_fail!(swap, swap.opening_params());
        let script = try_or_fail!(swap, onchain.wallet.get_output_script(&params));
        let height = try_or_fail!(swap, starting_height(onchain, swap).await);
        try_or_fail!(
            swap,
            onchain
                .tx_watcher
                .add_wait_for_csv_tx(swap.id, &opening.tx_id, opening.script_out, height, &script)
                .await
        );
        EventType::NoOp
    }
}

/// Taker: validates the confirmed opening transaction and pays the claim
/// invoice, retrying on a fixed interval. Retrying stops for good once half
/// the CSV window has passed since the starting height, since from then on
/// the maker could race us with a CSV claim. A shutdown leaves the swap in
/// this state for recovery.
pub struct ValidateTxAndPayClaimInvoiceAction;

#[async_trait]
impl Action for ValidateTxAndPayClaimInvoiceAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        if swap.claim_preimage.is_some() {
            return EventType::ActionSucceeded;
        }
        let onchain = try_or_fail!(swap, onchain(services, swap));
        let Some(payreq) = swap.opening_tx_broadcasted.as_ref().map(|m| m.payreq.clone()) else {
            return swap.handle_error("swap has no claim invoice");
        };

        let params = try_or_fail!(swap, swap.opening_params());
        let tx_hex = swap.opening_tx_hex.clone().unwrap_or_default();
        if !try_or_fail!(swap, onchain.validator.validate_tx(&params, &tx_hex).await) {
            return swap.handle_error("opening tx is not valid");
        }

        let csv_height = onchain.validator.csv_height();
        let safety_margin = csv_height / 2;
        let decoded = try_or_fail!(swap, services.lightning.decode_payreq(&payreq));
        if decoded.min_final_cltv_expiry_delta >= u64::from(safety_margin) {
            return swap.handle_error(format!(
                "claim invoice min final cltv expiry delta {} is not below {safety_margin}",
                decoded.min_final_cltv_expiry_delta
            ));
        }
        let expected = try_or_fail!(swap, swap.claim_amount_msat());
        if decoded.amount_msat != expected {
            return swap.handle_error(format!(
                "claim invoice amount {} msat does not equal swap amount {expected} msat",
                decoded.amount_msat
            ));
        }

        let start = try_or_fail!(swap, starting_height(onchain, swap).await);
        let scid = swap.scid().to_string();
        let swap_id = swap.id;
        let lightning = services.lightning.as_ref();
        let watcher = onchain.tx_watcher.as_ref();
        let policy = RetryPolicy::new(
            services.config.payment_retry_interval(),
            services.config.payment_retry_time(),
        );

        let paid = retry(policy, &services.shutdown, |attempt| {
            let payreq = payreq.as_str();
            let scid = scid.as_str();
            async move {
                let height = match watcher.get_block_height().await {
                    Ok(height) => height,
                    Err(err) => return Attempt::Retry(format!("get block height: {err:#}")),
                };
                if height.saturating_sub(start) > safety_margin {
                    return Attempt::Abort(format!(
                        "csv safety margin exceeded: {} blocks since {start}",
                        height - start
                    ));
                }
                match lightning.rebalance_payment(payreq, scid).await {
                    Ok(preimage) => Attempt::Done(preimage),
                    Err(err) => {
                        tracing::warn!(swap_id = %swap_id, attempt, error = %err, "claim payment failed");
                        Attempt::Retry(format!("{err:#}"))
                    }
                }
            }
        })
        .await;

        match paid {
            Ok(preimage) => {
                tracing::info!(swap_id = %swap.id, "claim invoice paid");
                swap.claim_preimage = Some(preimage);
                EventType::ActionSucceeded
            }
            Err(RetryError::Aborted(reason)) => swap.handle_error(reason),
            Err(RetryError::Cancelled) => {
                // Recovery pays again while the CSV window allows it.
                tracing::info!(swap_id = %swap.id, "claim payment interrupted by shutdown");
                swap.last_err = Some("claim payment interrupted by shutdown".to_string());
                EventType::NoOp
            }
            Err(err) => swap.handle_error(format!("could not pay invoice: {err}")),
        }
    }
}

/// Spends the opening output with the payment preimage.
pub struct ClaimSwapTransactionWithPreimageAction;

#[async_trait]
impl Action for ClaimSwapTransactionWithPreimageAction {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        if swap.claim_tx_id.is_some() {
            return EventType::ActionSucceeded;
        }
        let onchain = try_or_fail!(swap, onchain(services, swap));
        let params = try_or_fail!(swap, swap.opening_params());
        match onchain
            .wallet
            .create_preimage_spending_transaction(&params, &swap.claim_params())
            .await
        {
            Ok(tx) => {
                tracing::info!(swap_id = %swap.id, tx_id = %tx.tx_id, "claimed with preimage");
                swap.claim_tx_id = Some(tx.tx_id);
                EventType::ActionSucceeded
            }
            Err(err) => {
                tracing::warn!(swap_id = %swap.id, error = %err, "preimage claim failed");
                swap.last_err = Some(format!("{err:#}"));
                EventType::OnRetry
            }
        }
    }
}

/// Spends the matured opening output with the maker's key alone.
pub struct ClaimSwapTransactionWithCsv;

#[async_trait]
impl Action for ClaimSwapTransactionWithCsv {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        if swap.claim_tx_id.is_some() {
            return EventType::ActionSucceeded;
        }
        let onchain = try_or_fail!(swap, onchain(services, swap));
        let params = try_or_fail!(swap, swap.opening_params());
        match onchain
            .wallet
            .create_csv_spending_transaction(&params, &swap.claim_params())
            .await
        {
            Ok(tx) => {
                tracing::info!(swap_id = %swap.id, tx_id = %tx.tx_id, "claimed after csv");
                swap.claim_tx_id = Some(tx.tx_id);
                EventType::ActionSucceeded
            }
            Err(err) => {
                tracing::warn!(swap_id = %swap.id, error = %err, "csv claim failed");
                swap.last_err = Some(format!("{err:#}"));
                EventType::OnRetry
            }
        }
    }
}

/// Spends the opening output with both keys after the taker revealed its
/// private key.
pub struct ClaimSwapTransactionCoop;

#[async_trait]
impl Action for ClaimSwapTransactionCoop {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType {
        if swap.claim_tx_id.is_some() {
            return EventType::ActionSucceeded;
        }
        let onchain = try_or_fail!(swap, onchain(services, swap));
        let Some(privkey) = swap.coop_close.as_ref().map(|c| c.privkey.clone()) else {
            return swap.handle_error("swap has no coop close message");
        };
        let key_bytes = try_or_fail!(swap, hex::decode(&privkey));
        let taker_key = try_or_fail!(swap, SecretKey::from_slice(&key_bytes));

        let params = try_or_fail!(swap, swap.opening_params());
        let tx = try_or_fail!(
            swap,
            onchain
                .wallet
                .create_coop_spending_transaction(&params, &swap.claim_params(), &taker_key)
                .await
        );
        tracing::info!(swap_id = %swap.id, tx_id = %tx.tx_id, "claimed cooperatively");
        swap.claim_tx_id = Some(tx.tx_id);
        EventType::ActionSucceeded
    }
}

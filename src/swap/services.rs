//! Collaborators the swap engine drives, and the registry that hands them to
//! actions.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bitcoin::secp256k1::SecretKey;
use tokio_util::sync::CancellationToken;

use super::data::{Chain, ClaimParams, OpeningParams, SwapRecord, SwapType};
use super::error::SwapError;
use super::id::SwapId;
use super::messages::MessageType;
use super::requested::RequestedSwap;
use super::sender::SenderManager;
use super::timeout::TimeoutService;
use crate::config::SwapConfig;
use crate::lightning::invoice::{DecodedPayreq, decode_bolt11};
use crate::lightning::preimage::Preimage;

/// `(peer id, raw message type, payload)`.
pub type MessageHandler = Arc<dyn Fn(String, u32, Vec<u8>) + Send + Sync>;
/// Invoice label of a settled incoming payment.
pub type PaymentNotifier = Arc<dyn Fn(String) + Send + Sync>;
/// `(swap id, confirmed opening tx hex)`.
pub type ConfirmationCallback = Arc<dyn Fn(SwapId, String) + Send + Sync>;
pub type CsvCallback = Arc<dyn Fn(SwapId) + Send + Sync>;

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, peer_id: &str, payload: &[u8], msg_type: MessageType)
    -> Result<()>;
    fn add_message_handler(&self, handler: MessageHandler);
}

#[async_trait]
pub trait LightningClient: Send + Sync {
    async fn get_payreq(
        &self,
        amount_msat: u64,
        preimage: &Preimage,
        label: &str,
        expiry_secs: u64,
    ) -> Result<String>;

    fn decode_payreq(&self, payreq: &str) -> Result<DecodedPayreq> {
        decode_bolt11(payreq)
    }

    /// Pays through the swap's channel and returns the preimage hex.
    async fn pay_invoice_via_channel(&self, payreq: &str, scid: &str) -> Result<String>;

    /// Pays while shifting balance into the swap's channel. Returns the
    /// preimage hex.
    async fn rebalance_payment(&self, payreq: &str, scid: &str) -> Result<String>;

    /// Whether a payment of `amount_msat` could route through `scid`.
    async fn probe_payment(&self, scid: &str, amount_msat: u64) -> Result<bool>;

    async fn spendable_msat(&self, scid: &str) -> Result<u64>;

    fn add_payment_notifier(&self, notifier: PaymentNotifier);
}

#[async_trait]
pub trait TxWatcher: Send + Sync {
    async fn get_block_height(&self) -> Result<u32>;

    async fn add_wait_for_confirmation_tx(
        &self,
        swap_id: SwapId,
        tx_id: &str,
        vout: u32,
        starting_height: u32,
        script: &[u8],
    ) -> Result<()>;

    async fn add_wait_for_csv_tx(
        &self,
        swap_id: SwapId,
        tx_id: &str,
        vout: u32,
        starting_height: u32,
        script: &[u8],
    ) -> Result<()>;

    fn add_confirmation_callback(&self, callback: ConfirmationCallback);
    fn add_csv_callback(&self, callback: CsvCallback);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpeningTx {
    pub tx_hex: String,
    pub fee_sat: u64,
    pub vout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastTx {
    pub tx_id: String,
    pub tx_hex: String,
}

#[async_trait]
pub trait Wallet: Send + Sync {
    async fn create_opening_transaction(&self, params: &OpeningParams) -> Result<OpeningTx>;
    async fn broadcast_opening_tx(&self, tx_hex: &str) -> Result<BroadcastTx>;

    async fn create_preimage_spending_transaction(
        &self,
        opening: &OpeningParams,
        claim: &ClaimParams,
    ) -> Result<BroadcastTx>;

    async fn create_csv_spending_transaction(
        &self,
        opening: &OpeningParams,
        claim: &ClaimParams,
    ) -> Result<BroadcastTx>;

    async fn create_coop_spending_transaction(
        &self,
        opening: &OpeningParams,
        claim: &ClaimParams,
        taker_key: &SecretKey,
    ) -> Result<BroadcastTx>;

    fn get_output_script(&self, params: &OpeningParams) -> Result<Vec<u8>>;
    async fn get_flat_swap_out_fee(&self) -> Result<u64>;
    async fn get_onchain_balance(&self) -> Result<u64>;

    /// Asset tag this wallet settles in; empty for Bitcoin.
    fn asset(&self) -> String;
    /// Network tag this wallet settles on; empty for Liquid.
    fn network(&self) -> String;
}

#[async_trait]
pub trait Validator: Send + Sync {
    /// Whether `tx_hex` pays the expected opening output.
    async fn validate_tx(&self, params: &OpeningParams, tx_hex: &str) -> Result<bool>;
    fn csv_height(&self) -> u32;
}

pub trait Policy: Send + Sync {
    fn new_swaps_allowed(&self) -> bool;
    fn is_peer_allowed(&self, peer_id: &str) -> bool;
    fn is_peer_suspicious(&self, peer_id: &str) -> bool;
    fn add_to_suspicious_peer_list(&self, peer_id: &str) -> Result<()>;
    fn min_swap_amount_msat(&self) -> u64;

    /// Premium the receiver asks for a swap of `amount_sat`.
    fn premium_sat(&self, _swap_type: SwapType, _chain: Chain, _amount_sat: u64) -> u64 {
        0
    }
}

pub trait SwapStore: Send + Sync {
    fn update_data(&self, record: &SwapRecord) -> Result<()>;
    fn get_data(&self, swap_id: &SwapId) -> Result<Option<SwapRecord>>;
    fn list_all(&self) -> Result<Vec<SwapRecord>>;
    fn list_all_by_peer(&self, peer_id: &str) -> Result<Vec<SwapRecord>>;
}

pub trait RequestedSwapsStore: Send + Sync {
    fn add(&self, peer_id: &str, request: RequestedSwap) -> Result<()>;
    fn get_all(&self) -> Result<BTreeMap<String, Vec<RequestedSwap>>>;
}

/// The watcher, wallet and validator of one chain.
#[derive(Clone)]
pub struct OnchainServices {
    pub tx_watcher: Arc<dyn TxWatcher>,
    pub wallet: Arc<dyn Wallet>,
    pub validator: Arc<dyn Validator>,
}

/// Everything an action may touch besides its own swap data. Built once and
/// shared by every state machine.
pub struct SwapServices {
    pub store: Arc<dyn SwapStore>,
    pub requested_swaps: Arc<dyn RequestedSwapsStore>,
    pub lightning: Arc<dyn LightningClient>,
    pub messenger: Arc<dyn Messenger>,
    pub policy: Arc<dyn Policy>,
    pub bitcoin: Option<OnchainServices>,
    pub liquid: Option<OnchainServices>,
    pub timeouts: Arc<TimeoutService>,
    pub senders: SenderManager,
    pub config: SwapConfig,
    /// Our own node id, recorded as the initiator of swaps we start.
    pub node_id: String,
    pub shutdown: CancellationToken,
}

pub struct SwapServicesBuilder {
    store: Arc<dyn SwapStore>,
    requested_swaps: Arc<dyn RequestedSwapsStore>,
    lightning: Arc<dyn LightningClient>,
    messenger: Arc<dyn Messenger>,
    policy: Arc<dyn Policy>,
    bitcoin: Option<OnchainServices>,
    liquid: Option<OnchainServices>,
    config: SwapConfig,
    node_id: String,
}

impl SwapServicesBuilder {
    pub fn bitcoin(mut self, services: OnchainServices) -> Self {
        self.bitcoin = Some(services);
        self
    }

    pub fn liquid(mut self, services: OnchainServices) -> Self {
        self.liquid = Some(services);
        self
    }

    pub fn config(mut self, config: SwapConfig) -> Self {
        self.config = config;
        self
    }

    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn build(self) -> SwapServices {
        let shutdown = CancellationToken::new();
        SwapServices {
            timeouts: Arc::new(TimeoutService::new(shutdown.clone())),
            senders: SenderManager::new(
                Arc::clone(&self.messenger),
                self.config.resend_interval(),
                shutdown.clone(),
            ),
            store: self.store,
            requested_swaps: self.requested_swaps,
            lightning: self.lightning,
            messenger: self.messenger,
            policy: self.policy,
            bitcoin: self.bitcoin,
            liquid: self.liquid,
            config: self.config,
            node_id: self.node_id,
            shutdown,
        }
    }
}

impl SwapServices {
    pub fn builder(
        store: Arc<dyn SwapStore>,
        requested_swaps: Arc<dyn RequestedSwapsStore>,
        lightning: Arc<dyn LightningClient>,
        messenger: Arc<dyn Messenger>,
        policy: Arc<dyn Policy>,
    ) -> SwapServicesBuilder {
        SwapServicesBuilder {
            store,
            requested_swaps,
            lightning,
            messenger,
            policy,
            bitcoin: None,
            liquid: None,
            config: SwapConfig::default(),
            node_id: String::new(),
        }
    }

    pub fn chain_enabled(&self, chain: Chain) -> bool {
        self.onchain_opt(chain).is_some()
    }

    pub fn onchain(&self, chain: Chain) -> Result<&OnchainServices, SwapError> {
        self.onchain_opt(chain)
            .ok_or(SwapError::ChainNotSupported(chain))
    }

    fn onchain_opt(&self, chain: Chain) -> Option<&OnchainServices> {
        match chain {
            Chain::Bitcoin => self.bitcoin.as_ref(),
            Chain::Liquid => self.liquid.as_ref(),
        }
    }
}

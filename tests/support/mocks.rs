//! In-process stand-ins for the collaborators of a swap node: a messenger
//! network, a Lightning network issuing real BOLT11 invoices, and a chain
//! whose confirmations and CSV maturity the test triggers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context as _, Result, anyhow};
use async_trait::async_trait;
use bitcoin::hashes::{Hash as _, sha256};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use lightning_invoice::{Currency, InvoiceBuilder, PaymentSecret};

use peer_swap::config::SwapConfig;
use peer_swap::lightning::invoice::decode_bolt11;
use peer_swap::lightning::preimage::Preimage;
use peer_swap::lightning::{InvoiceLabel, InvoiceType};
use peer_swap::policy::{BasicPolicy, PolicyConfig};
use peer_swap::swap::data::{ClaimParams, OpeningParams};
use peer_swap::swap::service::SwapService;
use peer_swap::swap::services::{
    BroadcastTx, ConfirmationCallback, CsvCallback, LightningClient, MessageHandler, Messenger,
    OnchainServices, OpeningTx, PaymentNotifier, SwapServices, TxWatcher, Validator, Wallet,
};
use peer_swap::swap::store::SqliteSwapStore;
use peer_swap::swap::{MessageType, PeerMessage, StateType, SwapId, SwapRecord};

use super::wait::wait_for;

pub const NETWORK: &str = "regtest";
pub const CSV_HEIGHT: u32 = 1008;
pub const MIN_FINAL_CLTV_EXPIRY_DELTA: u64 = 18;
pub const WAIT: Duration = Duration::from_secs(20);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct MessengerNetwork {
    handlers: Mutex<HashMap<String, Vec<MessageHandler>>>,
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub peer_id: String,
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
}

pub struct MockMessenger {
    node_id: String,
    network: Arc<MessengerNetwork>,
    sent: Mutex<Vec<SentMessage>>,
}

impl MessengerNetwork {
    pub fn messenger(self: &Arc<Self>, node_id: &str) -> Arc<MockMessenger> {
        Arc::new(MockMessenger {
            node_id: node_id.to_string(),
            network: Arc::clone(self),
            sent: Mutex::new(Vec::new()),
        })
    }
}

impl MockMessenger {
    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    /// Decoded messages of one type, in send order.
    pub fn sent_of(&self, msg_type: MessageType) -> Result<Vec<PeerMessage>> {
        self.sent()
            .into_iter()
            .filter(|m| m.msg_type == msg_type)
            .map(|m| PeerMessage::decode(m.msg_type, &m.payload).context("decode sent message"))
            .collect()
    }
}

#[async_trait]
impl Messenger for MockMessenger {
    async fn send_message(
        &self,
        peer_id: &str,
        payload: &[u8],
        msg_type: MessageType,
    ) -> Result<()> {
        lock(&self.sent).push(SentMessage {
            peer_id: peer_id.to_string(),
            msg_type,
            payload: payload.to_vec(),
        });
        let handlers = lock(&self.network.handlers)
            .get(peer_id)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(self.node_id.clone(), msg_type.code(), payload.to_vec());
        }
        Ok(())
    }

    fn add_message_handler(&self, handler: MessageHandler) {
        lock(&self.network.handlers)
            .entry(self.node_id.clone())
            .or_default()
            .push(handler);
    }
}

struct InvoiceEntry {
    payee: String,
    label: String,
    preimage: String,
    paid: bool,
}

#[derive(Default)]
pub struct LightningNetwork {
    invoices: Mutex<HashMap<String, InvoiceEntry>>,
    notifiers: Mutex<HashMap<String, Vec<PaymentNotifier>>>,
}

pub struct MockLightning {
    pub node_id: String,
    key: SecretKey,
    network: Arc<LightningNetwork>,
    failing: Mutex<HashSet<InvoiceType>>,
    spendable_msat: AtomicU64,
    min_final_cltv_expiry_delta: AtomicU64,
    crash_on_route_check: AtomicBool,
    paid_labels: Mutex<Vec<String>>,
}

impl LightningNetwork {
    pub fn node(self: &Arc<Self>) -> Arc<MockLightning> {
        let key = SecretKey::from_slice(&rand_bytes()).expect("random bytes form a valid key");
        let node_id = PublicKey::from_secret_key(&Secp256k1::new(), &key).to_string();
        Arc::new(MockLightning {
            node_id,
            key,
            network: Arc::clone(self),
            failing: Mutex::new(HashSet::new()),
            spendable_msat: AtomicU64::new(10_000_000_000),
            min_final_cltv_expiry_delta: AtomicU64::new(MIN_FINAL_CLTV_EXPIRY_DELTA),
            crash_on_route_check: AtomicBool::new(false),
            paid_labels: Mutex::new(Vec::new()),
        })
    }
}

fn rand_bytes() -> [u8; 32] {
    *SwapId::random().as_bytes()
}

impl MockLightning {
    /// Every later payment of this invoice kind fails.
    pub fn fail_payments(&self, kind: InvoiceType) {
        lock(&self.failing).insert(kind);
    }

    pub fn allow_payments(&self, kind: InvoiceType) {
        lock(&self.failing).remove(&kind);
    }

    /// Min final CLTV delta of invoices issued from now on.
    pub fn set_min_final_cltv_expiry_delta(&self, delta: u64) {
        self.min_final_cltv_expiry_delta.store(delta, Ordering::Relaxed);
    }

    /// Probes panic, as a broken node client would.
    pub fn set_crash_on_route_check(&self, on: bool) {
        self.crash_on_route_check.store(on, Ordering::Relaxed);
    }

    pub fn set_spendable_msat(&self, msat: u64) {
        self.spendable_msat.store(msat, Ordering::Relaxed);
    }

    /// Labels of the invoices this node paid.
    pub fn paid_labels(&self) -> Vec<String> {
        lock(&self.paid_labels).clone()
    }

    fn pay(&self, payreq: &str) -> Result<String> {
        let decoded = decode_bolt11(payreq)?;
        let (label, preimage, notifiers) = {
            let mut invoices = lock(&self.network.invoices);
            let entry = invoices
                .get_mut(&decoded.payment_hash)
                .context("unknown invoice")?;
            let kind = entry.label.parse::<InvoiceLabel>()?.invoice_type;
            if lock(&self.failing).contains(&kind) {
                anyhow::bail!("{kind} payment failed: no route");
            }
            if entry.paid {
                return Ok(entry.preimage.clone());
            }
            entry.paid = true;
            let notifiers = lock(&self.network.notifiers)
                .get(&entry.payee)
                .cloned()
                .unwrap_or_default();
            (entry.label.clone(), entry.preimage.clone(), notifiers)
        };

        lock(&self.paid_labels).push(label.clone());
        for notify in notifiers {
            notify(label.clone());
        }
        Ok(preimage)
    }
}

#[async_trait]
impl LightningClient for MockLightning {
    async fn get_payreq(
        &self,
        amount_msat: u64,
        preimage: &Preimage,
        label: &str,
        expiry_secs: u64,
    ) -> Result<String> {
        let secp = Secp256k1::new();
        let invoice = InvoiceBuilder::new(Currency::Regtest)
            .description(label.to_string())
            .payment_hash(preimage.hash())
            .payment_secret(PaymentSecret([7u8; 32]))
            .current_timestamp()
            .min_final_cltv_expiry_delta(self.min_final_cltv_expiry_delta.load(Ordering::Relaxed))
            .amount_milli_satoshis(amount_msat)
            .expiry_time(Duration::from_secs(expiry_secs))
            .build_signed(|hash| secp.sign_ecdsa_recoverable(hash, &self.key))
            .map_err(|e| anyhow!("build invoice: {e:?}"))?;

        lock(&self.network.invoices).insert(
            preimage.payment_hash(),
            InvoiceEntry {
                payee: self.node_id.clone(),
                label: label.to_string(),
                preimage: preimage.to_string(),
                paid: false,
            },
        );
        Ok(invoice.to_string())
    }

    async fn pay_invoice_via_channel(&self, payreq: &str, _scid: &str) -> Result<String> {
        self.pay(payreq)
    }

    async fn rebalance_payment(&self, payreq: &str, _scid: &str) -> Result<String> {
        self.pay(payreq)
    }

    async fn probe_payment(&self, scid: &str, amount_msat: u64) -> Result<bool> {
        if self.crash_on_route_check.load(Ordering::Relaxed) {
            panic!("route check of {amount_msat} msat through {scid} crashed");
        }
        Ok(true)
    }

    async fn spendable_msat(&self, _scid: &str) -> Result<u64> {
        Ok(self.spendable_msat.load(Ordering::Relaxed))
    }

    fn add_payment_notifier(&self, notifier: PaymentNotifier) {
        lock(&self.network.notifiers)
            .entry(self.node_id.clone())
            .or_default()
            .push(notifier);
    }
}

/// Broadcast transactions, shared by every node's chain view.
#[derive(Default)]
pub struct ChainLedger {
    txs: Mutex<HashMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimKind {
    Preimage,
    Csv,
    Coop,
}

pub struct MockChain {
    ledger: Arc<ChainLedger>,
    height: AtomicU32,
    balance_sat: AtomicU64,
    flat_swap_out_fee_sat: u64,
    auto_confirm: AtomicBool,
    fail_claims: AtomicBool,
    claim_attempts: Mutex<Vec<ClaimKind>>,
    claims: Mutex<Vec<ClaimKind>>,
    csv_watches: Mutex<HashSet<SwapId>>,
    confirmation_callbacks: Mutex<Vec<ConfirmationCallback>>,
    csv_callbacks: Mutex<Vec<CsvCallback>>,
}

impl MockChain {
    pub fn new(ledger: Arc<ChainLedger>) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            height: AtomicU32::new(100),
            balance_sat: AtomicU64::new(100_000_000),
            flat_swap_out_fee_sat: 500,
            auto_confirm: AtomicBool::new(true),
            fail_claims: AtomicBool::new(false),
            claim_attempts: Mutex::new(Vec::new()),
            claims: Mutex::new(Vec::new()),
            csv_watches: Mutex::new(HashSet::new()),
            confirmation_callbacks: Mutex::new(Vec::new()),
            csv_callbacks: Mutex::new(Vec::new()),
        })
    }

    pub fn onchain_services(self: &Arc<Self>) -> OnchainServices {
        OnchainServices {
            tx_watcher: self.clone(),
            wallet: self.clone(),
            validator: self.clone(),
        }
    }

    pub fn set_auto_confirm(&self, on: bool) {
        self.auto_confirm.store(on, Ordering::Relaxed);
    }

    pub fn set_fail_claims(&self, on: bool) {
        self.fail_claims.store(on, Ordering::Relaxed);
    }

    pub fn set_height(&self, height: u32) {
        self.height.store(height, Ordering::Relaxed);
    }

    pub fn set_balance_sat(&self, sat: u64) {
        self.balance_sat.store(sat, Ordering::Relaxed);
    }

    pub fn claims(&self) -> Vec<ClaimKind> {
        lock(&self.claims).clone()
    }

    pub fn claim_attempts(&self, kind: ClaimKind) -> usize {
        lock(&self.claim_attempts)
            .iter()
            .filter(|k| **k == kind)
            .count()
    }

    pub fn is_watching_csv(&self, swap_id: &SwapId) -> bool {
        lock(&self.csv_watches).contains(swap_id)
    }

    /// Reports the opening output of `swap_id` as CSV-mature.
    pub fn pass_csv(&self, swap_id: SwapId) {
        let callbacks = lock(&self.csv_callbacks).clone();
        for callback in callbacks {
            callback(swap_id);
        }
    }

    fn claim(&self, kind: ClaimKind, opening: &OpeningParams) -> Result<BroadcastTx> {
        lock(&self.claim_attempts).push(kind);
        if self.fail_claims.load(Ordering::Relaxed) {
            anyhow::bail!("claim tx rejected by mempool");
        }
        let tx_hex = hex::encode(format!("{kind:?}:{}", opening.claim_payment_hash));
        let tx_id = sha256::Hash::hash(tx_hex.as_bytes()).to_string();
        lock(&self.ledger.txs).insert(tx_id.clone(), tx_hex.clone());
        lock(&self.claims).push(kind);
        Ok(BroadcastTx { tx_id, tx_hex })
    }
}

#[async_trait]
impl TxWatcher for MockChain {
    async fn get_block_height(&self) -> Result<u32> {
        Ok(self.height.load(Ordering::Relaxed))
    }

    async fn add_wait_for_confirmation_tx(
        &self,
        swap_id: SwapId,
        tx_id: &str,
        _vout: u32,
        _starting_height: u32,
        _script: &[u8],
    ) -> Result<()> {
        let tx_hex = lock(&self.ledger.txs).get(tx_id).cloned();
        if let Some(tx_hex) = tx_hex
            && self.auto_confirm.load(Ordering::Relaxed)
        {
            let callbacks = lock(&self.confirmation_callbacks).clone();
            for callback in callbacks {
                callback(swap_id, tx_hex.clone());
            }
        }
        Ok(())
    }

    async fn add_wait_for_csv_tx(
        &self,
        swap_id: SwapId,
        _tx_id: &str,
        _vout: u32,
        _starting_height: u32,
        _script: &[u8],
    ) -> Result<()> {
        lock(&self.csv_watches).insert(swap_id);
        Ok(())
    }

    fn add_confirmation_callback(&self, callback: ConfirmationCallback) {
        lock(&self.confirmation_callbacks).push(callback);
    }

    fn add_csv_callback(&self, callback: CsvCallback) {
        lock(&self.csv_callbacks).push(callback);
    }
}

#[async_trait]
impl Wallet for MockChain {
    async fn create_opening_transaction(&self, params: &OpeningParams) -> Result<OpeningTx> {
        let tx_hex = hex::encode(format!(
            "opening:{}:{}:{}:{}",
            params.maker_pubkey, params.taker_pubkey, params.claim_payment_hash, params.amount_sat
        ));
        Ok(OpeningTx {
            tx_hex,
            fee_sat: 250,
            vout: 0,
        })
    }

    async fn broadcast_opening_tx(&self, tx_hex: &str) -> Result<BroadcastTx> {
        let tx_id = sha256::Hash::hash(tx_hex.as_bytes()).to_string();
        lock(&self.ledger.txs).insert(tx_id.clone(), tx_hex.to_string());
        Ok(BroadcastTx {
            tx_id,
            tx_hex: tx_hex.to_string(),
        })
    }

    async fn create_preimage_spending_transaction(
        &self,
        opening: &OpeningParams,
        claim: &ClaimParams,
    ) -> Result<BroadcastTx> {
        anyhow::ensure!(claim.preimage.is_some(), "preimage claim without preimage");
        self.claim(ClaimKind::Preimage, opening)
    }

    async fn create_csv_spending_transaction(
        &self,
        opening: &OpeningParams,
        _claim: &ClaimParams,
    ) -> Result<BroadcastTx> {
        self.claim(ClaimKind::Csv, opening)
    }

    async fn create_coop_spending_transaction(
        &self,
        opening: &OpeningParams,
        _claim: &ClaimParams,
        taker_key: &SecretKey,
    ) -> Result<BroadcastTx> {
        let taker = hex::encode(PublicKey::from_secret_key(&Secp256k1::new(), taker_key).serialize());
        anyhow::ensure!(taker == opening.taker_pubkey, "taker key does not match");
        self.claim(ClaimKind::Coop, opening)
    }

    fn get_output_script(&self, params: &OpeningParams) -> Result<Vec<u8>> {
        let mut script = vec![0x00, 0x20];
        script.extend_from_slice(
            sha256::Hash::hash(params.claim_payment_hash.as_bytes()).as_byte_array(),
        );
        Ok(script)
    }

    async fn get_flat_swap_out_fee(&self) -> Result<u64> {
        Ok(self.flat_swap_out_fee_sat)
    }

    async fn get_onchain_balance(&self) -> Result<u64> {
        Ok(self.balance_sat.load(Ordering::Relaxed))
    }

    fn asset(&self) -> String {
        String::new()
    }

    fn network(&self) -> String {
        NETWORK.to_string()
    }
}

#[async_trait]
impl Validator for MockChain {
    async fn validate_tx(&self, _params: &OpeningParams, tx_hex: &str) -> Result<bool> {
        Ok(lock(&self.ledger.txs).values().any(|hex| hex == tx_hex))
    }

    fn csv_height(&self) -> u32 {
        CSV_HEIGHT
    }
}

pub struct NodeConfig {
    pub swap: SwapConfig,
    pub policy: PolicyConfig,
    /// Reuse a store, as a restarted node does.
    pub store: Option<Arc<SqliteSwapStore>>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            swap: SwapConfig::for_testing(),
            policy: PolicyConfig {
                accept_all_peers: true,
                ..PolicyConfig::default()
            },
            store: None,
        }
    }
}

/// The collaborators of one node, wired into a `SwapServices`.
pub struct Fixture {
    pub node_id: String,
    pub services: Arc<SwapServices>,
    pub store: Arc<SqliteSwapStore>,
    pub lightning: Arc<MockLightning>,
    pub messenger: Arc<MockMessenger>,
    pub chain: Arc<MockChain>,
    pub policy: Arc<BasicPolicy>,
}

pub struct TestNode {
    pub node_id: String,
    pub service: SwapService,
    pub store: Arc<SqliteSwapStore>,
    pub lightning: Arc<MockLightning>,
    pub messenger: Arc<MockMessenger>,
    pub chain: Arc<MockChain>,
    pub policy: Arc<BasicPolicy>,
}

#[derive(Default)]
pub struct TestNet {
    pub messages: Arc<MessengerNetwork>,
    pub lightning: Arc<LightningNetwork>,
    pub ledger: Arc<ChainLedger>,
}

impl TestNet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collaborators of a node whose engine the test drives directly.
    pub fn fixture(&self, cfg: NodeConfig) -> Result<Fixture> {
        let (parts, services) = self.wire(cfg)?;
        Ok(Fixture {
            node_id: parts.node_id,
            services: Arc::new(services),
            store: parts.store,
            lightning: parts.lightning,
            messenger: parts.messenger,
            chain: parts.chain,
            policy: parts.policy,
        })
    }

    /// A started node.
    pub fn node(&self, cfg: NodeConfig) -> Result<TestNode> {
        let (parts, services) = self.wire(cfg)?;
        let service = SwapService::new(services);
        service.start().context("start swap service")?;
        Ok(TestNode {
            node_id: parts.node_id,
            service,
            store: parts.store,
            lightning: parts.lightning,
            messenger: parts.messenger,
            chain: parts.chain,
            policy: parts.policy,
        })
    }

    /// Stops `node` and starts a fresh service on its store and identity.
    pub fn restart(&self, node: TestNode, swap: SwapConfig) -> Result<TestNode> {
        node.service.stop();
        let parts = Parts {
            node_id: node.node_id,
            store: node.store,
            lightning: node.lightning,
            messenger: node.messenger,
            chain: node.chain,
            policy: node.policy,
        };
        let services = parts.services(swap);
        drop(node.service);

        let service = SwapService::new(services);
        service.start().context("restart swap service")?;
        Ok(TestNode {
            node_id: parts.node_id,
            service,
            store: parts.store,
            lightning: parts.lightning,
            messenger: parts.messenger,
            chain: parts.chain,
            policy: parts.policy,
        })
    }

    fn wire(&self, cfg: NodeConfig) -> Result<(Parts, SwapServices)> {
        let lightning = self.lightning.node();
        let node_id = lightning.node_id.clone();
        let store = match cfg.store {
            Some(store) => store,
            None => Arc::new(SqliteSwapStore::open_in_memory().context("open swap store")?),
        };
        let parts = Parts {
            messenger: self.messages.messenger(&node_id),
            chain: MockChain::new(Arc::clone(&self.ledger)),
            policy: Arc::new(BasicPolicy::new(cfg.policy)),
            node_id,
            store,
            lightning,
        };
        let services = parts.services(cfg.swap);
        Ok((parts, services))
    }
}

struct Parts {
    node_id: String,
    store: Arc<SqliteSwapStore>,
    lightning: Arc<MockLightning>,
    messenger: Arc<MockMessenger>,
    chain: Arc<MockChain>,
    policy: Arc<BasicPolicy>,
}

impl Parts {
    fn services(&self, swap: SwapConfig) -> SwapServices {
        SwapServices::builder(
            self.store.clone(),
            self.store.clone(),
            self.lightning.clone(),
            self.messenger.clone(),
            self.policy.clone(),
        )
        .bitcoin(self.chain.onchain_services())
        .config(swap)
        .node_id(self.node_id.clone())
        .build()
    }
}

impl TestNode {
    pub fn record(&self, swap_id: &SwapId) -> Result<SwapRecord> {
        self.service
            .get_swap(swap_id)?
            .with_context(|| format!("swap {swap_id} not stored"))
    }

    pub async fn wait_for_state(&self, swap_id: SwapId, state: StateType) -> Result<SwapRecord> {
        let service = &self.service;
        wait_for(&format!("swap {swap_id} in {state}"), WAIT, || async move {
            anyhow::Ok(service.get_swap(&swap_id)?.filter(|r| r.current == state))
        })
        .await
    }

    pub async fn wait_until_inactive(&self, swap_id: SwapId) -> Result<()> {
        let service = &self.service;
        wait_for(&format!("swap {swap_id} inactive"), WAIT, || async move {
            anyhow::Ok((!service.active_swap_ids().contains(&swap_id)).then_some(()))
        })
        .await
    }
}

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context as _, Result};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use rand::RngCore as _;
use serde::{Deserialize, Serialize};

use super::id::SwapId;
use super::messages::{
    Cancel, CoopClose, OpeningTxBroadcasted, PeerMessage, SwapInAgreement, SwapOutAgreement,
    SwapRequest,
};
use super::states::{EventType, StateType};

const BITCOIN_INVOICE_EXPIRY_SECS: u64 = 3600 * 24;
const LIQUID_INVOICE_EXPIRY_SECS: u64 = 3600;

/// Chain the on-chain leg of a swap settles on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Chain {
    #[serde(rename = "btc")]
    Bitcoin,
    #[serde(rename = "lbtc")]
    Liquid,
}

impl Chain {
    pub fn as_str(self) -> &'static str {
        match self {
            Chain::Bitcoin => "btc",
            Chain::Liquid => "lbtc",
        }
    }

    pub fn invoice_expiry_secs(self) -> u64 {
        match self {
            Chain::Bitcoin => BITCOIN_INVOICE_EXPIRY_SECS,
            Chain::Liquid => LIQUID_INVOICE_EXPIRY_SECS,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapType {
    SwapIn,
    SwapOut,
}

impl SwapType {
    pub fn as_str(self) -> &'static str {
        match self {
            SwapType::SwapIn => "swap_in",
            SwapType::SwapOut => "swap_out",
        }
    }
}

impl fmt::Display for SwapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sender initiates the swap, receiver answers the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapRole {
    Sender,
    Receiver,
}

impl SwapRole {
    pub fn as_str(self) -> &'static str {
        match self {
            SwapRole::Sender => "sender",
            SwapRole::Receiver => "receiver",
        }
    }
}

impl fmt::Display for SwapRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a wallet needs to build or recognise the opening output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpeningParams {
    pub taker_pubkey: String,
    pub maker_pubkey: String,
    pub claim_payment_hash: String,
    pub amount_sat: u64,
    pub blinding_key_hex: Option<String>,
}

/// Inputs for spending the opening output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimParams {
    pub preimage: Option<String>,
    pub signer_key_hex: String,
    pub opening_tx_hex: String,
}

mod hex_key {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("private key must be 32 bytes"))
    }
}

pub(crate) fn random_secret_key() -> [u8; 32] {
    let mut rng = rand::thread_rng();
    loop {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        if SecretKey::from_slice(&bytes).is_ok() {
            return bytes;
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Durable state of one swap. Only actions running inside the swap's state
/// machine mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapData {
    pub id: SwapId,
    pub swap_type: SwapType,
    pub role: SwapRole,
    pub peer_node_id: String,
    pub initiator_node_id: String,
    pub created_at: u64,

    #[serde(with = "hex_key")]
    privkey: [u8; 32],

    pub swap_in_request: Option<SwapRequest>,
    pub swap_in_agreement: Option<SwapInAgreement>,
    pub swap_out_request: Option<SwapRequest>,
    pub swap_out_agreement: Option<SwapOutAgreement>,
    pub opening_tx_broadcasted: Option<OpeningTxBroadcasted>,
    pub coop_close: Option<CoopClose>,
    pub cancel: Option<Cancel>,

    /// Reason sent to the peer on cancel. Set once, by the first failure.
    #[serde(default)]
    pub cancel_message: String,

    pub fee_preimage: Option<String>,
    #[serde(default)]
    pub opening_tx_fee_sat: u64,
    pub opening_tx_hex: Option<String>,
    starting_block_height: Option<u32>,
    pub claim_tx_id: Option<String>,
    pub claim_payment_hash: Option<String>,
    pub claim_preimage: Option<String>,
    pub blinding_key_hex: Option<String>,

    /// Outbound message the next send action delivers.
    pub next_message: Option<PeerMessage>,
    pub last_err: Option<String>,
}

impl SwapData {
    pub fn new(
        id: SwapId,
        swap_type: SwapType,
        role: SwapRole,
        initiator_node_id: impl Into<String>,
        peer_node_id: impl Into<String>,
    ) -> Self {
        Self {
            id,
            swap_type,
            role,
            peer_node_id: peer_node_id.into(),
            initiator_node_id: initiator_node_id.into(),
            created_at: unix_now(),
            privkey: random_secret_key(),
            swap_in_request: None,
            swap_in_agreement: None,
            swap_out_request: None,
            swap_out_agreement: None,
            opening_tx_broadcasted: None,
            coop_close: None,
            cancel: None,
            cancel_message: String::new(),
            fee_preimage: None,
            opening_tx_fee_sat: 0,
            opening_tx_hex: None,
            starting_block_height: None,
            claim_tx_id: None,
            claim_payment_hash: None,
            claim_preimage: None,
            blinding_key_hex: None,
            next_message: None,
            last_err: None,
        }
    }

    /// Data for a swap a peer asked us to take part in.
    pub fn from_request(id: SwapId, swap_type: SwapType, peer_node_id: &str) -> Self {
        Self::new(id, swap_type, SwapRole::Receiver, peer_node_id, peer_node_id)
    }

    pub fn request(&self) -> Option<&SwapRequest> {
        match self.swap_type {
            SwapType::SwapIn => self.swap_in_request.as_ref(),
            SwapType::SwapOut => self.swap_out_request.as_ref(),
        }
    }

    pub fn chain(&self) -> Result<Chain> {
        self.request()
            .context("swap has no request")?
            .chain()
    }

    pub fn amount_sat(&self) -> u64 {
        self.request().map(|r| r.amount).unwrap_or_default()
    }

    pub fn scid(&self) -> &str {
        self.request().map(|r| r.scid.as_str()).unwrap_or_default()
    }

    pub fn asset(&self) -> &str {
        self.request().map(|r| r.asset.as_str()).unwrap_or_default()
    }

    pub fn network(&self) -> &str {
        self.request().map(|r| r.network.as_str()).unwrap_or_default()
    }

    pub fn protocol_version(&self) -> u64 {
        self.request()
            .map(|r| r.protocol_version)
            .unwrap_or_default()
    }

    /// Premium the receiver asked for in its agreement.
    pub fn premium_sat(&self) -> u64 {
        match self.swap_type {
            SwapType::SwapIn => self.swap_in_agreement.as_ref().map(|a| a.premium),
            SwapType::SwapOut => self.swap_out_agreement.as_ref().map(|a| a.premium),
        }
        .unwrap_or_default()
    }

    /// Amount of the claim invoice: the swap amount, plus the premium on a
    /// swap-in.
    pub fn claim_amount_msat(&self) -> Result<u64> {
        let premium = match self.swap_type {
            SwapType::SwapIn => self.premium_sat(),
            SwapType::SwapOut => 0,
        };
        self.amount_sat()
            .checked_add(premium)
            .and_then(|sat| sat.checked_mul(1000))
            .with_context(|| {
                format!(
                    "claim amount of {} sat with {premium} sat premium does not fit in msat",
                    self.amount_sat()
                )
            })
    }

    pub fn invoice_expiry_secs(&self) -> Result<u64> {
        Ok(self.chain()?.invoice_expiry_secs())
    }

    /// The maker funds the opening transaction, the taker pays the claim
    /// invoice.
    pub fn is_maker(&self) -> bool {
        matches!(
            (self.swap_type, self.role),
            (SwapType::SwapOut, SwapRole::Receiver) | (SwapType::SwapIn, SwapRole::Sender)
        )
    }

    pub fn maker_pubkey(&self) -> Option<&str> {
        match self.swap_type {
            SwapType::SwapIn => self.swap_in_request.as_ref().map(|r| r.pubkey.as_str()),
            SwapType::SwapOut => self.swap_out_agreement.as_ref().map(|a| a.pubkey.as_str()),
        }
    }

    pub fn taker_pubkey(&self) -> Option<&str> {
        match self.swap_type {
            SwapType::SwapIn => self.swap_in_agreement.as_ref().map(|a| a.pubkey.as_str()),
            SwapType::SwapOut => self.swap_out_request.as_ref().map(|r| r.pubkey.as_str()),
        }
    }

    pub fn privkey(&self) -> Result<SecretKey> {
        SecretKey::from_slice(&self.privkey).context("load swap private key")
    }

    pub fn privkey_hex(&self) -> String {
        hex::encode(self.privkey)
    }

    pub fn pubkey_hex(&self) -> Result<String> {
        let pubkey = PublicKey::from_secret_key(&Secp256k1::new(), &self.privkey()?);
        Ok(hex::encode(pubkey.serialize()))
    }

    pub fn starting_block_height(&self) -> Option<u32> {
        self.starting_block_height
    }

    /// Records the safety baseline for CSV comparisons. A height that is
    /// already set is kept, so a restarted swap never moves its baseline.
    pub fn set_starting_block_height(&mut self, height: u32) -> u32 {
        match self.starting_block_height {
            Some(existing) => {
                if existing != height {
                    tracing::debug!(
                        swap_id = %self.id,
                        existing,
                        current = height,
                        "starting block height already set"
                    );
                }
                existing
            }
            None => {
                self.starting_block_height = Some(height);
                height
            }
        }
    }

    pub fn opening_tx_id(&self) -> Option<&str> {
        self.opening_tx_broadcasted.as_ref().map(|m| m.tx_id.as_str())
    }

    pub fn opening_params(&self) -> Result<OpeningParams> {
        let blinding_key_hex = self.blinding_key_hex.clone().or_else(|| {
            self.opening_tx_broadcasted
                .as_ref()
                .map(|m| m.blinding_key.clone())
                .filter(|k| !k.is_empty())
        });

        Ok(OpeningParams {
            taker_pubkey: self.taker_pubkey().context("taker pubkey unknown")?.to_string(),
            maker_pubkey: self.maker_pubkey().context("maker pubkey unknown")?.to_string(),
            claim_payment_hash: self
                .claim_payment_hash
                .clone()
                .context("claim payment hash unknown")?,
            amount_sat: self.amount_sat(),
            blinding_key_hex,
        })
    }

    pub fn claim_params(&self) -> ClaimParams {
        ClaimParams {
            preimage: self.claim_preimage.clone(),
            signer_key_hex: self.privkey_hex(),
            opening_tx_hex: self.opening_tx_hex.clone().unwrap_or_default(),
        }
    }

    /// Records a failure and yields `ActionFailed`. The first failure also
    /// becomes the cancel reason.
    pub fn handle_error(&mut self, err: impl fmt::Display) -> EventType {
        let err = err.to_string();
        tracing::warn!(swap_id = %self.id, error = %err, "swap action failed");
        if self.cancel_message.is_empty() {
            self.cancel_message = err.clone();
        }
        self.last_err = Some(err);
        EventType::ActionFailed
    }
}

/// The persisted document of one swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRecord {
    pub swap_id: SwapId,
    pub swap_type: SwapType,
    pub role: SwapRole,
    pub previous: StateType,
    pub current: StateType,
    pub data: SwapData,
}

impl SwapRecord {
    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn summary(&self) -> SwapSummary {
        let data = &self.data;
        SwapSummary {
            id: self.swap_id,
            chain: data.chain().ok(),
            created_at: data.created_at,
            swap_type: self.swap_type,
            role: self.role,
            state: self.current,
            initiator: data.initiator_node_id.clone(),
            peer: data.peer_node_id.clone(),
            amount_sat: data.amount_sat(),
            scid: data.scid().to_string(),
            opening_tx_id: data.opening_tx_id().map(str::to_string),
            claim_tx_id: data.claim_tx_id.clone(),
            cancel_message: Some(data.cancel_message.clone()).filter(|m| !m.is_empty()),
        }
    }
}

/// Flat operator view of a swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapSummary {
    pub id: SwapId,
    pub chain: Option<Chain>,
    pub created_at: u64,
    #[serde(rename = "type")]
    pub swap_type: SwapType,
    pub role: SwapRole,
    pub state: StateType,
    pub initiator: String,
    pub peer: String,
    pub amount_sat: u64,
    pub scid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opening_tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_message: Option<String>,
}

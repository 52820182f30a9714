//! Peer protocol messages.
//!
//! Every message travels as a JSON payload with its type code carried out of
//! band by the transport. Decoding is driven by a per-type field schema, so a
//! payload is checked for required fields and field kinds before it becomes a
//! typed [`PeerMessage`]. Unknown fields are ignored for forward
//! compatibility.

use std::fmt::Write as _;
use std::str::FromStr as _;

use anyhow::Result;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::data::{Chain, SwapData, SwapType};
use super::error::{MessageError, RequestRejection};
use super::id::SwapId;
use super::states::EventType;
use super::PROTOCOL_VERSION;

/// First custom message type of the protocol. Types advance in steps of two
/// so every code stays odd.
pub const BASE_MESSAGE_TYPE: u32 = 42069;

/// Reason recorded when a peer cancels without saying why.
pub const PEER_CANCEL_DEFAULT: &str = "canceled by peer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    SwapInRequest,
    SwapOutRequest,
    SwapInAgreement,
    SwapOutAgreement,
    OpeningTxBroadcasted,
    Cancel,
    CoopClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    U64,
    Object,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldKind::Str => value.is_string(),
            FieldKind::U64 => value.is_u64(),
            FieldKind::Object => value.is_object(),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            FieldKind::Str => "string",
            FieldKind::U64 => "u64",
            FieldKind::Object => "object",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn required(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: true,
    }
}

const fn optional(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
    }
}

const REQUEST_SCHEMA: &[FieldSpec] = &[
    required("protocol_version", FieldKind::U64),
    required("swap_id", FieldKind::Str),
    optional("asset", FieldKind::Str),
    optional("network", FieldKind::Str),
    required("scid", FieldKind::Str),
    required("amount", FieldKind::U64),
    required("pubkey", FieldKind::Str),
    optional("premium_limit", FieldKind::U64),
    optional("twohop", FieldKind::Object),
];

const SWAP_IN_AGREEMENT_SCHEMA: &[FieldSpec] = &[
    required("protocol_version", FieldKind::U64),
    required("swap_id", FieldKind::Str),
    required("pubkey", FieldKind::Str),
    required("premium", FieldKind::U64),
];

const SWAP_OUT_AGREEMENT_SCHEMA: &[FieldSpec] = &[
    required("protocol_version", FieldKind::U64),
    required("swap_id", FieldKind::Str),
    required("pubkey", FieldKind::Str),
    required("payreq", FieldKind::Str),
    required("premium", FieldKind::U64),
];

const OPENING_TX_BROADCASTED_SCHEMA: &[FieldSpec] = &[
    required("swap_id", FieldKind::Str),
    required("payreq", FieldKind::Str),
    required("tx_id", FieldKind::Str),
    required("script_out", FieldKind::U64),
    required("blinding_key", FieldKind::Str),
];

const CANCEL_SCHEMA: &[FieldSpec] = &[
    required("swap_id", FieldKind::Str),
    required("message", FieldKind::Str),
];

const COOP_CLOSE_SCHEMA: &[FieldSpec] = &[
    required("swap_id", FieldKind::Str),
    required("message", FieldKind::Str),
    required("privkey", FieldKind::Str),
];

impl MessageType {
    pub const ALL: [MessageType; 7] = [
        MessageType::SwapInRequest,
        MessageType::SwapOutRequest,
        MessageType::SwapInAgreement,
        MessageType::SwapOutAgreement,
        MessageType::OpeningTxBroadcasted,
        MessageType::Cancel,
        MessageType::CoopClose,
    ];

    pub fn code(self) -> u32 {
        let index = match self {
            MessageType::SwapInRequest => 0,
            MessageType::SwapOutRequest => 1,
            MessageType::SwapInAgreement => 2,
            MessageType::SwapOutAgreement => 3,
            MessageType::OpeningTxBroadcasted => 4,
            MessageType::Cancel => 5,
            MessageType::CoopClose => 6,
        };
        BASE_MESSAGE_TYPE + 2 * index
    }

    pub fn from_code(code: u32) -> Result<Self, MessageError> {
        if code % 2 == 0 {
            return Err(MessageError::EvenType(code));
        }
        Self::ALL
            .into_iter()
            .find(|t| t.code() == code)
            .ok_or(MessageError::UnknownType(code))
    }

    /// Parses the hex form transports use for custom message types.
    pub fn from_hex(s: &str) -> Result<Self, MessageError> {
        let code =
            u32::from_str_radix(s, 16).map_err(|_| MessageError::TypeNotHex(s.to_string()))?;
        Self::from_code(code)
    }

    pub fn to_hex(self) -> String {
        format!("{:x}", self.code())
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::SwapInRequest => "swap_in_request",
            MessageType::SwapOutRequest => "swap_out_request",
            MessageType::SwapInAgreement => "swap_in_agreement",
            MessageType::SwapOutAgreement => "swap_out_agreement",
            MessageType::OpeningTxBroadcasted => "opening_tx_broadcasted",
            MessageType::Cancel => "cancel",
            MessageType::CoopClose => "coop_close",
        }
    }

    pub fn schema(self) -> &'static [FieldSpec] {
        match self {
            MessageType::SwapInRequest | MessageType::SwapOutRequest => REQUEST_SCHEMA,
            MessageType::SwapInAgreement => SWAP_IN_AGREEMENT_SCHEMA,
            MessageType::SwapOutAgreement => SWAP_OUT_AGREEMENT_SCHEMA,
            MessageType::OpeningTxBroadcasted => OPENING_TX_BROADCASTED_SCHEMA,
            MessageType::Cancel => CANCEL_SCHEMA,
            MessageType::CoopClose => COOP_CLOSE_SCHEMA,
        }
    }

    /// One line describing the payload, e.g.
    /// `cancel {swap_id: string, message: string}`.
    pub fn usage(self) -> String {
        let mut out = format!("{} {{", self.name());
        for (i, field) in self.schema().iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let marker = if field.required { "" } else { "?" };
            let _ = write!(out, "{}{marker}: {}", field.name, field.kind.as_str());
        }
        out.push('}');
        out
    }

    fn check_schema(self, value: &Value) -> Result<(), MessageError> {
        let message = self.name();
        let object = value.as_object().ok_or(MessageError::WrongFieldType {
            message,
            field: "<payload>",
            expected: "object",
        })?;

        for spec in self.schema() {
            match object.get(spec.name).filter(|v| !v.is_null()) {
                None if spec.required => {
                    return Err(MessageError::MissingField {
                        message,
                        field: spec.name,
                    });
                }
                None => {}
                Some(v) if !spec.kind.matches(v) => {
                    return Err(MessageError::WrongFieldType {
                        message,
                        field: spec.name,
                        expected: spec.kind.as_str(),
                    });
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Optional routing extension of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoHop {
    pub intermediary_pubkey: String,
    pub incoming_scid: String,
}

/// Body shared by `swap_in_request` and `swap_out_request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub protocol_version: u64,
    pub swap_id: SwapId,
    #[serde(default)]
    pub asset: String,
    #[serde(default)]
    pub network: String,
    pub scid: String,
    pub amount: u64,
    pub pubkey: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premium_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twohop: Option<TwoHop>,
}

impl SwapRequest {
    pub fn chain(&self) -> Result<Chain> {
        match (self.asset.is_empty(), self.network.is_empty()) {
            (true, false) => Ok(Chain::Bitcoin),
            (false, true) => Ok(Chain::Liquid),
            _ => Err(RequestRejection::InvalidChain.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapInAgreement {
    pub protocol_version: u64,
    pub swap_id: SwapId,
    pub pubkey: String,
    pub premium: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOutAgreement {
    pub protocol_version: u64,
    pub swap_id: SwapId,
    pub pubkey: String,
    /// Fee invoice the requester pays before the opening tx is broadcast.
    pub payreq: String,
    pub premium: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningTxBroadcasted {
    pub swap_id: SwapId,
    /// Claim invoice. Paying it reveals the preimage locking the output.
    pub payreq: String,
    pub tx_id: String,
    pub script_out: u32,
    pub blinding_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancel {
    pub swap_id: SwapId,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoopClose {
    pub swap_id: SwapId,
    pub message: String,
    /// The taker's swap private key, revealed so the maker can spend alone.
    pub privkey: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PeerMessage {
    SwapInRequest(SwapRequest),
    SwapOutRequest(SwapRequest),
    SwapInAgreement(SwapInAgreement),
    SwapOutAgreement(SwapOutAgreement),
    OpeningTxBroadcasted(OpeningTxBroadcasted),
    Cancel(Cancel),
    CoopClose(CoopClose),
}

fn from_value<T: DeserializeOwned>(message: &'static str, value: Value) -> Result<T, MessageError> {
    serde_json::from_value(value).map_err(|source| MessageError::Malformed { message, source })
}

fn check_pubkey(message: &'static str, field: &'static str, value: &str) -> Result<(), MessageError> {
    PublicKey::from_str(value)
        .map(|_| ())
        .map_err(|e| MessageError::InvalidField {
            message,
            field,
            reason: e.to_string(),
        })
}

fn check_not_empty(message: &'static str, field: &'static str, value: &str) -> Result<(), MessageError> {
    if value.is_empty() {
        return Err(MessageError::InvalidField {
            message,
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn is_short_channel_id(scid: &str) -> bool {
    let parts: Vec<&str> = scid.split('x').collect();
    parts.len() == 3 && parts.iter().all(|p| p.parse::<u64>().is_ok())
}

fn parse_secret_key(hex_key: &str) -> Result<SecretKey> {
    let bytes = hex::decode(hex_key).map_err(|e| anyhow::anyhow!("decode private key: {e}"))?;
    SecretKey::from_slice(&bytes).map_err(|e| anyhow::anyhow!("parse private key: {e}"))
}

impl PeerMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            PeerMessage::SwapInRequest(_) => MessageType::SwapInRequest,
            PeerMessage::SwapOutRequest(_) => MessageType::SwapOutRequest,
            PeerMessage::SwapInAgreement(_) => MessageType::SwapInAgreement,
            PeerMessage::SwapOutAgreement(_) => MessageType::SwapOutAgreement,
            PeerMessage::OpeningTxBroadcasted(_) => MessageType::OpeningTxBroadcasted,
            PeerMessage::Cancel(_) => MessageType::Cancel,
            PeerMessage::CoopClose(_) => MessageType::CoopClose,
        }
    }

    pub fn swap_id(&self) -> SwapId {
        match self {
            PeerMessage::SwapInRequest(m) | PeerMessage::SwapOutRequest(m) => m.swap_id,
            PeerMessage::SwapInAgreement(m) => m.swap_id,
            PeerMessage::SwapOutAgreement(m) => m.swap_id,
            PeerMessage::OpeningTxBroadcasted(m) => m.swap_id,
            PeerMessage::Cancel(m) => m.swap_id,
            PeerMessage::CoopClose(m) => m.swap_id,
        }
    }

    /// The state machine event a received message drives.
    pub fn event(&self) -> EventType {
        match self {
            PeerMessage::SwapInRequest(_) => EventType::OnSwapInRequestReceived,
            PeerMessage::SwapOutRequest(_) => EventType::OnSwapOutRequestReceived,
            PeerMessage::SwapInAgreement(_) => EventType::OnAgreementReceived,
            PeerMessage::SwapOutAgreement(_) => EventType::OnFeeInvoiceReceived,
            PeerMessage::OpeningTxBroadcasted(_) => EventType::OnTxOpenedMessage,
            PeerMessage::Cancel(_) => EventType::OnCancelReceived,
            PeerMessage::CoopClose(_) => EventType::OnCoopCloseReceived,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let message = self.message_type().name();
        let bytes = match self {
            PeerMessage::SwapInRequest(m) | PeerMessage::SwapOutRequest(m) => serde_json::to_vec(m),
            PeerMessage::SwapInAgreement(m) => serde_json::to_vec(m),
            PeerMessage::SwapOutAgreement(m) => serde_json::to_vec(m),
            PeerMessage::OpeningTxBroadcasted(m) => serde_json::to_vec(m),
            PeerMessage::Cancel(m) => serde_json::to_vec(m),
            PeerMessage::CoopClose(m) => serde_json::to_vec(m),
        };
        bytes.map_err(|source| MessageError::Encode { message, source })
    }

    pub fn decode(msg_type: MessageType, payload: &[u8]) -> Result<Self, MessageError> {
        let message = msg_type.name();
        let value: Value = serde_json::from_slice(payload)
            .map_err(|source| MessageError::Malformed { message, source })?;
        msg_type.check_schema(&value)?;

        let decoded = match msg_type {
            MessageType::SwapInRequest => PeerMessage::SwapInRequest(from_value(message, value)?),
            MessageType::SwapOutRequest => PeerMessage::SwapOutRequest(from_value(message, value)?),
            MessageType::SwapInAgreement => {
                PeerMessage::SwapInAgreement(from_value(message, value)?)
            }
            MessageType::SwapOutAgreement => {
                PeerMessage::SwapOutAgreement(from_value(message, value)?)
            }
            MessageType::OpeningTxBroadcasted => {
                PeerMessage::OpeningTxBroadcasted(from_value(message, value)?)
            }
            MessageType::Cancel => PeerMessage::Cancel(from_value(message, value)?),
            MessageType::CoopClose => PeerMessage::CoopClose(from_value(message, value)?),
        };
        decoded.check()?;
        Ok(decoded)
    }

    /// Checks that do not depend on any swap state.
    fn check(&self) -> Result<(), MessageError> {
        let message = self.message_type().name();
        match self {
            PeerMessage::SwapInRequest(m) | PeerMessage::SwapOutRequest(m) => {
                if m.amount == 0 {
                    return Err(MessageError::InvalidField {
                        message,
                        field: "amount",
                        reason: "must be greater than zero".to_string(),
                    });
                }
                check_not_empty(message, "scid", &m.scid)?;
                check_pubkey(message, "pubkey", &m.pubkey)?;
                if let Some(twohop) = &m.twohop {
                    check_pubkey(message, "twohop.intermediary_pubkey", &twohop.intermediary_pubkey)?;
                    if !is_short_channel_id(&twohop.incoming_scid) {
                        return Err(MessageError::InvalidField {
                            message,
                            field: "twohop.incoming_scid",
                            reason: format!("{} is not in NxNxN form", twohop.incoming_scid),
                        });
                    }
                }
            }
            PeerMessage::SwapInAgreement(m) => check_pubkey(message, "pubkey", &m.pubkey)?,
            PeerMessage::SwapOutAgreement(m) => {
                check_pubkey(message, "pubkey", &m.pubkey)?;
                check_not_empty(message, "payreq", &m.payreq)?;
            }
            PeerMessage::OpeningTxBroadcasted(m) => {
                check_not_empty(message, "payreq", &m.payreq)?;
                check_not_empty(message, "tx_id", &m.tx_id)?;
            }
            PeerMessage::Cancel(_) => {}
            PeerMessage::CoopClose(m) => {
                parse_secret_key(&m.privkey).map_err(|e| MessageError::InvalidField {
                    message,
                    field: "privkey",
                    reason: format!("{e:#}"),
                })?;
            }
        }
        Ok(())
    }

    /// Checks a received message against the swap it is addressed to.
    /// A failure turns the delivery into `OnInvalidMessage`.
    pub fn validate_for_swap(&self, data: &SwapData) -> Result<()> {
        anyhow::ensure!(
            self.swap_id() == data.id,
            "message for swap {} delivered to swap {}",
            self.swap_id(),
            data.id
        );

        match self {
            PeerMessage::SwapInAgreement(SwapInAgreement {
                protocol_version,
                premium,
                ..
            })
            | PeerMessage::SwapOutAgreement(SwapOutAgreement {
                protocol_version,
                premium,
                ..
            }) => {
                if *protocol_version != PROTOCOL_VERSION {
                    return Err(RequestRejection::IncompatibleVersion.into());
                }
                if let Some(limit) = data.request().and_then(|r| r.premium_limit)
                    && *premium > limit
                {
                    return Err(RequestRejection::PremiumOverLimit {
                        premium: *premium,
                        limit,
                    }
                    .into());
                }
            }
            PeerMessage::CoopClose(m) => {
                let key = parse_secret_key(&m.privkey)?;
                let derived = hex::encode(PublicKey::from_secret_key(&Secp256k1::new(), &key).serialize());
                let taker = data.taker_pubkey().unwrap_or_default();
                anyhow::ensure!(
                    derived == taker,
                    "coop close key does not belong to the taker"
                );
            }
            _ => {}
        }
        Ok(())
    }

    /// Binds the message's fields to the swap.
    pub fn apply(self, data: &mut SwapData) {
        match self {
            PeerMessage::SwapInRequest(m) => data.swap_in_request = Some(m),
            PeerMessage::SwapOutRequest(m) => data.swap_out_request = Some(m),
            PeerMessage::SwapInAgreement(m) => data.swap_in_agreement = Some(m),
            PeerMessage::SwapOutAgreement(m) => data.swap_out_agreement = Some(m),
            PeerMessage::OpeningTxBroadcasted(m) => data.opening_tx_broadcasted = Some(m),
            PeerMessage::Cancel(m) => {
                if data.cancel_message.is_empty() {
                    data.cancel_message = if m.message.is_empty() {
                        PEER_CANCEL_DEFAULT.to_string()
                    } else {
                        m.message.clone()
                    };
                }
                data.cancel = Some(m);
            }
            PeerMessage::CoopClose(m) => data.coop_close = Some(m),
        }
    }

    /// Swap type a request opens; `None` for follow-up messages.
    pub fn opens_swap(&self) -> Option<SwapType> {
        match self {
            PeerMessage::SwapInRequest(_) => Some(SwapType::SwapIn),
            PeerMessage::SwapOutRequest(_) => Some(SwapType::SwapOut),
            _ => None,
        }
    }

    pub fn request(&self) -> Option<&SwapRequest> {
        match self {
            PeerMessage::SwapInRequest(r) | PeerMessage::SwapOutRequest(r) => Some(r),
            _ => None,
        }
    }
}

use thiserror::Error;

use super::data::Chain;
use super::id::SwapId;
use super::states::{EventType, StateType};

#[derive(Debug, Error)]
pub enum FsmError {
    #[error("event rejected: {event} in state {state}")]
    EventRejected { state: StateType, event: EventType },

    #[error("fsm config invalid: no state {0}")]
    Config(StateType),

    #[error("persist swap {0}")]
    Persist(SwapId, #[source] anyhow::Error),
}

/// Reasons the request gate turns a swap request down. The display text is
/// what the peer sees in the cancel message and what the audit log stores.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestRejection {
    #[error("new swaps are disabled")]
    NewSwapsDisabled,

    #[error("{0} swaps are not supported")]
    ChainDisabled(Chain),

    #[error("swap request must carry exactly one of asset or network")]
    InvalidChain,

    #[error("incompatible peerswap version")]
    IncompatibleVersion,

    #[error("requested amount {amount_msat} msat is less than the minimum swap amount of {min_msat} msat")]
    AmountBelowMinimum { amount_msat: u64, min_msat: u64 },

    #[error("requested amount {0} sat is too large")]
    AmountTooLarge(u64),

    #[error("invalid liquid asset {0}")]
    InvalidAsset(String),

    #[error("invalid bitcoin network {0}")]
    InvalidNetwork(String),

    #[error("peer not allowed to request swaps")]
    PeerNotAllowed,

    #[error("peer is on the suspicious peer list")]
    PeerSuspicious,

    #[error("premium {premium} sat exceeds the limit of {limit} sat")]
    PremiumOverLimit { premium: u64, limit: u64 },
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("even message type {0} is not allowed")]
    EvenType(u32),

    #[error("message type {0} is not a swap protocol message")]
    UnknownType(u32),

    #[error("message type {0:?} is not hex")]
    TypeNotHex(String),

    #[error("malformed {message} payload")]
    Malformed {
        message: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("encode {message}")]
    Encode {
        message: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{message} is missing required field {field}")]
    MissingField {
        message: &'static str,
        field: &'static str,
    },

    #[error("{message} field {field} must be {expected}")]
    WrongFieldType {
        message: &'static str,
        field: &'static str,
        expected: &'static str,
    },

    #[error("{message} field {field} is invalid: {reason}")]
    InvalidField {
        message: &'static str,
        field: &'static str,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("already active swap on channel {0}")]
    ActiveSwapOnChannel(String),

    #[error("swap {swap_id}: message from unexpected peer {got}, expected {expected}")]
    UnexpectedPeer {
        swap_id: SwapId,
        expected: String,
        got: String,
    },

    #[error("no active swap {0}")]
    SwapNotActive(SwapId),

    #[error("swap {0} already exists")]
    DuplicateSwap(SwapId),

    #[error("{0} swaps are not supported")]
    ChainNotSupported(Chain),

    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: u64, available: u64 },

    #[error(transparent)]
    Fsm(#[from] FsmError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

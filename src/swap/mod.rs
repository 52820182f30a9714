pub mod actions;
pub mod data;
pub mod error;
pub mod fsm;
pub mod id;
pub mod messages;
pub mod requested;
pub mod retry;
pub mod sender;
pub mod service;
pub mod services;
pub mod states;
pub mod store;
pub mod swap_in;
pub mod swap_out;
pub mod timeout;

pub use data::{Chain, SwapData, SwapRecord, SwapRole, SwapSummary, SwapType};
pub use error::{FsmError, MessageError, RequestRejection, SwapError};
pub use id::SwapId;
pub use messages::{MessageType, PeerMessage};
pub use states::{EventType, StateType};

/// Version of the peer protocol spoken by this crate. Requests and
/// agreements carrying another version are refused.
pub const PROTOCOL_VERSION: u64 = 5;

//! The per-swap state machine engine.
//!
//! A machine is a table of states, each binding one [`Action`] and the
//! events that leave it. Delivering an event moves the machine to the
//! target state and runs that state's action; the event the action returns
//! is fed back into the same loop until an action yields `NoOp` (wait for
//! the outside world) or `Done` (terminal). The record is persisted after
//! every transition and after every action, so [`StateMachine::recover`]
//! can resume a swap from its last stored state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::data::{SwapData, SwapRecord, SwapRole, SwapType};
use super::error::FsmError;
use super::id::SwapId;
use super::messages::PeerMessage;
use super::services::SwapServices;
use super::states::{EventType, StateType};
use super::{swap_in, swap_out};

/// The unit of work bound to a state. Actions report their outcome only
/// through the returned event and must tolerate running again in the same
/// state.
#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(&self, services: &SwapServices, swap: &mut SwapData) -> EventType;
}

pub struct State {
    pub action: Arc<dyn Action>,
    pub events: HashMap<EventType, StateType>,
    /// Recovering into this state fails the swap instead of re-running the
    /// action.
    pub fail_on_recover: bool,
}

impl State {
    pub fn new(action: impl Action + 'static) -> Self {
        Self {
            action: Arc::new(action),
            events: HashMap::new(),
            fail_on_recover: false,
        }
    }

    pub fn on(mut self, event: EventType, target: StateType) -> Self {
        self.events.insert(event, target);
        self
    }

    pub fn fail_on_recover(mut self) -> Self {
        self.fail_on_recover = true;
        self
    }
}

pub type States = HashMap<StateType, State>;

/// The transition table of a role.
pub fn role_states(swap_type: SwapType, role: SwapRole) -> States {
    match (swap_type, role) {
        (SwapType::SwapOut, SwapRole::Sender) => swap_out::sender_states(),
        (SwapType::SwapOut, SwapRole::Receiver) => swap_out::receiver_states(),
        (SwapType::SwapIn, SwapRole::Sender) => swap_in::sender_states(),
        (SwapType::SwapIn, SwapRole::Receiver) => swap_in::receiver_states(),
    }
}

/// Data arriving together with an event.
#[derive(Debug, Clone)]
pub enum EventContext {
    Message(PeerMessage),
    OpeningTxConfirmed { tx_hex: String },
}

impl EventContext {
    fn validate(&self, data: &SwapData) -> anyhow::Result<()> {
        match self {
            EventContext::Message(msg) => msg.validate_for_swap(data),
            EventContext::OpeningTxConfirmed { tx_hex } => {
                anyhow::ensure!(!tx_hex.is_empty(), "confirmed opening tx is empty");
                Ok(())
            }
        }
    }

    fn apply(self, data: &mut SwapData) {
        match self {
            EventContext::Message(msg) => msg.apply(data),
            EventContext::OpeningTxConfirmed { tx_hex } => data.opening_tx_hex = Some(tx_hex),
        }
    }
}

/// Where a delivery left the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A terminal action ran.
    Finished,
    /// Waiting for a message, callback or timer.
    Awaiting,
    /// Stopped after too many consecutive retries. Only `recover` moves the
    /// swap on.
    Parked,
}

pub struct StateMachine {
    swap_id: SwapId,
    swap_type: SwapType,
    role: SwapRole,
    previous: StateType,
    current: StateType,
    data: SwapData,
    states: States,
    services: Arc<SwapServices>,
    retries: u32,
}

impl StateMachine {
    pub fn new(data: SwapData, services: Arc<SwapServices>) -> Self {
        Self {
            swap_id: data.id,
            swap_type: data.swap_type,
            role: data.role,
            previous: StateType::Default,
            current: StateType::Default,
            states: role_states(data.swap_type, data.role),
            data,
            services,
            retries: 0,
        }
    }

    pub fn from_record(record: SwapRecord, services: Arc<SwapServices>) -> Self {
        Self {
            swap_id: record.swap_id,
            swap_type: record.swap_type,
            role: record.role,
            previous: record.previous,
            current: record.current,
            states: role_states(record.swap_type, record.role),
            data: record.data,
            services,
            retries: 0,
        }
    }

    pub fn swap_id(&self) -> SwapId {
        self.swap_id
    }

    pub fn current(&self) -> StateType {
        self.current
    }

    pub fn previous(&self) -> StateType {
        self.previous
    }

    pub fn data(&self) -> &SwapData {
        &self.data
    }

    /// Records a failure on the swap data ahead of the event it causes.
    pub fn handle_error(&mut self, err: impl std::fmt::Display) {
        self.data.handle_error(err);
    }

    pub fn record(&self) -> SwapRecord {
        SwapRecord {
            swap_id: self.swap_id,
            swap_type: self.swap_type,
            role: self.role,
            previous: self.previous,
            current: self.current,
            data: self.data.clone(),
        }
    }

    pub async fn send_event(
        &mut self,
        event: EventType,
        context: Option<EventContext>,
    ) -> Result<Progress, FsmError> {
        self.retries = 0;
        self.target(event)?;

        let mut event = event;
        if let Some(context) = context {
            match context.validate(&self.data) {
                Ok(()) => context.apply(&mut self.data),
                Err(err) => {
                    self.target(EventType::OnInvalidMessage)?;
                    tracing::debug!(
                        swap_id = %self.swap_id,
                        rejected = %event,
                        error = %err,
                        "invalid message"
                    );
                    self.data.handle_error(format!("{err:#}"));
                    event = EventType::OnInvalidMessage;
                }
            }
        }

        if event == EventType::OnTimeout {
            self.data
                .handle_error(format!("timed out waiting for peer in state {}", self.current));
        } else {
            self.services.timeouts.cancel(&self.swap_id);
        }

        self.run(event).await
    }

    /// Resumes the swap in its current state after a restart or a park.
    pub async fn recover(&mut self) -> Result<Progress, FsmError> {
        self.retries = 0;
        let state = self.state(self.current)?;
        if state.fail_on_recover {
            self.data
                .handle_error(format!("swap interrupted in state {}", self.current));
            return self.send_event(EventType::ActionFailed, None).await;
        }

        tracing::info!(swap_id = %self.swap_id, state = %self.current, "recovering swap");
        let action = Arc::clone(&state.action);
        let event = action.execute(&self.services, &mut self.data).await;
        self.persist()?;

        match event {
            EventType::NoOp => Ok(Progress::Awaiting),
            EventType::Done => Ok(Progress::Finished),
            event => self.send_event(event, None).await,
        }
    }

    async fn run(&mut self, mut event: EventType) -> Result<Progress, FsmError> {
        loop {
            if event == EventType::OnRetry {
                self.retries += 1;
                if self.retries > self.services.config.max_retries {
                    tracing::warn!(
                        swap_id = %self.swap_id,
                        state = %self.current,
                        retries = self.retries - 1,
                        "retry limit reached, parking swap"
                    );
                    self.data.last_err = Some(format!("retry limit reached in {}", self.current));
                    self.persist()?;
                    return Ok(Progress::Parked);
                }
            }

            let next = self.target(event)?;
            tracing::debug!(
                swap_id = %self.swap_id,
                from = %self.current,
                to = %next,
                event = %event,
                "transition"
            );
            self.previous = self.current;
            self.current = next;
            self.persist()?;

            let action = Arc::clone(&self.state(next)?.action);
            event = action.execute(&self.services, &mut self.data).await;
            self.persist()?;

            match event {
                EventType::Done => {
                    tracing::info!(swap_id = %self.swap_id, state = %self.current, "swap finished");
                    return Ok(Progress::Finished);
                }
                EventType::NoOp => {
                    tracing::info!(swap_id = %self.swap_id, state = %self.current, "swap awaiting");
                    return Ok(Progress::Awaiting);
                }
                _ => {}
            }
        }
    }

    fn state(&self, state: StateType) -> Result<&State, FsmError> {
        self.states.get(&state).ok_or(FsmError::Config(state))
    }

    fn target(&self, event: EventType) -> Result<StateType, FsmError> {
        self.state(self.current)?
            .events
            .get(&event)
            .copied()
            .ok_or(FsmError::EventRejected {
                state: self.current,
                event,
            })
    }

    fn persist(&self) -> Result<(), FsmError> {
        self.services.store.update_data(&self.record()).map_err(|err| {
            tracing::error!(swap_id = %self.swap_id, error = %err, "persist swap failed");
            FsmError::Persist(self.swap_id, err)
        })
    }
}

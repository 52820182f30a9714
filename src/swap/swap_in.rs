//! Swap-in role tables: the sender locks on-chain funds and is paid back
//! through its channel by the receiver.

use super::actions::{
    AwaitTxConfirmationAction, CheckRequestWrapperAction, CreateAndBroadcastOpeningTransaction,
    CreateSwapRequestAction, NoOpAction, SendMessageAction, SetBlindingKeyWrapperAction,
    SetStartingBlockHeightAction, StopResendWrapperAction, SwapInReceiverInitAction,
};
use super::fsm::{State, States};
use super::states::{EventType as E, StateType as S};
use super::swap_out::{common_states, maker_states, taker_states};

pub fn sender_states() -> States {
    let mut states = States::new();
    states.insert(
        S::Default,
        State::new(NoOpAction).on(E::OnSwapInStarted, S::SwapInSenderCreateSwap),
    );
    states.insert(
        S::SwapInSenderCreateSwap,
        State::new(CreateSwapRequestAction)
            .on(E::ActionSucceeded, S::SwapInSenderSendRequest)
            .on(E::ActionFailed, S::SwapCanceled)
            .fail_on_recover(),
    );
    states.insert(
        S::SwapInSenderSendRequest,
        State::new(SendMessageAction)
            .on(E::ActionSucceeded, S::SwapInSenderAwaitAgreement)
            .on(E::ActionFailed, S::SwapCanceled)
            .fail_on_recover(),
    );
    states.insert(
        S::SwapInSenderAwaitAgreement,
        State::new(NoOpAction)
            .on(E::OnAgreementReceived, S::SwapInSenderBroadcastOpeningTx)
            .on(E::OnCancelReceived, S::SwapCanceled)
            .on(E::OnTimeout, S::SendCancel)
            .on(E::OnInvalidMessage, S::SendCancel)
            .on(E::ActionFailed, S::SendCancel)
            .fail_on_recover(),
    );
    states.insert(
        S::SwapInSenderBroadcastOpeningTx,
        State::new(SetBlindingKeyWrapperAction::new(
            CreateAndBroadcastOpeningTransaction,
        ))
        .on(E::ActionSucceeded, S::SwapInSenderSendTxBroadcastedMessage)
        .on(E::ActionFailed, S::SendCancel),
    );
    maker_states(
        &mut states,
        S::SwapInSenderSendTxBroadcastedMessage,
        S::SwapInSenderAwaitClaimPayment,
    );
    common_states(&mut states);
    states
}

pub fn receiver_states() -> States {
    let mut states = States::new();
    states.insert(
        S::Default,
        State::new(NoOpAction)
            .on(E::OnSwapInRequestReceived, S::SwapInReceiverCreateSwap)
            .on(E::OnInvalidMessage, S::SendCancel),
    );
    states.insert(
        S::SwapInReceiverCreateSwap,
        State::new(CheckRequestWrapperAction::new(SwapInReceiverInitAction))
            .on(E::ActionSucceeded, S::SwapInReceiverSendAgreement)
            .on(E::ActionFailed, S::SendCancel)
            .fail_on_recover(),
    );
    states.insert(
        S::SwapInReceiverSendAgreement,
        State::new(SendMessageAction)
            .on(E::ActionSucceeded, S::SwapInReceiverAwaitTxBroadcastedMessage)
            .on(E::ActionFailed, S::SendCancel),
    );
    states.insert(
        S::SwapInReceiverAwaitTxBroadcastedMessage,
        State::new(SetStartingBlockHeightAction)
            .on(E::OnTxOpenedMessage, S::SwapInReceiverAwaitTxConfirmation)
            .on(E::OnCancelReceived, S::SwapCanceled)
            // The maker may have broadcast already; handing over our key
            // lets it reclaim without waiting out the CSV window.
            .on(E::OnTimeout, S::SendPrivkey)
            .on(E::OnInvalidMessage, S::SendCancel)
            .on(E::ActionFailed, S::SendCancel),
    );
    states.insert(
        S::SwapInReceiverAwaitTxConfirmation,
        State::new(StopResendWrapperAction::new(AwaitTxConfirmationAction))
            .on(E::OnTxConfirmed, S::SwapInReceiverValidateTxAndPayClaimInvoice)
            .on(E::OnCancelReceived, S::SendPrivkey)
            .on(E::ActionFailed, S::SendPrivkey),
    );
    taker_states(
        &mut states,
        S::SwapInReceiverValidateTxAndPayClaimInvoice,
        S::SwapInReceiverClaimSwap,
    );
    common_states(&mut states);
    states
}

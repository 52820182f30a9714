//! Swap-out role tables: the sender trades channel balance for on-chain
//! funds that the receiver locks up.

use super::actions::{
    AddSuspiciousPeerAction, AwaitCsvAction, AwaitTxConfirmationAction, CancelAction,
    CheckRequestWrapperAction, ClaimSwapTransactionCoop, ClaimSwapTransactionWithCsv,
    ClaimSwapTransactionWithPreimageAction, CreateAndBroadcastOpeningTransaction,
    CreateSwapOutFromRequestAction, CreateSwapRequestAction, NoOpAction, NoOpDoneAction,
    PayFeeInvoiceAction, SendCancelAction, SendMessageAction, SendMessageWithRetryAction,
    SetBlindingKeyWrapperAction, SetStartingBlockHeightAction, StopResendWrapperAction,
    TakerSendPrivkeyAction, ValidateTxAndPayClaimInvoiceAction,
};
use super::fsm::{State, States};
use super::states::{EventType as E, StateType as S};

/// States every role ends in: cancel and the preimage and coop claims.
pub(super) fn common_states(states: &mut States) {
    states.insert(
        S::SendCancel,
        State::new(SendCancelAction)
            .on(E::ActionSucceeded, S::SwapCanceled)
            .on(E::ActionFailed, S::SwapCanceled),
    );
    states.insert(S::SwapCanceled, State::new(CancelAction));
    states.insert(S::ClaimedPreimage, State::new(NoOpDoneAction));
    states.insert(S::ClaimedCoop, State::new(NoOpDoneAction));
}

/// The taker's path once paying the claim invoice is off: validate and pay,
/// claim with the preimage, or hand over the private key.
pub(super) fn taker_states(states: &mut States, validate_and_pay: S, claim: S) {
    states.insert(
        validate_and_pay,
        State::new(ValidateTxAndPayClaimInvoiceAction)
            .on(E::ActionSucceeded, claim)
            .on(E::ActionFailed, S::SendPrivkey),
    );
    states.insert(
        claim,
        State::new(ClaimSwapTransactionWithPreimageAction)
            .on(E::ActionSucceeded, S::ClaimedPreimage)
            .on(E::OnRetry, claim),
    );
    states.insert(
        S::SendPrivkey,
        State::new(TakerSendPrivkeyAction)
            .on(E::ActionSucceeded, S::SendCoopClose)
            .on(E::ActionFailed, S::SendCancel),
    );
    states.insert(
        S::SendCoopClose,
        State::new(SendMessageAction)
            .on(E::ActionSucceeded, S::ClaimedCoop)
            .on(E::ActionFailed, S::SendCancel),
    );
}

/// The maker's path from the broadcast message on: wait for the claim
/// payment, or reclaim the output cooperatively or after CSV maturity.
pub(super) fn maker_states(states: &mut States, send_broadcasted: S, await_payment: S) {
    states.insert(
        send_broadcasted,
        State::new(SendMessageWithRetryAction)
            .on(E::ActionSucceeded, await_payment)
            .on(E::ActionFailed, S::WaitCsv),
    );
    states.insert(
        await_payment,
        State::new(AwaitCsvAction)
            .on(E::OnClaimInvoicePaid, S::ClaimedPreimage)
            .on(E::OnCancelReceived, S::WaitCsv)
            .on(E::OnInvalidMessage, S::WaitCsv)
            .on(E::OnCoopCloseReceived, S::ClaimSwapCoop)
            .on(E::OnCsvPassed, S::ClaimSwapCsv),
    );
    states.insert(
        S::WaitCsv,
        State::new(StopResendWrapperAction::new(AwaitCsvAction))
            .on(E::OnCsvPassed, S::ClaimSwapCsv)
            .on(E::OnCoopCloseReceived, S::ClaimSwapCoop),
    );
    states.insert(
        S::ClaimSwapCoop,
        State::new(StopResendWrapperAction::new(ClaimSwapTransactionCoop))
            .on(E::ActionSucceeded, S::ClaimedCoop)
            .on(E::ActionFailed, S::WaitCsv),
    );
    states.insert(
        S::ClaimSwapCsv,
        State::new(StopResendWrapperAction::new(ClaimSwapTransactionWithCsv))
            .on(E::ActionSucceeded, S::ClaimedCsv)
            .on(E::OnRetry, S::ClaimSwapCsv),
    );
    states.insert(
        S::ClaimedCsv,
        State::new(AddSuspiciousPeerAction::new(NoOpDoneAction)),
    );
}

pub fn sender_states() -> States {
    let mut states = States::new();
    states.insert(
        S::Default,
        State::new(NoOpAction).on(E::OnSwapOutStarted, S::SwapOutSenderCreateSwap),
    );
    states.insert(
        S::SwapOutSenderCreateSwap,
        State::new(CreateSwapRequestAction)
            .on(E::ActionSucceeded, S::SwapOutSenderSendRequest)
            .on(E::ActionFailed, S::SwapCanceled)
            .fail_on_recover(),
    );
    states.insert(
        S::SwapOutSenderSendRequest,
        State::new(SendMessageAction)
            .on(E::ActionSucceeded, S::SwapOutSenderAwaitAgreement)
            .on(E::ActionFailed, S::SwapCanceled)
            .fail_on_recover(),
    );
    states.insert(
        S::SwapOutSenderAwaitAgreement,
        State::new(NoOpAction)
            .on(E::OnFeeInvoiceReceived, S::SwapOutSenderPayFeeInvoice)
            .on(E::OnCancelReceived, S::SwapCanceled)
            .on(E::OnTimeout, S::SendCancel)
            .on(E::OnInvalidMessage, S::SendCancel)
            .on(E::ActionFailed, S::SendCancel)
            .fail_on_recover(),
    );
    states.insert(
        S::SwapOutSenderPayFeeInvoice,
        State::new(PayFeeInvoiceAction)
            .on(E::ActionSucceeded, S::SwapOutSenderAwaitTxBroadcastedMessage)
            .on(E::ActionFailed, S::SendCancel),
    );
    states.insert(
        S::SwapOutSenderAwaitTxBroadcastedMessage,
        State::new(SetStartingBlockHeightAction)
            .on(E::OnTxOpenedMessage, S::SwapOutSenderAwaitTxConfirmation)
            .on(E::OnCancelReceived, S::SwapCanceled)
            .on(E::OnInvalidMessage, S::SendCancel)
            .on(E::ActionFailed, S::SendPrivkey),
    );
    states.insert(
        S::SwapOutSenderAwaitTxConfirmation,
        State::new(AwaitTxConfirmationAction)
            .on(E::OnTxConfirmed, S::SwapOutSenderValidateTxAndPayClaimInvoice)
            .on(E::OnCancelReceived, S::SendPrivkey)
            .on(E::ActionFailed, S::SendPrivkey),
    );
    taker_states(
        &mut states,
        S::SwapOutSenderValidateTxAndPayClaimInvoice,
        S::SwapOutSenderClaimSwap,
    );
    common_states(&mut states);
    states
}

pub fn receiver_states() -> States {
    let mut states = States::new();
    states.insert(
        S::Default,
        State::new(NoOpAction)
            .on(E::OnSwapOutRequestReceived, S::SwapOutReceiverCreateSwap)
            .on(E::OnInvalidMessage, S::SendCancel),
    );
    states.insert(
        S::SwapOutReceiverCreateSwap,
        State::new(CheckRequestWrapperAction::new(
            SetBlindingKeyWrapperAction::new(CreateSwapOutFromRequestAction),
        ))
        .on(E::ActionSucceeded, S::SwapOutReceiverSendFeeInvoice)
        .on(E::ActionFailed, S::SendCancel)
        .fail_on_recover(),
    );
    states.insert(
        S::SwapOutReceiverSendFeeInvoice,
        State::new(SendMessageAction)
            .on(E::ActionSucceeded, S::SwapOutReceiverAwaitFeeInvoicePayment)
            .on(E::ActionFailed, S::SendCancel),
    );
    states.insert(
        S::SwapOutReceiverAwaitFeeInvoicePayment,
        State::new(NoOpAction)
            .on(E::OnFeeInvoicePaid, S::SwapOutReceiverBroadcastOpeningTx)
            .on(E::OnCancelReceived, S::SwapCanceled)
            .on(E::OnTimeout, S::SendCancel)
            .on(E::ActionFailed, S::SendCancel)
            .fail_on_recover(),
    );
    states.insert(
        S::SwapOutReceiverBroadcastOpeningTx,
        State::new(CreateAndBroadcastOpeningTransaction)
            .on(E::ActionSucceeded, S::SwapOutReceiverSendTxBroadcastedMessage)
            .on(E::ActionFailed, S::SendCancel),
    );
    maker_states(
        &mut states,
        S::SwapOutReceiverSendTxBroadcastedMessage,
        S::SwapOutReceiverAwaitClaimInvoicePayment,
    );
    common_states(&mut states);
    states
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! named_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($variant:ident => $text:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> anyhow::Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => anyhow::bail!(concat!("unknown ", stringify!($name), ": {}"), other),
                }
            }
        }
    };
}

named_enum! {
    /// Every state of the four role tables. Fallback and terminal states are
    /// shared between roles.
    pub enum StateType {
        Default => "default",

        SendCancel => "send_cancel",
        SwapCanceled => "swap_canceled",
        WaitCsv => "wait_csv",
        ClaimSwapCsv => "claim_swap_csv",
        ClaimSwapCoop => "claim_swap_coop",
        SendPrivkey => "send_privkey",
        SendCoopClose => "send_coop_close",
        ClaimedPreimage => "claimed_preimage",
        ClaimedCsv => "claimed_csv",
        ClaimedCoop => "claimed_coop",

        SwapOutSenderCreateSwap => "swap_out_sender_create_swap",
        SwapOutSenderSendRequest => "swap_out_sender_send_request",
        SwapOutSenderAwaitAgreement => "swap_out_sender_await_agreement",
        SwapOutSenderPayFeeInvoice => "swap_out_sender_pay_fee_invoice",
        SwapOutSenderAwaitTxBroadcastedMessage => "swap_out_sender_await_tx_broadcasted_message",
        SwapOutSenderAwaitTxConfirmation => "swap_out_sender_await_tx_confirmation",
        SwapOutSenderValidateTxAndPayClaimInvoice => "swap_out_sender_validate_tx_and_pay_claim_invoice",
        SwapOutSenderClaimSwap => "swap_out_sender_claim_swap",

        SwapOutReceiverCreateSwap => "swap_out_receiver_create_swap",
        SwapOutReceiverSendFeeInvoice => "swap_out_receiver_send_fee_invoice",
        SwapOutReceiverAwaitFeeInvoicePayment => "swap_out_receiver_await_fee_invoice_payment",
        SwapOutReceiverBroadcastOpeningTx => "swap_out_receiver_broadcast_opening_tx",
        SwapOutReceiverSendTxBroadcastedMessage => "swap_out_receiver_send_tx_broadcasted_message",
        SwapOutReceiverAwaitClaimInvoicePayment => "swap_out_receiver_await_claim_invoice_payment",

        SwapInSenderCreateSwap => "swap_in_sender_create_swap",
        SwapInSenderSendRequest => "swap_in_sender_send_request",
        SwapInSenderAwaitAgreement => "swap_in_sender_await_agreement",
        SwapInSenderBroadcastOpeningTx => "swap_in_sender_broadcast_opening_tx",
        SwapInSenderSendTxBroadcastedMessage => "swap_in_sender_send_tx_broadcasted_message",
        SwapInSenderAwaitClaimPayment => "swap_in_sender_await_claim_payment",

        SwapInReceiverCreateSwap => "swap_in_receiver_create_swap",
        SwapInReceiverSendAgreement => "swap_in_receiver_send_agreement",
        SwapInReceiverAwaitTxBroadcastedMessage => "swap_in_receiver_await_tx_broadcasted_message",
        SwapInReceiverAwaitTxConfirmation => "swap_in_receiver_await_tx_confirmation",
        SwapInReceiverValidateTxAndPayClaimInvoice => "swap_in_receiver_validate_tx_and_pay_claim_invoice",
        SwapInReceiverClaimSwap => "swap_in_receiver_claim_swap",
    }
}

impl StateType {
    /// Claimed or canceled: the swap's record no longer changes.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StateType::ClaimedPreimage
                | StateType::ClaimedCsv
                | StateType::ClaimedCoop
                | StateType::SwapCanceled
        )
    }
}

impl Default for StateType {
    fn default() -> Self {
        StateType::Default
    }
}

named_enum! {
    pub enum EventType {
        OnSwapOutStarted => "on_swap_out_started",
        OnSwapInStarted => "on_swap_in_started",
        OnSwapOutRequestReceived => "on_swap_out_request_received",
        OnSwapInRequestReceived => "on_swap_in_request_received",
        OnFeeInvoiceReceived => "on_fee_invoice_received",
        OnAgreementReceived => "on_agreement_received",
        OnFeeInvoicePaid => "on_fee_invoice_paid",
        OnTxOpenedMessage => "on_tx_opened_message",
        OnTxConfirmed => "on_tx_confirmed",
        OnClaimInvoicePaid => "on_claim_invoice_paid",
        OnCancelReceived => "on_cancel_received",
        OnCoopCloseReceived => "on_coop_close_received",
        OnCsvPassed => "on_csv_passed",
        OnTimeout => "on_timeout",
        OnInvalidMessage => "on_invalid_message",
        ActionSucceeded => "action_succeeded",
        ActionFailed => "action_failed",
        OnRetry => "on_retry",
        Done => "done",
        NoOp => "no_op",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_and_are_unique() -> anyhow::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for state in StateType::ALL {
            assert!(seen.insert(state.as_str()), "duplicate name {state}");
            assert_eq!(state.as_str().parse::<StateType>()?, *state);
        }
        assert_eq!(
            serde_json::to_string(&StateType::ClaimedCoop)?,
            "\"claimed_coop\""
        );
        assert!("nope".parse::<EventType>().is_err());
        Ok(())
    }
}

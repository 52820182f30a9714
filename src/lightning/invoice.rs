use anyhow::Result;
use bitcoin::hashes::Hash as _;
use lightning_invoice::Bolt11Invoice;
use std::str::FromStr as _;

/// The fields of a BOLT11 invoice the swap engine checks before paying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPayreq {
    pub payment_hash: String,
    pub amount_msat: u64,
    pub min_final_cltv_expiry_delta: u64,
    pub expiry_secs: u64,
}

fn parse_bolt11(invoice: &str) -> Result<Bolt11Invoice> {
    Bolt11Invoice::from_str(invoice).map_err(|e| anyhow::anyhow!("parse BOLT11 invoice: {e:?}"))
}

/// Decodes a payreq. Swap invoices always carry an amount, so an
/// amountless invoice is an error.
pub fn decode_bolt11(invoice: &str) -> Result<DecodedPayreq> {
    let invoice = parse_bolt11(invoice)?;
    let amount_msat = invoice
        .amount_milli_satoshis()
        .ok_or_else(|| anyhow::anyhow!("BOLT11 invoice has no amount"))?;

    Ok(DecodedPayreq {
        payment_hash: hex::encode(invoice.payment_hash().to_byte_array()),
        amount_msat,
        min_final_cltv_expiry_delta: invoice.min_final_cltv_expiry_delta(),
        expiry_secs: invoice.expiry_time().as_secs(),
    })
}

pub mod invoice;
pub mod preimage;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::swap::SwapId;

/// What a swap invoice pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceType {
    /// Compensates the maker for the opening transaction fee.
    Fee,
    /// Releases the preimage that unlocks the opening output.
    Claim,
}

impl InvoiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceType::Fee => "fee",
            InvoiceType::Claim => "claim",
        }
    }
}

impl fmt::Display for InvoiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invoice label binding a payment notification back to its swap,
/// rendered as `fee_<swap id>` or `claim_<swap id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvoiceLabel {
    pub invoice_type: InvoiceType,
    pub swap_id: SwapId,
}

impl InvoiceLabel {
    pub fn new(invoice_type: InvoiceType, swap_id: SwapId) -> Self {
        Self {
            invoice_type,
            swap_id,
        }
    }
}

impl fmt::Display for InvoiceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.invoice_type, self.swap_id)
    }
}

impl FromStr for InvoiceLabel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (kind, id) = s
            .split_once('_')
            .ok_or_else(|| anyhow::anyhow!("invoice label without separator: {s}"))?;
        let invoice_type = match kind {
            "fee" => InvoiceType::Fee,
            "claim" => InvoiceType::Claim,
            other => anyhow::bail!("unknown invoice label kind: {other}"),
        };
        let swap_id = id
            .parse()
            .map_err(|e| anyhow::anyhow!("invoice label swap id: {e}"))?;
        Ok(Self {
            invoice_type,
            swap_id,
        })
    }
}

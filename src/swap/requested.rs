//! Audit log of swap requests the gate turned down.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::data::SwapType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedSwap {
    /// `btc`, `lbtc`, or the raw tags when the request named no valid chain.
    pub asset: String,
    pub amount_msat: u64,
    pub swap_type: SwapType,
    pub rejection_reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedSwapTotal {
    pub amount_msat: u64,
    pub n_requests: u64,
}

/// node id -> swap type -> asset -> totals.
pub type RequestedSwapsSummary =
    BTreeMap<String, BTreeMap<SwapType, BTreeMap<String, RequestedSwapTotal>>>;

pub fn aggregate(entries: &BTreeMap<String, Vec<RequestedSwap>>) -> RequestedSwapsSummary {
    let mut out = RequestedSwapsSummary::new();
    for (node, requests) in entries {
        let per_node = out.entry(node.clone()).or_default();
        for request in requests {
            let total = per_node
                .entry(request.swap_type)
                .or_default()
                .entry(request.asset.clone())
                .or_default();
            total.amount_msat = total.amount_msat.saturating_add(request.amount_msat);
            total.n_requests += 1;
        }
    }
    out
}

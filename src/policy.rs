//! The in-process admission and premium policy.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};

use crate::swap::services::Policy;
use crate::swap::{Chain, SwapType};

const PPM_PARTS: u64 = 1_000_000;

/// Premium rates in parts per million of the swap amount.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PremiumRates {
    pub btc_swap_in_ppm: u64,
    pub btc_swap_out_ppm: u64,
    pub lbtc_swap_in_ppm: u64,
    pub lbtc_swap_out_ppm: u64,
}

impl PremiumRates {
    pub fn rate_ppm(&self, swap_type: SwapType, chain: Chain) -> u64 {
        match (chain, swap_type) {
            (Chain::Bitcoin, SwapType::SwapIn) => self.btc_swap_in_ppm,
            (Chain::Bitcoin, SwapType::SwapOut) => self.btc_swap_out_ppm,
            (Chain::Liquid, SwapType::SwapIn) => self.lbtc_swap_in_ppm,
            (Chain::Liquid, SwapType::SwapOut) => self.lbtc_swap_out_ppm,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Skip the allow-list and take requests from any peer.
    pub accept_all_peers: bool,
    pub allowlisted_peers: Vec<String>,
    pub suspicious_peers: Vec<String>,
    pub min_swap_amount_msat: u64,
    pub allow_new_swaps: bool,
    pub premium: PremiumRates,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            accept_all_peers: false,
            allowlisted_peers: Vec::new(),
            suspicious_peers: Vec::new(),
            min_swap_amount_msat: 100_000,
            allow_new_swaps: true,
            premium: PremiumRates::default(),
        }
    }
}

impl PolicyConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read policy {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse policy {}", path.display()))
    }
}

pub struct BasicPolicy {
    accept_all_peers: bool,
    allowlisted: HashSet<String>,
    suspicious: RwLock<HashSet<String>>,
    min_swap_amount_msat: u64,
    allow_new_swaps: AtomicBool,
    premium: PremiumRates,
}

impl BasicPolicy {
    pub fn new(cfg: PolicyConfig) -> Self {
        Self {
            accept_all_peers: cfg.accept_all_peers,
            allowlisted: cfg.allowlisted_peers.into_iter().collect(),
            suspicious: RwLock::new(cfg.suspicious_peers.into_iter().collect()),
            min_swap_amount_msat: cfg.min_swap_amount_msat,
            allow_new_swaps: AtomicBool::new(cfg.allow_new_swaps),
            premium: cfg.premium,
        }
    }

    pub fn set_allow_new_swaps(&self, allow: bool) {
        self.allow_new_swaps.store(allow, Ordering::Relaxed);
    }

    pub fn suspicious_peers(&self) -> Vec<String> {
        let set = self.suspicious.read().unwrap_or_else(PoisonError::into_inner);
        let mut peers: Vec<String> = set.iter().cloned().collect();
        peers.sort();
        peers
    }
}

impl Policy for BasicPolicy {
    fn new_swaps_allowed(&self) -> bool {
        self.allow_new_swaps.load(Ordering::Relaxed)
    }

    fn is_peer_allowed(&self, peer_id: &str) -> bool {
        self.accept_all_peers || self.allowlisted.contains(peer_id)
    }

    fn is_peer_suspicious(&self, peer_id: &str) -> bool {
        self.suspicious
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(peer_id)
    }

    fn add_to_suspicious_peer_list(&self, peer_id: &str) -> Result<()> {
        let inserted = self
            .suspicious
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer_id.to_string());
        if inserted {
            tracing::info!(peer = %peer_id, "peer marked suspicious");
        }
        Ok(())
    }

    fn min_swap_amount_msat(&self) -> u64 {
        self.min_swap_amount_msat
    }

    fn premium_sat(&self, swap_type: SwapType, chain: Chain, amount_sat: u64) -> u64 {
        let rate = self.premium.rate_ppm(swap_type, chain);
        let premium = u128::from(amount_sat) * u128::from(rate) / u128::from(PPM_PARTS);
        u64::try_from(premium).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_and_suspicious_peers() -> Result<()> {
        let policy = BasicPolicy::new(PolicyConfig {
            allowlisted_peers: vec!["alice".into()],
            ..PolicyConfig::default()
        });
        assert!(policy.is_peer_allowed("alice"));
        assert!(!policy.is_peer_allowed("bob"));

        policy.add_to_suspicious_peer_list("alice")?;
        policy.add_to_suspicious_peer_list("alice")?;
        assert!(policy.is_peer_suspicious("alice"));
        assert_eq!(policy.suspicious_peers(), vec!["alice".to_string()]);
        Ok(())
    }

    #[test]
    fn premium_is_parts_per_million() {
        let policy = BasicPolicy::new(PolicyConfig {
            premium: PremiumRates {
                btc_swap_out_ppm: 2_000,
                ..PremiumRates::default()
            },
            ..PolicyConfig::default()
        });
        assert_eq!(policy.premium_sat(SwapType::SwapOut, Chain::Bitcoin, 1_000_000), 2_000);
        assert_eq!(policy.premium_sat(SwapType::SwapIn, Chain::Bitcoin, 1_000_000), 0);
        assert_eq!(policy.premium_sat(SwapType::SwapOut, Chain::Liquid, 1_000_000), 0);
    }

    #[test]
    fn partial_config_keeps_defaults() -> Result<()> {
        let cfg: PolicyConfig = serde_json::from_str(r#"{"accept_all_peers": true}"#)?;
        assert!(cfg.accept_all_peers);
        assert!(cfg.allow_new_swaps);
        assert_eq!(cfg.min_swap_amount_msat, 100_000);
        Ok(())
    }
}

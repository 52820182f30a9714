use anyhow::{Context as _, Result};
use assert_cmd::Command;
use predicates::prelude::*;

use peer_swap::swap::requested::RequestedSwap;
use peer_swap::swap::services::{RequestedSwapsStore as _, SwapStore as _};
use peer_swap::swap::store::SqliteSwapStore;
use peer_swap::swap::{StateType, SwapData, SwapId, SwapRecord, SwapRole, SwapType};

fn swap_store() -> Result<Command> {
    Command::cargo_bin("swap_store").context("locate swap_store binary")
}

#[test]
fn lists_and_gets_stored_swaps() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    let path = dir.path().join("swaps.sqlite3");
    let store = SqliteSwapStore::open(path.clone()).context("open sqlite store")?;

    let swap_id = SwapId::from_bytes([7; 32]);
    let mut data = SwapData::new(swap_id, SwapType::SwapIn, SwapRole::Receiver, "peer-a", "peer-a");
    data.cancel_message = "peer not allowed to request swaps".to_string();
    store.update_data(&SwapRecord {
        swap_id,
        swap_type: SwapType::SwapIn,
        role: SwapRole::Receiver,
        previous: StateType::SendCancel,
        current: StateType::SwapCanceled,
        data,
    })?;
    store.add(
        "peer-a",
        RequestedSwap {
            asset: "btc".to_string(),
            amount_msat: 5_000,
            swap_type: SwapType::SwapIn,
            rejection_reason: "peer not allowed to request swaps".to_string(),
        },
    )?;
    drop(store);

    swap_store()?
        .arg("--store-path")
        .arg(&path)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains(swap_id.to_string()))
        .stdout(predicate::str::contains("swap_canceled"));

    swap_store()?
        .arg("--store-path")
        .arg(&path)
        .args(["list-by-peer", "--peer", "someone-else"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));

    swap_store()?
        .arg("--store-path")
        .arg(&path)
        .args(["get", "--swap-id", &swap_id.to_string()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"previous_state\": \"send_cancel\""))
        .stdout(predicate::str::contains("peer not allowed to request swaps"));

    swap_store()?
        .arg("--store-path")
        .arg(&path)
        .arg("requested")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"n_requests\": 1"));

    Ok(())
}

#[test]
fn missing_store_is_an_error() -> Result<()> {
    let dir = tempfile::tempdir().context("create tempdir")?;
    swap_store()?
        .arg("--store-path")
        .arg(dir.path().join("absent.sqlite3"))
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("swap store not found"));
    Ok(())
}

#[test]
fn prints_role_diagram() -> Result<()> {
    swap_store()?
        .args(["diagram", "--fsm", "swap_out_sender"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("stateDiagram-v2"))
        .stdout(predicate::str::contains(
            "swap_out_sender_await_agreement --> send_cancel: on_timeout",
        ))
        .stdout(predicate::str::contains("claimed_coop --> [*]"));
    Ok(())
}

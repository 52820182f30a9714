use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser as _, Subcommand, ValueEnum};
use peer_swap::swap::fsm::role_states;
use peer_swap::swap::requested::aggregate;
use peer_swap::swap::services::{RequestedSwapsStore as _, SwapStore as _};
use peer_swap::swap::store::SqliteSwapStore;
use peer_swap::swap::{StateType, SwapId, SwapRecord, SwapRole, SwapType};
use serde_json::json;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long)]
    store_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    List,
    ListByPeer {
        #[arg(long)]
        peer: String,
    },
    Get {
        #[arg(long)]
        swap_id: String,
    },
    Requested,
    /// Prints a role's transition table as a Mermaid state diagram.
    Diagram {
        #[arg(long)]
        fsm: Fsm,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Fsm {
    #[value(name = "swap_out_sender")]
    SwapOutSender,
    #[value(name = "swap_out_receiver")]
    SwapOutReceiver,
    #[value(name = "swap_in_sender")]
    SwapInSender,
    #[value(name = "swap_in_receiver")]
    SwapInReceiver,
}

impl Fsm {
    fn role(self) -> (SwapType, SwapRole) {
        match self {
            Fsm::SwapOutSender => (SwapType::SwapOut, SwapRole::Sender),
            Fsm::SwapOutReceiver => (SwapType::SwapOut, SwapRole::Receiver),
            Fsm::SwapInSender => (SwapType::SwapIn, SwapRole::Sender),
            Fsm::SwapInReceiver => (SwapType::SwapIn, SwapRole::Receiver),
        }
    }
}

fn main() -> Result<()> {
    peer_swap::logging::init().ok();
    let args = Args::parse();

    let out = match args.command {
        Command::Diagram { fsm } => {
            let (swap_type, role) = fsm.role();
            print!("{}", mermaid(swap_type, role));
            return Ok(());
        }
        Command::List => {
            let store = open_store(args.store_path)?;
            let swaps = store.list_all().context("list swaps")?;
            json!(swaps.iter().map(SwapRecord::summary).collect::<Vec<_>>())
        }
        Command::ListByPeer { peer } => {
            let store = open_store(args.store_path)?;
            let swaps = store.list_all_by_peer(&peer).context("list swaps by peer")?;
            json!(swaps.iter().map(SwapRecord::summary).collect::<Vec<_>>())
        }
        Command::Get { swap_id } => {
            let swap_id: SwapId = swap_id.parse().context("parse swap_id")?;
            let store = open_store(args.store_path)?;
            let record = store
                .get_data(&swap_id)
                .context("get swap")?
                .with_context(|| format!("swap not found: {swap_id}"))?;
            json!({
              "summary": record.summary(),
              "previous_state": record.previous,
              "last_err": record.data.last_err,
              "data": record.data,
            })
        }
        Command::Requested => {
            let store = open_store(args.store_path)?;
            let entries = store.get_all().context("list requested swaps")?;
            serde_json::to_value(aggregate(&entries)).context("encode requested swaps")?
        }
    };

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn open_store(store_path: Option<PathBuf>) -> Result<SqliteSwapStore> {
    let store_path = store_path.context("--store-path is required")?;
    anyhow::ensure!(
        store_path.exists(),
        "swap store not found: {}",
        store_path.display()
    );
    SqliteSwapStore::open(store_path).context("open sqlite store")
}

fn mermaid(swap_type: SwapType, role: SwapRole) -> String {
    let states = role_states(swap_type, role);
    let mut edges: Vec<(StateType, StateType, String)> = states
        .iter()
        .flat_map(|(from, state)| {
            state
                .events
                .iter()
                .map(|(event, to)| (*from, *to, event.to_string()))
        })
        .collect();
    edges.sort_by(|a, b| (a.0.as_str(), &a.2).cmp(&(b.0.as_str(), &b.2)));

    let mut terminal: Vec<StateType> = states
        .iter()
        .filter(|(_, state)| state.events.is_empty())
        .map(|(s, _)| *s)
        .collect();
    terminal.sort_by_key(|s| s.as_str());

    let mut out = String::from("stateDiagram-v2\n");
    out.push_str(&format!("    [*] --> {}\n", StateType::Default));
    for (from, to, event) in edges {
        out.push_str(&format!("    {from} --> {to}: {event}\n"));
    }
    for state in terminal {
        out.push_str(&format!("    {state} --> [*]\n"));
    }
    out
}

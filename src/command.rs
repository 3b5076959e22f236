use std::path::PathBuf;
use structopt::StructOpt;

use crate::{
    config::{Environment, File, Settings},
    database::Database,
    swap::SwapId,
};

#[derive(StructOpt, Debug)]
pub struct Options {
    /// Path to configuration file
    #[structopt(short = "c", long = "config", parse(from_os_str))]
    pub config_file: Option<PathBuf>,

    /// Which environment to run against: mainnet, stagenet or dev
    #[structopt(short = "e", long = "env")]
    pub environment: Option<Environment>,

    /// Commands available
    #[structopt(subcommand)]
    pub cmd: Command,
}

impl Options {
    pub fn from_args() -> Self {
        StructOpt::from_args()
    }
}

#[derive(StructOpt, Debug, Clone)]
pub enum Command {
    /// Dump the current configuration
    DumpConfig,
    /// List the stored offers
    Offers,
    /// List all stored swaps and their status
    Swaps,
    /// Delete all stored offers
    ClearOffers,
    /// Print the stored recovery material of a swap
    Recover {
        #[structopt(parse(try_from_str))]
        swap_id: SwapId,
    },
}

pub fn dump_config(settings: Settings) -> anyhow::Result<()> {
    let file = File::from(settings);
    let serialized = toml::to_string(&file)?;
    println!("{}", serialized);
    Ok(())
}

pub fn list_offers(db: &Database) -> anyhow::Result<()> {
    let offers = db.all_offers()?;
    if offers.is_empty() {
        println!("No offers stored");
        return Ok(());
    }

    for offer in offers {
        println!(
            "{}: {} to {} XMR at {} ETH/XMR, paid in {}",
            offer.id(),
            offer.min_amount(),
            offer.max_amount(),
            offer.exchange_rate(),
            offer.eth_asset(),
        );
    }
    Ok(())
}

pub fn list_swaps(db: &Database) -> anyhow::Result<()> {
    let swaps = db.all_swaps()?;
    if swaps.is_empty() {
        println!("No swaps stored");
        return Ok(());
    }

    for record in swaps {
        println!(
            "{}: {} ({} XMR for {} {}), started {}",
            record.swap_id,
            record.status,
            record.provided_amount,
            record.expected_amount,
            record.eth_asset,
            record.start_time,
        );
    }
    Ok(())
}

pub fn clear_offers(db: &Database) -> anyhow::Result<()> {
    db.clear_offers()?;
    println!("All offers deleted");
    Ok(())
}

/// Prints everything persisted for a swap that a manual recovery would need.
/// The secret spend key is deliberately not printed, it stays in the
/// database.
pub fn recovery_info(db: &Database, swap_id: SwapId) -> anyhow::Result<()> {
    match db.get_swap(swap_id)? {
        Some(record) => println!("Swap {}: {}", swap_id, record.status),
        None => {
            println!("No swap stored under {}", swap_id);
            return Ok(());
        }
    }

    match db.contract_swap_info(swap_id)? {
        Some(info) => {
            println!("Escrow contract: {}", info.swap_creator_addr);
            println!("Contract swap id: {}", info.contract_swap_id);
            println!("Locked since block: {}", info.start_block);
            println!("Claim window: t0={} t1={}", info.swap.timeout_1, info.swap.timeout_2);
        }
        None => println!("Counterparty never locked, nothing to claim"),
    }

    if let Some(lock) = db.xmr_lock(swap_id)? {
        println!("XMR locked to joint address {}", lock.address);
        println!("Lock transaction: {}", lock.tx_hash);
    }

    if db.shared_swap_keys(swap_id)?.is_some() {
        println!("Joint wallet keys are stored, funds are recoverable by sweep");
    }

    Ok(())
}

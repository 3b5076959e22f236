#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use swapd::{
    command::{self, Command, Options},
    config::{read_config, Settings},
    database::Database,
    fs::{default_config_path, ensure_directory_exists},
    trace,
};

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::from_args();

    let file = read_config(&options.config_file, default_config_path)?;
    let settings = Settings::from_config_file_and_defaults(file, options.environment)
        .context("could not initialize configuration")?;

    if let Command::DumpConfig = options.cmd {
        command::dump_config(settings)?;
        return Ok(());
    }

    trace::init_tracing(settings.logging.level).context("could not initialize tracing")?;

    let db_path = settings.data.dir.join("database");
    ensure_directory_exists(&db_path).context("could not create the data directory")?;
    let db = Database::open(&db_path).context("could not open the database")?;

    match options.cmd {
        Command::DumpConfig => unreachable!("handled above"),
        Command::Offers => command::list_offers(&db)?,
        Command::Swaps => command::list_swaps(&db)?,
        Command::ClearOffers => command::clear_offers(&db)?,
        Command::Recover { swap_id } => command::recovery_info(&db, swap_id)?,
    }

    Ok(())
}

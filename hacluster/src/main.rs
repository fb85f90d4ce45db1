//! Hook entry point.
//!
//! The binary is invoked once per event (usually through a symlink named
//! after the hook) and processes that event to completion. Deferred and
//! already-satisfied outcomes exit zero; fatal conditions exit non-zero.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::Parser;

use hacluster::host::{AptInstaller, SysvServices};
use hacluster::inventory::InventoryProvider;
use hacluster::{Charm, CharmConfig, CrmShell, Hook, MaasClient, Outcome, ToolRelay};

#[derive(Debug, Parser)]
#[command(name = "hacluster", about = "HA cluster convergence agent")]
struct Cli {
    /// Hook to run; defaults to the executable's basename
    hook: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run().await {
        Ok(outcome) => {
            log::info!("{}", outcome);
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<Outcome> {
    let cli = Cli::parse();
    let name = match cli.hook {
        Some(name) => name,
        None => invoked_as().ok_or_else(|| anyhow!("no hook name supplied"))?,
    };
    let hook = Hook::from_name(&name).ok_or_else(|| anyhow!("unknown hook: {}", name))?;

    let relay = ToolRelay::new();
    let config = CharmConfig::from_json(relay.config_json().await?)
        .context("loading local configuration")?;

    let inventory: Option<Box<dyn InventoryProvider>> =
        match (&config.maas_url, &config.maas_credentials) {
            (Some(url), Some(credentials)) => Some(Box::new(
                MaasClient::new(url, credentials).context("building inventory client")?,
            )),
            _ => None,
        };

    let charm = Charm::new(
        config,
        Box::new(relay),
        Box::new(CrmShell::detect().await?),
        Box::new(AptInstaller::new()),
        Box::new(SysvServices::new()),
        inventory,
    );

    Ok(charm.dispatch(hook).await?)
}

fn invoked_as() -> Option<String> {
    let argv0 = std::env::args().next()?;
    Path::new(&argv0)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

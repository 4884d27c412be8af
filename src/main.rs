use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use provi::cleanup::{self, SharedCleanupContext};
use provi::config::{Config, Services};
use provi::provider::{PackageProvider, ProviderKind};
use provi::runtime::RealRuntime;

/// provi - install command-line tools from many ecosystems
///
/// Packages are named by source id, either `provider:packageId` or
/// `pkg:provider/packageId`, e.g. `cargo:ripgrep` or `pkg:github/BurntSushi/ripgrep`.
///
/// Examples:
///   provi install cargo:ripgrep          # Install the newest ripgrep with cargo
///   provi install npm:typescript --version 5.4.0
///   provi sync                           # Bring everything in the lockfile up
#[derive(Parser, Debug)]
#[command(author, version = env!("PROVI_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data root holding installs, the lockfile and the registry cache
    #[arg(long, env = "PROVI_ROOT", value_name = "PATH", global = true)]
    root: Option<PathBuf>,

    /// Directory executables are exposed in (defaults to <root>/bin)
    #[arg(long, env = "PROVI_BIN_DIR", value_name = "PATH", global = true)]
    bin_dir: Option<PathBuf>,

    /// Local registry JSON (defaults to <root>/registry.json)
    #[arg(long, env = "PROVI_REGISTRY", value_name = "PATH", global = true)]
    registry: Option<PathBuf>,

    /// Remote registry JSON used by `registry refresh`
    #[arg(long, env = "PROVI_REGISTRY_URL", value_name = "URL", global = true)]
    registry_url: Option<String>,

    /// Log more (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install a package and record it in the lockfile
    Install(InstallArgs),

    /// Remove a package, its executables and its lockfile entry
    Remove(PackageArgs),

    /// Move a package to its newest version
    Update(PackageArgs),

    /// Reconcile installs against the lockfile
    Sync(ProvidersArgs),

    /// Remove installs that are no longer in the lockfile
    Clean(ProvidersArgs),

    /// Show the lockfile
    List,

    /// Manage the registry cache
    #[command(subcommand)]
    Registry(RegistryCommands),
}

#[derive(clap::Args, Debug)]
struct InstallArgs {
    #[arg(value_name = "SOURCE_ID")]
    package: String,

    /// Version to install; `latest` resolves the newest
    #[arg(long, default_value = "latest")]
    version: String,
}

#[derive(clap::Args, Debug)]
struct PackageArgs {
    #[arg(value_name = "SOURCE_ID")]
    package: String,
}

#[derive(clap::Args, Debug)]
struct ProvidersArgs {
    /// Providers to process; all of them when omitted
    #[arg(value_name = "PROVIDER")]
    providers: Vec<String>,
}

#[derive(clap::Subcommand, Debug)]
enum RegistryCommands {
    /// Download the registry from --registry-url
    Refresh,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let runtime = Arc::new(RealRuntime);
    let config = Config::resolve(
        runtime.as_ref(),
        cli.root,
        cli.bin_dir,
        cli.registry,
        cli.registry_url,
    )?;
    let cleanup_ctx = cleanup::new_shared();
    let services = Services::build(&config, runtime, cleanup_ctx.clone())?;

    let ctrl_c_handler = spawn_ctrl_c_handler(cleanup_ctx);
    let result = dispatch(cli.command, &config, &services).await;
    ctrl_c_handler.abort();
    result
}

fn spawn_ctrl_c_handler(cleanup_ctx: SharedCleanupContext) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cleaning up...");
            if let Ok(ctx) = cleanup_ctx.lock() {
                ctx.cleanup();
            }
            std::process::exit(130);
        }
    })
}

async fn dispatch(command: Commands, config: &Config, services: &Services<RealRuntime>) -> Result<bool> {
    match command {
        Commands::Install(args) => {
            let (provider, package) = services.providers.dispatch(&args.package)?;
            println!("Installing {} {}", package, args.version);
            let ok = provider.install(&package, &args.version).await;
            if ok {
                let lockfile = services.engine.installer().lockfile();
                if let Some(locked) = lockfile.get(&package.source_id())? {
                    println!("Installed {} {}", package, locked.version);
                }
            }
            Ok(ok)
        }
        Commands::Remove(args) => {
            let (provider, package) = services.providers.dispatch(&args.package)?;
            println!("Removing {}", package);
            Ok(provider.remove(&package).await)
        }
        Commands::Update(args) => {
            let (provider, package) = services.providers.dispatch(&args.package)?;
            println!("Updating {}", package);
            Ok(provider.update(&package).await)
        }
        Commands::Sync(args) => {
            let mut ok = true;
            for provider in selected(services, &args.providers)? {
                println!("Syncing {}", provider.kind());
                ok &= provider.sync().await;
            }
            Ok(ok)
        }
        Commands::Clean(args) => {
            let mut ok = true;
            for provider in selected(services, &args.providers)? {
                println!("Cleaning {}", provider.kind());
                ok &= provider.clean().await;
            }
            Ok(ok)
        }
        Commands::List => {
            for locked in services.engine.installer().lockfile().packages()? {
                println!("{}  {}", locked.source_id, locked.version);
            }
            Ok(true)
        }
        Commands::Registry(RegistryCommands::Refresh) => {
            let url = config
                .registry_url
                .as_deref()
                .ok_or_else(|| anyhow!("No registry URL configured; pass --registry-url"))?;
            let count = services
                .registry
                .refresh_from(&services.http, url)
                .await
                .with_context(|| format!("Failed to refresh registry from {}", url))?;
            println!("Registry refreshed: {} entries", count);
            Ok(true)
        }
    }
}

/// The named providers, or every registered one.
fn selected<'a>(
    services: &'a Services<RealRuntime>,
    names: &[String],
) -> Result<Vec<&'a Arc<dyn PackageProvider>>> {
    if names.is_empty() {
        return Ok(ProviderKind::ALL
            .into_iter()
            .filter_map(|kind| services.providers.get(kind))
            .collect());
    }
    names
        .iter()
        .map(|name| services.providers.by_name(name))
        .collect()
}

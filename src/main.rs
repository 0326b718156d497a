//! Custody CLI
//!
//! Command-line interface for creating and inspecting the keys of an agent.

use clap::{Parser, Subcommand};
use fevm_custody::balance::{bound_role_addresses, fetch_balances, format_fil};
use fevm_custody::chain::{ChainClient, LotusClient};
use fevm_custody::journal::Journal;
use fevm_custody::keys::{
    DeviceHub, EnvOrPrompt, HardwareBackend, KeyBackend, KeystoreBackend, LegacyKeyBackend,
};
use fevm_custody::multisig::MultisigProvisioner;
use fevm_custody::store::FileStore;
use fevm_custody::{
    AccountManager, Config, KeySetup, Result, Role, RoleStore, RpcConfig, SignerStrategy,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "custody")]
#[command(about = "Key custody for Filecoin storage-provider agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage agent keys
    Wallet {
        #[command(subcommand)]
        command: WalletCommand,
    },

    /// Show current configuration
    Config,
}

#[derive(Subcommand)]
enum WalletCommand {
    /// Create owner, operator and requester keys
    New {
        /// Split the owner between a local proposer and a hardware approver
        #[arg(long)]
        hardware: bool,

        /// Also create a 2-of-2 multisig owner (implies --hardware)
        #[arg(long)]
        msig: bool,
    },

    /// Create the owner multisig from existing proposer and approver keys
    NewMsig,

    /// Show every bound role with its addresses
    List,

    /// Show the balance of every bound role
    Balance,

    /// Check whether a role has ever been funded
    Funded {
        /// owner, owner-proposer, owner-approver, operator or requester
        role: String,
    },

    /// List the accounts each key backend holds
    Accounts {
        /// Include an attached hardware wallet
        #[arg(long)]
        hardware: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins when set
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load config
    let config = match cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Wallet { command } => {
            let ctx = Context::open(config)?;
            match command {
                WalletCommand::New { hardware, msig } => {
                    let strategy = if msig {
                        SignerStrategy::Multisig
                    } else if hardware {
                        SignerStrategy::HardwareWallet
                    } else {
                        SignerStrategy::SoftwareKey
                    };
                    run_new(&ctx, strategy).await?;
                }
                WalletCommand::NewMsig => run_new_msig(&ctx).await?,
                WalletCommand::List => run_list(&ctx).await?,
                WalletCommand::Balance => run_balance(&ctx).await?,
                WalletCommand::Funded { role } => run_funded(&ctx, role.parse()?).await?,
                WalletCommand::Accounts { hardware } => run_accounts(&ctx, hardware).await?,
            }
        }
    }

    Ok(())
}

/// Local state shared by the wallet commands
struct Context {
    config: Config,
    roles: RoleStore,
    keystore: Arc<KeystoreBackend>,
    legacy: Arc<LegacyKeyBackend>,
    journal: Journal,
}

impl Context {
    fn open(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let roles = RoleStore::new(
            Arc::new(FileStore::open(config.role_store_path())?),
            config.network,
        );
        let passphrases = Arc::new(EnvOrPrompt::new());
        let keystore = Arc::new(KeystoreBackend::open(
            config.keystore_dir(),
            passphrases.clone(),
        )?);
        let legacy = Arc::new(LegacyKeyBackend::new(Arc::new(FileStore::open(
            config.legacy_keys_path(),
        )?)));

        // unlocking picks the passphrase by the role a key serves
        let held = keystore.list_accounts()?;
        for role in Role::ALL {
            if !roles.is_bound(role)? {
                continue;
            }
            let bound = roles.account(role)?;
            if let Some(evm) = held.iter().find(|a| a.matches(&bound)).and_then(|a| a.evm) {
                passphrases.bind(evm, role);
            }
        }

        let journal = match config.journal_path() {
            Some(path) => Journal::open(path, config.disabled_events()?)?,
            None => Journal::null(),
        };

        Ok(Self {
            config,
            roles,
            keystore,
            legacy,
            journal,
        })
    }

    fn chain(&self) -> Result<LotusClient> {
        let (url, token) = RpcConfig::from_env(self.config.network).into_parts();
        LotusClient::new(&url, token)
    }

    fn accounts(&self, hardware: Option<HardwareBackend>) -> AccountManager {
        let mut accounts = AccountManager::new()
            .with_backend(self.keystore.clone())
            .with_backend(self.legacy.clone());
        if let Some(hardware) = hardware {
            accounts.register(Arc::new(hardware));
        }
        accounts
    }
}

#[cfg(feature = "ledger")]
fn hardware_hub(config: &Config) -> Result<Box<dyn DeviceHub>> {
    Ok(Box::new(fevm_custody::keys::ledger::LedgerHub::new(
        config.hardware_accounts,
    )))
}

#[cfg(not(feature = "ledger"))]
fn hardware_hub(_config: &Config) -> Result<Box<dyn DeviceHub>> {
    Err(fevm_custody::Error::DeviceNotFound(
        "built without hardware wallet support (enable the `ledger` feature)".to_string(),
    ))
}

async fn run_new(ctx: &Context, strategy: SignerStrategy) -> Result<()> {
    tracing::info!(strategy = ?strategy, "Creating agent keys");

    let hub = match strategy {
        SignerStrategy::SoftwareKey => None,
        _ => Some(hardware_hub(&ctx.config)?),
    };
    let chain = match strategy {
        SignerStrategy::Multisig => Some(ctx.chain()?),
        _ => None,
    };

    let mut setup = KeySetup::new(&ctx.roles, &ctx.keystore, &ctx.journal)
        .with_wait_policy(ctx.config.wait.confidence, ctx.config.wait.lookback_limit);
    if let Some(hub) = hub.as_deref() {
        setup = setup.with_hub(hub);
    }
    if let Some(chain) = chain.as_ref() {
        setup = setup.with_chain(chain);
    }

    let report = setup.run(strategy).await?;
    for (role, locator) in &report.bound {
        println!("{:<16} {}", role.to_string(), locator);
    }
    if let Some(msig) = report.multisig {
        println!("Multisig ID:     {}", msig.id_address);
        println!("Multisig robust: {}", msig.robust_address);
        println!("Creation message: {}", msig.cid);
    }
    Ok(())
}

async fn run_new_msig(ctx: &Context) -> Result<()> {
    let chain = ctx.chain()?;
    let mut provisioner = MultisigProvisioner::new(&chain, &ctx.roles, &ctx.journal)
        .with_wait_policy(ctx.config.wait.confidence, ctx.config.wait.lookback_limit);

    let msig = provisioner
        .provision(Role::OwnerProposer, Role::OwnerApprover)
        .await?;
    println!("Multisig ID:     {}", msig.id_address);
    println!("Multisig robust: {}", msig.robust_address);
    println!("Creation message: {}", msig.cid);
    Ok(())
}

async fn run_list(ctx: &Context) -> Result<()> {
    let chain = ctx.chain()?;
    let accounts = ctx.accounts(None);

    for role in Role::ALL {
        if !ctx.roles.is_bound(role)? {
            continue;
        }
        let addrs = ctx
            .roles
            .get_addrs(role, Some(&chain as &dyn ChainClient))
            .await?;
        let backend = ctx
            .roles
            .account(role)
            .and_then(|account| accounts.backend_for(&account).map(|b| b.name()))
            .unwrap_or_else(|_| "-".to_string());
        println!("{:<16} {} {}  [{}]", role.to_string(), addrs.evm, addrs.native, backend);
    }
    Ok(())
}

async fn run_balance(ctx: &Context) -> Result<()> {
    let chain: Arc<dyn ChainClient> = Arc::new(ctx.chain()?);
    let addresses = bound_role_addresses(&ctx.roles, &Role::ALL).await?;
    if addresses.is_empty() {
        println!("No roles bound; run `custody wallet new` first");
        return Ok(());
    }

    let balances = fetch_balances(chain, &addresses).await?;
    for (role, balance) in &balances {
        ctx.roles.record_balance(*role, balance)?;
        println!("{:<16} {}", role.to_string(), format_fil(*balance));
    }
    Ok(())
}

async fn run_funded(ctx: &Context, role: Role) -> Result<()> {
    let chain = ctx.chain()?;
    let funded = ctx
        .roles
        .is_funded(role, Some(&chain as &dyn ChainClient))
        .await?;
    println!("{}: {}", role, if funded { "funded" } else { "not funded" });
    Ok(())
}

async fn run_accounts(ctx: &Context, hardware: bool) -> Result<()> {
    let device = if hardware {
        let hub = hardware_hub(&ctx.config)?;
        Some(
            HardwareBackend::connect(hub.as_ref())
                .await?
                .with_key_cache(ctx.roles.kv()),
        )
    } else {
        None
    };

    let accounts = ctx.accounts(device);
    for backend in accounts.backends() {
        let held = backend.list_accounts()?;
        println!("{} ({}): {} account(s)", backend.name(), backend.kind(), held.len());
        for account in held {
            println!("  {}", account);
        }
    }
    Ok(())
}

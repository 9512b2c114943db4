//! assetman CLI
//!
//! Key generation, signing and verification against a local key directory, and
//! the read-only vault query server.

use assetman::error::{AssetmanError, ProtocolError};
use assetman::keystore::{load_public_key_package, save_public_key_package};
use assetman::{
    api, keys, verify, AssetType, AssetmanConfig, Coin, Coordinator, DealerOutput,
    GroupKey, GroupSignature, Identifier, Keystore, LocalEndpoint, Signer, SignerEndpoint, VaultId,
    VaultLedger, WithdrawalMessage,
};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;

const GROUP_FILE: &str = "group.json";

#[derive(Parser)]
#[command(name = "assetman")]
#[command(about = "Threshold-signature gated asset custody")]
struct Cli {
    /// Key directory (overrides ASSETMAN_KEY_DIR)
    #[arg(short, long, global = true)]
    key_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a fresh group key with a trusted dealer
    Keygen {
        /// Threshold (t of n)
        #[arg(short, long, default_value = "2")]
        threshold: u16,

        /// Total participants
        #[arg(short = 'n', long, default_value = "3")]
        total: u16,

        /// Key password
        #[arg(short, long, env = "ASSETMAN_KEY_PASSWORD")]
        password: String,
    },

    /// Split an existing 32-byte secret key into shares
    Split {
        /// Secret key, hex encoded
        #[arg(short, long, env = "ASSETMAN_SECRET_KEY")]
        secret: String,

        /// Threshold (t of n)
        #[arg(short, long, default_value = "2")]
        threshold: u16,

        /// Total participants
        #[arg(short = 'n', long, default_value = "3")]
        total: u16,

        /// Key password
        #[arg(short, long, env = "ASSETMAN_KEY_PASSWORD")]
        password: String,
    },

    /// Run a signing session over the local key packages of the given participants
    Sign {
        /// Comma-separated participant indices, e.g. 1,3
        #[arg(short, long, value_delimiter = ',')]
        signers: Vec<u16>,

        #[command(flatten)]
        message: MessageArgs,

        /// Key password
        #[arg(short, long, env = "ASSETMAN_KEY_PASSWORD")]
        password: String,
    },

    /// Verify a group signature
    Verify {
        #[command(flatten)]
        message: MessageArgs,

        /// Signature, hex encoded (64 bytes)
        #[arg(long)]
        signature: String,

        /// Group public key (hex); read from the key directory if omitted
        #[arg(long)]
        group_key: Option<String>,
    },

    /// Serve the read-only vault query API
    Serve {
        /// Bind address
        #[arg(short, long, default_value = "0.0.0.0:9100")]
        bind: String,

        /// Vault to open at startup as ASSET_TYPE=AMOUNT, bound to the group key
        /// in the key directory (repeatable)
        #[arg(long = "vault", value_parser = parse_vault_seed)]
        vaults: Vec<(AssetType, u64)>,
    },

    /// Print the effective configuration
    Config,
}

fn parse_vault_seed(s: &str) -> Result<(AssetType, u64), String> {
    let (asset_type, amount) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected ASSET_TYPE=AMOUNT, got `{s}`"))?;
    let asset_type = AssetType::parse(asset_type).map_err(|e| e.to_string())?;
    let amount = amount.parse().map_err(|e| format!("invalid amount `{amount}`: {e}"))?;
    Ok((asset_type, amount))
}

/// What gets signed: a free-form message or a vault withdrawal
#[derive(Args)]
struct MessageArgs {
    /// Message text
    #[arg(short, long, conflicts_with = "vault_id")]
    message: Option<String>,

    /// Treat --message as hex
    #[arg(long, requires = "message")]
    hex: bool,

    /// Vault to withdraw from
    #[arg(long, requires_all = ["amount", "sequence"])]
    vault_id: Option<VaultId>,

    #[arg(long)]
    amount: Option<u64>,

    /// Vault sequence the withdrawal is signed for
    #[arg(long)]
    sequence: Option<u64>,
}

impl MessageArgs {
    fn bytes(&self) -> Result<Vec<u8>, AssetmanError> {
        if let (Some(vault_id), Some(amount), Some(sequence)) =
            (self.vault_id, self.amount, self.sequence)
        {
            return Ok(WithdrawalMessage::new(vault_id, amount, sequence).digest().to_vec());
        }
        match &self.message {
            Some(m) if self.hex => hex::decode(m.trim_start_matches("0x"))
                .map_err(|e| ProtocolError::InvalidEncoding(e.to_string()).into()),
            Some(m) => Ok(m.as_bytes().to_vec()),
            None => Err(ProtocolError::InvalidEncoding(
                "either --message or --vault-id/--amount/--sequence is required".to_string(),
            )
            .into()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AssetmanError> {
    let cli = Cli::parse();

    let mut config = AssetmanConfig::from_env()?;
    if let Some(dir) = cli.key_dir {
        config.key_dir = dir;
    }
    assetman::logging::init_from_config(&config)?;

    match cli.command {
        Commands::Keygen {
            threshold,
            total,
            password,
        } => {
            tracing::warn!("Generating keys with a trusted dealer: the dealer sees the full secret");
            let output = keys::generate(total, threshold)?;
            store_shares(&config.key_dir, output, &password)?;
        }
        Commands::Split {
            secret,
            threshold,
            total,
            password,
        } => {
            let output = keys::split_hex(&secret, total, threshold)?;
            store_shares(&config.key_dir, output, &password)?;
        }
        Commands::Sign {
            signers,
            message,
            password,
        } => {
            let message = message.bytes()?;
            let signature = run_signing(&config, &signers, &message, &password).await?;
            println!("{}", signature.to_hex()?);
        }
        Commands::Verify {
            message,
            signature,
            group_key,
        } => {
            let message = message.bytes()?;
            let group_key = match group_key {
                Some(hex) => GroupKey::from_hex(&hex)?,
                None => load_public_key_package(config.key_dir.join(GROUP_FILE))?.group_key(),
            };
            let signature = GroupSignature::from_hex(&signature)?;
            verify::require_valid(&signature, &message, &group_key)?;
            println!("valid");
        }
        Commands::Serve { bind, vaults } => serve(&config, &bind, vaults).await?,
        Commands::Config => config.print_summary(),
    }

    Ok(())
}

fn store_shares(key_dir: &Path, output: DealerOutput, password: &str) -> Result<(), AssetmanError> {
    let (key_packages, public_key_package) = output.into_key_packages()?;

    for (id, key_package) in &key_packages {
        let keystore = Keystore::in_dir(key_dir, id.index());
        keystore.save(key_package, &public_key_package, password)?;
        tracing::info!(participant = %id, path = %keystore.path().display(), "Saved key package");
    }

    let group_path = key_dir.join(GROUP_FILE);
    save_public_key_package(&group_path, &public_key_package)?;

    let group_key = public_key_package.group_key().to_hex()?;
    tracing::info!(
        threshold = public_key_package.min_signers(),
        total = public_key_package.max_signers(),
        path = %group_path.display(),
        "Saved public key package"
    );
    println!("{group_key}");
    Ok(())
}

async fn run_signing(
    config: &AssetmanConfig,
    signers: &[u16],
    message: &[u8],
    password: &str,
) -> Result<GroupSignature, AssetmanError> {
    let public_key_package = load_public_key_package(config.key_dir.join(GROUP_FILE))?;

    let mut endpoints: Vec<Arc<dyn SignerEndpoint>> = Vec::with_capacity(signers.len());
    let mut expiry = Vec::with_capacity(signers.len());
    for &index in signers {
        let id = Identifier::from_index(index)?;
        let (key_package, _) = Keystore::in_dir(&config.key_dir, id.index()).load(password)?;
        let signer = Arc::new(Signer::new(key_package));
        expiry.push(Signer::spawn_expiry(&signer, config.session_ttl));
        endpoints.push(Arc::new(LocalEndpoint::new(signer)));
    }

    let result = Coordinator::from_config(config)
        .sign(&public_key_package, message, &endpoints)
        .await;
    for handle in expiry {
        handle.abort();
    }
    Ok(result?)
}

/// Run the query server over an in-memory ledger
async fn serve(
    config: &AssetmanConfig,
    bind: &str,
    vaults: Vec<(AssetType, u64)>,
) -> Result<(), AssetmanError> {
    let (ledger, admin) = VaultLedger::in_memory(config.event_capacity);

    if !vaults.is_empty() {
        let group_key = load_public_key_package(config.key_dir.join(GROUP_FILE))?.group_key();
        for (asset_type, amount) in vaults {
            let vault_id = ledger
                .create_vault(&admin, group_key, Coin::new(asset_type, amount))
                .await?;
            tracing::info!(vault_id = %vault_id, amount, "Opened vault");
        }
    }

    let listener = TcpListener::bind(bind).await?;
    api::serve(listener, Arc::new(ledger)).await?;
    Ok(())
}

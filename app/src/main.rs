/// dapp-connect -- interactive wallet connection demo.
///
/// Usage:
///
///   dapp-connect [OPTIONS]
///
/// Options:
///
///   --data-dir <PATH>      Data directory (default: platform config dir)
///   --provider <KIND>      Provider used by a bare `connect` (local | http)
///   --endpoint <URL>       JSON-RPC endpoint for the http provider
///   --no-restore           Do not reconnect the cached provider at startup
///
/// Environment:
///
///   DAPP_CONNECT_ENV           Config environment name (default: development)
///   DAPP_CONNECT_PRIVATE_KEY   Hex key for the local wallet instead of local.key
///
/// Type `help` at the prompt for the list of actions.
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dapp_connect_lib::app_state::ENVIRONMENT_ENV;
use dapp_connect_lib::chains::{network_name, parse_chain_id, SELECTABLE_NETWORKS};
use dapp_connect_lib::display::render_status;
use dapp_connect_lib::{
    AppPaths, ConfigStore, DappContext, ProviderKind, StaticSelector, SwitchOutcome, WalletResult,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Parser)]
#[command(name = "dapp-connect", version, about = "Wallet connection demo")]
struct Cli {
    /// Data directory holding config and the local wallet key.
    #[arg(long, env = "DAPP_CONNECT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Provider chosen when `connect` is given no argument.
    #[arg(long)]
    provider: Option<ProviderKind>,

    /// JSON-RPC endpoint for the http provider; persisted to config.
    #[arg(long)]
    endpoint: Option<String>,

    /// Skip reconnecting the cached provider at startup.
    #[arg(long)]
    no_restore: bool,
}

const HELP: &str = "\
actions:
  connect [local|http]   choose a provider and connect
  disconnect             disconnect and forget the cached provider
  networks               list selectable networks
  network <id>           select the target network (decimal or 0x hex)
  switch                 switch the wallet to the selected network
  message <text>         set the message to sign or encrypt
  sign                   sign the message with the connected account
  verify                 verify the last signature
  key                    fetch the account's encryption public key
  recipient <base64>     set the recipient encryption public key
  encrypt                encrypt the message for the recipient
  decrypt                ask the wallet to decrypt the last ciphertext
  status                 show the session
  quit                   exit";

enum Flow {
    Continue,
    Quit,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli.data_dir.unwrap_or_else(AppPaths::default_root);

    if let Some(endpoint) = cli.endpoint {
        let paths = AppPaths::new(&root)?;
        let environment =
            std::env::var(ENVIRONMENT_ENV).unwrap_or_else(|_| "development".to_string());
        ConfigStore::from_paths(&paths).update(environment, |config| {
            config.provider.http_endpoint = endpoint;
            Ok(())
        })?;
    }

    let selector = Arc::new(StaticSelector::new(cli.provider));
    let context = DappContext::initialize(root, selector.clone())?;

    if !cli.no_restore {
        match context.restore().await {
            Ok(Some(_)) => log::info!("restored previous wallet connection"),
            Ok(None) => {}
            Err(e) => log::warn!("could not restore cached provider: {}", e),
        }
    }

    println!("{}", render_status(&context.session().snapshot()));
    prompt();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match run_command(&context, &selector, cli.provider, line.trim()).await {
            Flow::Quit => break,
            Flow::Continue => prompt(),
        }
    }

    Ok(())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn run_command(
    context: &DappContext,
    selector: &StaticSelector,
    default_provider: Option<ProviderKind>,
    line: &str,
) -> Flow {
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    let session = context.session();

    let outcome: WalletResult<Option<String>> = match command {
        "" => Ok(None),
        "help" => Ok(Some(HELP.to_string())),
        "quit" | "exit" => return Flow::Quit,
        "status" => Ok(None),
        "connect" => {
            let choice = if rest.is_empty() {
                Ok(default_provider)
            } else {
                rest.parse::<ProviderKind>().map(Some)
            };
            match choice {
                Ok(choice) => {
                    selector.set(choice);
                    context.connect().await.map(|_| None)
                }
                Err(e) => Err(e),
            }
        }
        "disconnect" => context.disconnect().await.map(|_| None),
        "networks" => Ok(Some(
            SELECTABLE_NETWORKS
                .iter()
                .map(|(id, name)| format!("  {:>12}  {}", id, name))
                .collect::<Vec<_>>()
                .join("\n"),
        )),
        "network" => parse_chain_id(rest).map(|id| {
            session.select_network(id);
            network_name(id).map(|name| format!("selected {}", name))
        }),
        "switch" => match context.require_connected() {
            Ok(()) => session.switch_to_selected().await.map(|outcome| match outcome {
                SwitchOutcome::Switched => Some("network switched".to_string()),
                SwitchOutcome::ChainAdded => {
                    Some("network added to wallet; switch again to use it".to_string())
                }
            }),
            Err(e) => Err(e),
        },
        "message" => session.set_message(rest).map(|_| None),
        "sign" => session.sign_pending().await.map(|_| None),
        "verify" => session.verify_last().await.map(|_| None),
        "key" => session.fetch_encryption_public_key().await.map(Some),
        "recipient" => {
            session.set_recipient_key(rest);
            Ok(None)
        }
        "encrypt" => session.encrypt_pending().map(Some),
        "decrypt" => session.decrypt_last().await.map(|_| None),
        other => Ok(Some(format!("unknown action '{}', try `help`", other))),
    };

    match outcome {
        Ok(Some(text)) => println!("{}", text),
        Ok(None) => {}
        Err(e) => println!("error: {}", e),
    }
    if !matches!(command, "" | "help" | "networks") {
        println!("{}", render_status(&session.snapshot()));
    }
    Flow::Continue
}

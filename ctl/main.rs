#![forbid(unsafe_code)]

//! `flagpipe-ctl`: command-line client for a running `flagpipe` server.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::Notify;
use tracing_subscriber::{fmt, EnvFilter};

use flagpipe::{FlagClient, GlobalConfig};

/// How long `demo` waits for the notification of its own change.
const DEMO_NOTIFY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Parser)]
#[command(
    name = "flagpipe-ctl",
    about = "Command-line client for the flagpipe server",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the server's `ipc_name`).
    #[arg(long, default_value = "flagpipe")]
    ipc_name: String,

    /// Per-request timeout in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the value of a flag.
    Get {
        /// Flag name.
        flag: String,
    },

    /// Create a flag that does not exist yet.
    Set {
        /// Flag name.
        flag: String,
        /// Value between 0 and 255.
        value: u8,
    },

    /// Create or overwrite a flag and notify subscribers.
    Change {
        /// Flag name.
        flag: String,
        /// Value between 0 and 255.
        value: u8,
    },

    /// Delete a flag.
    Remove {
        /// Flag name.
        flag: String,
    },

    /// Print every change of a flag until interrupted.
    Watch {
        /// Flag name.
        flag: String,
    },

    /// Subscribe to `flag1`, set it to 1, then change it to 2.
    Demo,
}

fn main() {
    let args = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run(args)) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run(args: Cli) -> flagpipe::Result<()> {
    let config = GlobalConfig {
        ipc_name: args.ipc_name.clone(),
        request_timeout_ms: args.timeout_ms,
        ..GlobalConfig::default()
    };
    config.validate()?;

    let client = FlagClient::connect(&config).await.inspect_err(|_| {
        eprintln!("Is flagpipe running with ipc_name '{}'?", args.ipc_name);
    })?;

    let outcome = execute(&client, args.command).await;
    let closed = client.close().await;
    outcome.and(closed)
}

async fn execute(client: &FlagClient, command: Command) -> flagpipe::Result<()> {
    match command {
        Command::Get { flag } => {
            let value = client.get_flag_value(&flag).await?;
            println!("{value}");
        }
        Command::Set { flag, value } => {
            client.set_flag(&flag, value).await?;
            println!("OK");
        }
        Command::Change { flag, value } => {
            client.change_flag(&flag, value).await?;
            println!("OK");
        }
        Command::Remove { flag } => {
            client.remove_flag(&flag).await?;
            println!("OK");
        }
        Command::Watch { flag } => {
            client
                .subscribe_flag(&flag, |name, value| println!("{name} = {value}"))
                .await?;
            println!("watching {flag}, press Ctrl-C to stop");
            if let Err(err) = tokio::signal::ctrl_c().await {
                eprintln!("ctrl-c handler failed: {err}");
            }
            client.unsubscribe_flag(&flag).await?;
        }
        Command::Demo => {
            let notified = Arc::new(Notify::new());
            let signal = Arc::clone(&notified);
            client
                .subscribe_flag("flag1", move |name, value| {
                    println!("Flag {name} changed the value to {value}");
                    signal.notify_one();
                })
                .await?;
            client.set_flag("flag1", 1).await?;
            println!("flag1 set to 1");
            client.change_flag("flag1", 2).await?;
            println!("flag1 changed to 2");
            if tokio::time::timeout(DEMO_NOTIFY_TIMEOUT, notified.notified())
                .await
                .is_err()
            {
                eprintln!("no change notification for flag1 within {DEMO_NOTIFY_TIMEOUT:?}");
            }
        }
    }
    Ok(())
}

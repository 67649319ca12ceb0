//! Console client for a remote script server.
//!
//! Run with: cargo run -p remote-scripts-console -- --url http://localhost:5000 run hello -p name=world
//!
//! Starts or reattaches to executions and streams their output to stdout.
//! Lines typed on stdin answer the execution's input prompts.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use remote_scripts_api::{HttpJobApi, ScheduleConfig};
use remote_scripts_core::{ClientConfig, ExecutionStatus, ParameterValues};
use remote_scripts_session::{
    ClientSignal, ConfigurationClient, ExecutionHandle, ExecutionRegistry, ParameterValueStore,
    SyncContext,
};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "remote-scripts", about = "Run and follow scripts on a remote server")]
struct Cli {
    /// Server base URL (falls back to REMOTE_SCRIPTS_URL).
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a script and follow its output.
    Run {
        script: String,
        /// Parameter value as `name=value`; repeat a name for list values.
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },
    /// Reattach to executions still running on the server.
    Attach,
    /// Show a script's parameters, validating any given values.
    Params {
        script: String,
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, Value)>,
    },
    /// List schedules, or schedule a one-off run.
    Schedules {
        #[arg(long)]
        script: Option<String>,
        /// Schedule `script` at this ISO datetime instead of listing.
        #[arg(long, requires = "script")]
        at: Option<String>,
    },
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got `{raw}`"))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

fn collect_values(params: Vec<(String, Value)>) -> ParameterValues {
    let mut values = ParameterValues::new();
    for (name, value) in params {
        match values.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => *existing = Value::Array(vec![existing.take(), value]),
            None => {
                values.insert(name, value);
            }
        }
    }
    values
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match cli.url {
        Some(url) => ClientConfig::new(&url)?,
        None => ClientConfig::from_env().context("no --url given")?,
    };
    let api = Arc::new(HttpJobApi::new(config.clone())?);
    let ctx = SyncContext::websocket(config, api.clone());

    let mut signals = ctx.subscribe_signals();
    tokio::spawn(async move {
        while let Ok(signal) = signals.recv().await {
            match signal {
                ClientSignal::ReauthenticationRequired => {
                    eprintln!("Session expired, please log in again");
                }
            }
        }
    });

    match cli.command {
        Command::Run { script, params } => {
            let mut registry = ExecutionRegistry::new(ctx);
            let id = registry.start(&script, collect_values(params)).await?;
            eprintln!("Started execution {id}");
            let handle = registry.get(&id).context("execution not tracked")?.clone();
            follow(&registry, &handle).await
        }
        Command::Attach => {
            let mut registry = ExecutionRegistry::new(ctx);
            let attached = registry.reconnect_active_executions().await?;
            if attached.is_empty() {
                eprintln!("No active executions");
                return Ok(());
            }
            for handle in registry.iter() {
                eprintln!("{}  {}", handle.id(), handle.script_name());
            }
            let handle = registry.selected().context("nothing selected")?.clone();
            follow(&registry, &handle).await
        }
        Command::Params { script, params } => show_params(ctx, &script, params).await,
        Command::Schedules { script, at } => {
            if let (Some(script), Some(at)) = (script.as_deref(), at) {
                let id = api
                    .create_schedule(script, &ParameterValues::new(), &ScheduleConfig::once(at))
                    .await?;
                println!("Scheduled {script} as {id}");
                return Ok(());
            }
            for schedule in api.list_schedules(script.as_deref()).await? {
                println!(
                    "{}  {}  {}  next: {}",
                    schedule.id,
                    schedule.script_name,
                    schedule.user_name,
                    schedule.next_execution.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
    }
}

/// Print output until the execution ends, forwarding stdin as input.
async fn follow(registry: &ExecutionRegistry, handle: &ExecutionHandle) -> anyhow::Result<()> {
    let mut output = handle.output_stream();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            chunk = output.next() => {
                let Some(chunk) = chunk else { break };
                print!("{chunk}");
            }
            line = stdin.next_line(), if stdin_open => {
                match line? {
                    Some(line) => {
                        registry.send_input(handle.id(), line);
                    }
                    None => stdin_open = false,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("Stopping {}", handle.id());
                registry.stop(handle.id()).await?;
            }
        }
    }

    let state = handle.finished().await;
    match state.status {
        ExecutionStatus::Finished => Ok(()),
        ExecutionStatus::Disconnected => {
            bail!("lost connection to {}, it may still be running", state.id)
        }
        _ => match state.error {
            Some(err) => Err(err.into()),
            None => bail!("execution ended as {:?}", state.status),
        },
    }
}

async fn show_params(
    ctx: SyncContext,
    script: &str,
    params: Vec<(String, Value)>,
) -> anyhow::Result<()> {
    let mut client = ConfigurationClient::new(ctx);
    let (handle, mut updates) = client.connect(script);
    let mut store = ParameterValueStore::new(handle.clone());

    let change = tokio::time::timeout(Duration::from_secs(10), updates.recv())
        .await
        .context("timed out waiting for the script config")?
        .context("config connection closed")?;
    store.apply(change);

    for (name, value) in params {
        store.set_value(&name, value);
    }

    for parameter in store.parameters() {
        let value = store.value(&parameter.name).cloned().unwrap_or(Value::Null);
        let marker = if parameter.required { "*" } else { " " };
        println!("{marker} {:<20} {:?}  = {value}", parameter.name, parameter.kind);
        if let Some(description) = &parameter.description {
            println!("    {description}");
        }
        if let Some(error) = store.error(&parameter.name) {
            println!("    ! {error}");
        }
    }

    let state = handle.state();
    client.disconnect();
    if let Some(err) = state.error {
        return Err(err.into());
    }
    Ok(())
}

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ledger_core::signer::KeyPair;
use ledger_core::TaskPatch;
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ledger-cli")]
#[command(about = "CLI client for the task ledger node")]
struct Cli {
    /// Node base URL (e.g. http://127.0.0.1:8080)
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    node: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum, Serialize)]
#[serde(rename_all = "UPPERCASE")]
enum Action {
    Create,
    Complete,
    Update,
    Delete,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum PriorityArg {
    Low,
    Medium,
    High,
}

impl From<PriorityArg> for ledger_core::Priority {
    fn from(p: PriorityArg) -> Self {
        match p {
            PriorityArg::Low => ledger_core::Priority::Low,
            PriorityArg::Medium => ledger_core::Priority::Medium,
            PriorityArg::High => ledger_core::Priority::High,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a ledger with its genesis block
    Init { user: String },
    /// Record a task change in a user's ledger
    Submit {
        user: String,
        #[arg(long, value_enum)]
        action: Action,
        #[arg(long)]
        task_id: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Due date as an ISO-8601 string
        #[arg(long)]
        due_date: Option<String>,
        #[arg(long, value_enum)]
        priority: Option<PriorityArg>,
        #[arg(long)]
        completed: Option<bool>,
        /// Key used to sign the transaction
        #[arg(long)]
        signing_key: Option<String>,
    },
    /// Print a user's ledger
    Show { user: String },
    /// Check a user's chain
    Validate { user: String },
    /// Dump a user's ledger as JSON
    Export {
        user: String,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// Mine transactions left pending by an earlier timeout
    Mine { user: String },
    /// Print a fresh key pair
    Keygen,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TxBody {
    action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    task_id: Option<String>,
    task: TaskPatch,
    #[serde(skip_serializing_if = "Option::is_none")]
    signing_key: Option<String>,
}

async fn read_json(res: Response) -> Result<Value> {
    let status = res.status();
    let body: Value = res.json().await.context("node returned a non-JSON body")?;
    debug!("node answered {status}");
    if !status.is_success() {
        let reason = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        bail!("{status}: {reason}");
    }
    Ok(body)
}

/// `{node}/ledgers/{user}{suffix}` with the user id percent-encoded.
fn ledger_url(node: &str, user: &str, suffix: &str) -> String {
    format!("{node}/ledgers/{}{suffix}", urlencoding::encode(user))
}

fn print(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .init();

    let cli = Cli::parse();
    let node = cli.node.trim_end_matches('/').to_string();
    let client = Client::new();

    match cli.cmd {
        Command::Init { user } => {
            let res = client.post(ledger_url(&node, &user, "")).send().await?;
            let ledger = read_json(res).await?;
            println!("created ledger for {user}, genesis {}", ledger["lastBlockHash"]);
        }
        Command::Submit {
            user,
            action,
            task_id,
            title,
            description,
            due_date,
            priority,
            completed,
            signing_key,
        } => {
            let body = TxBody {
                action,
                task_id,
                task: TaskPatch {
                    title,
                    description,
                    completed,
                    due_date,
                    priority: priority.map(Into::into),
                },
                signing_key,
            };
            let res = client
                .post(ledger_url(&node, &user, "/tx"))
                .json(&body)
                .send()
                .await?;
            print(&read_json(res).await?)?;
        }
        Command::Show { user } => {
            let res = client.get(ledger_url(&node, &user, "")).send().await?;
            print(&read_json(res).await?)?;
        }
        Command::Validate { user } => {
            let res = client
                .post(ledger_url(&node, &user, "/validate"))
                .send()
                .await?;
            let report = read_json(res).await?;
            println!("{}", report["message"].as_str().unwrap_or_default());
            if let Some(fault) = report.get("fault").and_then(Value::as_str) {
                println!("{fault}");
            }
            if report["isValid"] != Value::Bool(true) {
                std::process::exit(1);
            }
        }
        Command::Export { user, out } => {
            let res = client
                .get(ledger_url(&node, &user, "/export"))
                .send()
                .await?;
            let ledger = read_json(res).await?;
            let text = serde_json::to_string_pretty(&ledger)?;
            match out {
                Some(path) => {
                    tokio::fs::write(&path, text)
                        .await
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("exported {user} to {}", path.display());
                }
                None => println!("{text}"),
            }
        }
        Command::Mine { user } => {
            let res = client.post(ledger_url(&node, &user, "/mine")).send().await?;
            let out = read_json(res).await?;
            match out.get("block") {
                Some(block) => println!("mined block {} ({})", block["index"], block["hash"]),
                None => println!("nothing pending for {user}"),
            }
        }
        Command::Keygen => {
            let pair = KeyPair::generate();
            println!("public:  {}", pair.public_key);
            println!("private: {}", pair.private_key);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_ids_are_percent_encoded() {
        let node = "http://127.0.0.1:8080";
        assert_eq!(
            ledger_url(node, "alice", "/tx"),
            "http://127.0.0.1:8080/ledgers/alice/tx"
        );
        assert_eq!(
            ledger_url(node, "a/b?c#d", "/mine"),
            "http://127.0.0.1:8080/ledgers/a%2Fb%3Fc%23d/mine"
        );
        assert_eq!(
            ledger_url(node, "ユーザー", ""),
            format!("{node}/ledgers/%E3%83%A6%E3%83%BC%E3%82%B6%E3%83%BC")
        );
    }
}

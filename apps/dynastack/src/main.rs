//! dynastack - DynamoDB command-line client.
//!
//! # Usage
//!
//! ```text
//! dynastack batch-write <entries.json>
//! dynastack batch-get <table> <keys.json>
//! dynastack get-item <table> <hash> [range]
//! dynastack delete-table <table>
//! ```
//!
//! `entries.json` maps table names to lists of entries, each either
//! `{"put": {<attributes>}, "id": "<correlation id>"}` or
//! `{"delete": {"hash": <value>, "range": <value>}}`. `keys.json` is a list
//! of hash values or `[hash, range]` pairs. Strings become `S`, numbers `N`,
//! and arrays of either `SS`/`NS`.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DYNASTACK_ENDPOINT` | regional AWS endpoint | Service URL |
//! | `AWS_REGION` | `us-east-1` | Signing region |
//! | `DYNASTACK_MAX_RETRIES` | `-1` (unlimited) | Retry cap per request |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |

use anyhow::{Context, Result, bail};
use dynastack_core::{BatchOutcome, ClientConfig, DynamoClient, WriteEntry};
use dynastack_model::{Item, ItemKey, Value};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to `LOG_LEVEL`.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    Ok(())
}

#[derive(Debug, PartialEq)]
enum Command {
    BatchWrite { file: String },
    BatchGet { table: String, file: String },
    GetItem { table: String, key: ItemKey },
    DeleteTable { table: String },
}

fn parse_args(args: &[String]) -> Result<Command> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    Ok(match args.as_slice() {
        ["batch-write", file] => Command::BatchWrite {
            file: (*file).to_owned(),
        },
        ["batch-get", table, file] => Command::BatchGet {
            table: (*table).to_owned(),
            file: (*file).to_owned(),
        },
        ["get-item", table, hash] => Command::GetItem {
            table: (*table).to_owned(),
            key: ItemKey::hash(*hash),
        },
        ["get-item", table, hash, range] => Command::GetItem {
            table: (*table).to_owned(),
            key: ItemKey::composite(*hash, *range),
        },
        ["delete-table", table] => Command::DeleteTable {
            table: (*table).to_owned(),
        },
        _ => bail!(
            "usage: dynastack batch-write <entries.json> | batch-get <table> <keys.json> \
             | get-item <table> <hash> [range] | delete-table <table>"
        ),
    })
}

/// Convert a plain JSON value to a native attribute value.
fn native_value(json: &serde_json::Value) -> Result<Value> {
    Ok(match json {
        serde_json::Value::String(s) => Value::from(s.as_str()),
        serde_json::Value::Number(n) => Value::number(&n.to_string())?,
        serde_json::Value::Array(list) if list.iter().all(serde_json::Value::is_string) => {
            Value::string_set(list.iter().filter_map(serde_json::Value::as_str))
        }
        serde_json::Value::Array(list) if list.iter().all(serde_json::Value::is_number) => {
            let mut numbers = Vec::with_capacity(list.len());
            for n in list {
                if let Value::Number(n) = Value::number(&n.to_string())? {
                    numbers.push(n);
                }
            }
            Value::number_set(numbers)
        }
        other => bail!("cannot use {other} as an attribute value"),
    })
}

fn native_item(json: &serde_json::Value) -> Result<Item> {
    let map = json.as_object().context("item must be a JSON object")?;
    map.iter()
        .map(|(name, value)| Ok((name.clone(), native_value(value)?)))
        .collect()
}

fn native_key(json: &serde_json::Value) -> Result<ItemKey> {
    match json {
        serde_json::Value::Array(pair) if pair.len() == 2 => Ok(ItemKey::composite(
            native_value(&pair[0])?,
            native_value(&pair[1])?,
        )),
        serde_json::Value::Object(key) => {
            let hash = key.get("hash").context("delete key needs a hash")?;
            Ok(match key.get("range") {
                Some(range) => ItemKey::composite(native_value(hash)?, native_value(range)?),
                None => ItemKey::hash(native_value(hash)?),
            })
        }
        other => Ok(ItemKey::hash(native_value(other)?)),
    }
}

fn write_entries(json: &serde_json::Value) -> Result<Vec<WriteEntry>> {
    let tables = json.as_object().context("entries file must map tables to lists")?;
    let mut entries = Vec::new();
    for (table, list) in tables {
        let list = list
            .as_array()
            .with_context(|| format!("entries for {table} must be a list"))?;
        for entry in list {
            if let Some(item) = entry.get("put") {
                let mut put = WriteEntry::put(table.as_str(), native_item(item)?);
                if let Some(id) = entry.get("id").and_then(serde_json::Value::as_str) {
                    put = put.with_correlation_id(id);
                }
                entries.push(put);
            } else if let Some(key) = entry.get("delete") {
                entries.push(WriteEntry::delete(table.as_str(), native_key(key)?));
            } else {
                bail!("entry for {table} must have \"put\" or \"delete\": {entry}");
            }
        }
    }
    Ok(entries)
}

fn outcome_summary(outcome: &BatchOutcome) -> serde_json::Value {
    let mut summary = json!({
        "table": outcome.table,
        "entries": outcome.entries,
        "correlation-ids": outcome.correlation_ids,
    });
    match &outcome.result {
        Ok(response) => {
            summary["status"] = json!(response.status.as_u16());
            summary["resubmissions"] = json!(response.chain.len());
            summary["retries"] = json!(response.retries);
        }
        Err(err) => summary["error"] = json!(err.to_string()),
    }
    summary
}

async fn read_json(path: &str) -> Result<serde_json::Value> {
    let raw = tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read {path}"))?;
    serde_json::from_slice(&raw).with_context(|| format!("{path} is not valid JSON"))
}

async fn run(client: &DynamoClient, command: Command) -> Result<serde_json::Value> {
    Ok(match command {
        Command::BatchWrite { file } => {
            let entries = write_entries(&read_json(&file).await?)?;
            info!(entries = entries.len(), "writing entries");
            let outcomes = client.batch_write(entries).await;
            json!({ "batches": outcomes.iter().map(outcome_summary).collect::<Vec<_>>() })
        }
        Command::BatchGet { table, file } => {
            let keys = read_json(&file).await?;
            let keys = keys
                .as_array()
                .context("keys file must be a list")?
                .iter()
                .map(native_key)
                .collect::<Result<Vec<_>>>()?;
            let result = client.batch_get(&table, keys).await;
            let items = result.items(&table)?;
            json!({
                "pages": result.pages.iter().map(outcome_summary).collect::<Vec<_>>(),
                "responses": result.responses.len(),
                "items": items.iter().map(|item| Value::from(item.clone()).to_string()).collect::<Vec<_>>(),
            })
        }
        Command::GetItem { table, key } => {
            let item = client.get_item(&table, &key).await?;
            json!({ "item": item.map(|item| Value::from(item).to_string()) })
        }
        Command::DeleteTable { table } => {
            let description = client.delete_table(&table).await?;
            json!({
                "table": description.table_name,
                "status": description.table_status,
            })
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let log = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    init_tracing(&log)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;
    let config = ClientConfig::from_env()?;
    let client = DynamoClient::new(config)?;

    let outcome = tokio::select! {
        result = run(&client, command) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("interrupted")),
    };
    client.shutdown();

    let summary = outcome?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

//! Inspect command - list stored sessions.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use console::{Style, style};
use serde::Serialize;
use simplesess_session::{
    DATA_PREFIX, MARKER_PREFIX, RecordKey, RecordStore, marker_timestamp, validate_namespace,
};

use super::Context;

/// Arguments for the inspect command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Only show sessions in this namespace
    #[arg(short, long, value_name = "NS")]
    pub namespace: Option<String>,
}

/// One stored session for output.
#[derive(Debug, Serialize)]
struct SessionRow {
    namespace: String,
    id: String,
    expires_at: Option<DateTime<Utc>>,
    expired: bool,
    /// Number of keys in the data record, `None` if it is missing.
    keys: Option<usize>,
}

/// Run the inspect command.
pub async fn run(args: InspectArgs, ctx: &Context) -> Result<()> {
    if let Some(ref ns) = args.namespace {
        validate_namespace(ns)?;
    }

    let store = ctx.open_store()?;
    let (prefix, data_prefix) = match args.namespace {
        Some(ref ns) => (format!("{MARKER_PREFIX}{ns}|"), format!("{DATA_PREFIX}{ns}|")),
        None => (MARKER_PREFIX.to_string(), DATA_PREFIX.to_string()),
    };
    let now = Utc::now().timestamp();

    let mut rows = Vec::new();
    for (raw, value) in store.scan_prefix(&prefix)? {
        let Some(key) = RecordKey::parse(&raw) else {
            continue;
        };
        let expires = marker_timestamp(&value);
        let keys = store
            .get(&key.paired().to_string())?
            .map(|data| data.as_object().map_or(0, |m| m.len()));

        rows.push(SessionRow {
            namespace: key.namespace,
            id: key.id,
            expires_at: expires.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            expired: expires.is_none_or(|ts| ts < now),
            keys,
        });
    }
    rows.sort_by(|a, b| {
        a.namespace
            .cmp(&b.namespace)
            .then_with(|| a.expires_at.cmp(&b.expires_at))
    });

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No sessions stored.");
        return Ok(());
    }

    let dim = Style::new().dim();
    let red = Style::new().red();

    println!();
    println!(
        "  {:<16} {:<44} {:<24} {}",
        style("NAMESPACE").bold(),
        style("ID").bold(),
        style("EXPIRES").bold(),
        style("KEYS").bold()
    );
    for row in &rows {
        let when = row
            .expires_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "unreadable".to_string());
        let when = if row.expired {
            red.apply_to(format!("{when:<24}")).to_string()
        } else {
            format!("{when:<24}")
        };
        let keys = row
            .keys
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  {:<16} {:<44} {} {}", row.namespace, row.id, when, keys);
    }

    let expired = rows.iter().filter(|r| r.expired).count();
    let paired = rows.iter().filter(|r| r.keys.is_some()).count();
    let orphans = store.count_prefix(&data_prefix)?.saturating_sub(paired);
    println!();
    println!(
        "  {}",
        dim.apply_to(format!("{} session(s), {} expired", rows.len(), expired))
    );
    if orphans > 0 {
        println!(
            "  {}",
            red.apply_to(format!("{orphans} data record(s) without an expiration marker"))
        );
    }
    println!();

    Ok(())
}

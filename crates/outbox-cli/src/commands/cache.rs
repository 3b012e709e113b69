use outbox_core::models::{CacheEntry, CacheFilter, CacheKey};
use outbox_core::util::unix_millis_now;

use crate::cli::CacheCommands;
use crate::commands::common::{format_cache_lines, format_timestamp, CliClient};
use crate::error::CliError;

pub fn run_cache(client: &CliClient, command: CacheCommands) -> Result<(), CliError> {
    match command {
        CacheCommands::List {
            pending,
            synced,
            json,
        } => run_cache_list(client, cache_filter(pending, synced), json),
        CacheCommands::Get { key } => run_cache_get(client, &key),
        CacheCommands::Clear => {
            let removed = client.clear_cache()?;
            println!("Removed {removed} cached entr{}", if removed == 1 { "y" } else { "ies" });
            Ok(())
        }
    }
}

pub const fn cache_filter(pending: bool, synced: bool) -> CacheFilter {
    match (pending, synced) {
        (true, _) => CacheFilter::Unsynced,
        (false, true) => CacheFilter::Synced,
        (false, false) => CacheFilter::All,
    }
}

fn run_cache_list(client: &CliClient, filter: CacheFilter, as_json: bool) -> Result<(), CliError> {
    let entries = client.cache_entries(filter).collect::<Vec<CacheEntry>>();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Cache is empty.");
        return Ok(());
    }

    for line in format_cache_lines(&entries, unix_millis_now()) {
        println!("{line}");
    }
    let size = client.cache_size();
    println!(
        "{} entries, ~{} bytes of {}",
        size.count,
        size.approximate_bytes,
        client.config().cache_quota_bytes
    );
    Ok(())
}

fn run_cache_get(client: &CliClient, key: &str) -> Result<(), CliError> {
    let key = key.trim();
    let entry = client
        .cached(&CacheKey::from(key))
        .ok_or_else(|| CliError::CacheEntryNotFound(key.to_string()))?;

    println!("{}", serde_json::to_string_pretty(&entry.content)?);
    eprintln!(
        "{} at {}{}",
        if entry.synced { "synced" } else { "pending" },
        format_timestamp(entry.timestamp),
        entry
            .version
            .map(|version| format!(", version {version}"))
            .unwrap_or_default()
    );
    Ok(())
}

//! Scripted walkthrough against an in-memory remote.

use std::sync::Arc;

use outbox_core::models::CacheFilter;
use outbox_core::network::{ConnectivityEvent, StaticProbe};
use outbox_core::remote::MemoryRemote;
use outbox_core::storage::MemoryStore;
use outbox_core::util::unix_millis_now;
use outbox_core::{EntityId, NewAction, Resolution, SyncClient, SyncConfig};
use serde_json::json;

use crate::commands::common::{
    format_cache_lines, format_drain_summary, format_queue_lines, format_status_lines,
};
use crate::error::CliError;

pub async fn run_demo() -> Result<(), CliError> {
    let config = SyncConfig {
        drain_on_enqueue: false,
        ..SyncConfig::default()
    };
    let remote = Arc::new(MemoryRemote::new());
    let client = SyncClient::initialize(
        config,
        Arc::new(MemoryStore::new()),
        Arc::clone(&remote),
        StaticProbe::offline(),
    )
    .await?;

    step("Offline: queue two notes and edit the first one");
    client.enqueue(NewAction::create("note-1", json!({"title": "Groceries"})))?;
    client.enqueue(NewAction::create("note-2", json!({"title": "Ideas"})))?;
    client.enqueue(NewAction::update(
        "note-1",
        json!({"title": "Groceries", "items": ["milk"]}),
    ))?;
    print_lines(&format_queue_lines(&client.queued(), unix_millis_now()));
    println!("{}", format_drain_summary(&client.force_sync().await));

    step("Back online: drain");
    client.network().handle_event(ConnectivityEvent::Online).await;
    println!("{}", format_drain_summary(&client.force_sync().await));
    println!("Remote now holds {} entities", remote.len());

    step("Another device edits note-2 while we edit it locally");
    remote.put_remote("note-2", json!({"title": "Ideas", "pinned": true}));
    client.enqueue(NewAction::update("note-2", json!({"title": "Ideas v2"})))?;
    println!("{}", format_drain_summary(&client.force_sync().await));
    print_lines(&format_status_lines(&client.status(), unix_millis_now()));

    step("Resolve by merging both sides");
    client.resolve_conflict(
        &EntityId::from("note-2"),
        Resolution::Merge {
            payload: json!({"title": "Ideas v2", "pinned": true}),
        },
    )?;
    println!("{}", format_drain_summary(&client.force_sync().await));

    step("Final state");
    print_lines(&format_status_lines(&client.status(), unix_millis_now()));
    let entries = client.cache_entries(CacheFilter::All).collect::<Vec<_>>();
    print_lines(&format_cache_lines(&entries, unix_millis_now()));
    Ok(())
}

fn step(title: &str) {
    println!();
    println!("== {title}");
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

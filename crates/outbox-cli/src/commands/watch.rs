use std::time::Duration;

use outbox_core::util::unix_millis_now;

use crate::commands::common::{format_status_lines, CliClient};
use crate::error::CliError;

pub async fn run_watch(client: &CliClient, interval_secs: u64) -> Result<(), CliError> {
    if !client.remote().is_configured() {
        return Err(CliError::RemoteNotConfigured);
    }

    let interval = Duration::from_secs(interval_secs.max(1));
    let tasks = client.start_background(Some(interval));
    let subscription = client.subscribe(|status| {
        println!("--- {}", chrono::Utc::now().format("%H:%M:%S"));
        for line in format_status_lines(status, unix_millis_now()) {
            println!("{line}");
        }
    });

    if client.network().is_online() && client.sync_status().pending_changes > 0 {
        client.engine().request_drain();
    }

    tokio::signal::ctrl_c().await?;
    subscription.unsubscribe();
    tasks.shutdown();
    println!("Stopped ({} pending)", client.sync_status().pending_changes);
    Ok(())
}

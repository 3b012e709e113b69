use crate::commands::common::{format_drain_summary, CliClient};
use crate::error::CliError;

pub async fn run_sync(client: &CliClient, as_json: bool) -> Result<(), CliError> {
    if !client.remote().is_configured() {
        return Err(CliError::RemoteNotConfigured);
    }

    let result = client.force_sync().await;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("{}", format_drain_summary(&result));
    if let Some(error) = &result.last_error {
        println!("Last error: {error}");
    }
    let conflicts = client.sync_status().conflicts;
    if !conflicts.is_empty() {
        println!("Resolve with `outbox resolve <id> <use-local|use-remote|merge>`:");
        for conflict in conflicts {
            println!("  {}", conflict.entity_id);
        }
    }
    Ok(())
}

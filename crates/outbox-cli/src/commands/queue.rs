use outbox_core::util::unix_millis_now;

use crate::commands::common::{format_queue_lines, CliClient};
use crate::error::CliError;

pub fn run_queue(client: &CliClient, as_json: bool) -> Result<(), CliError> {
    let actions = client.queued();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&actions)?);
        return Ok(());
    }

    if actions.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_queue_lines(&actions, unix_millis_now()) {
        println!("{line}");
    }
    Ok(())
}

use crate::commands::common::{confirm, CliClient};
use crate::error::CliError;

pub fn run_reset(client: &CliClient, skip_prompt: bool) -> Result<(), CliError> {
    let pending = client.sync_status().pending_changes;
    if !skip_prompt {
        let prompt = format!(
            "Discard {pending} pending change(s) and {} cached entr(ies)?",
            client.cache_size().count
        );
        if !confirm(&prompt)? {
            return Err(CliError::Aborted);
        }
    }

    client.clear_all_data()?;
    println!("Cleared all offline data ({pending} pending change(s) discarded)");
    Ok(())
}

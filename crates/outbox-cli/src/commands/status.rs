use outbox_core::util::unix_millis_now;

use crate::commands::common::{format_status_lines, CliClient};
use crate::error::CliError;

pub fn run_status(client: &CliClient, as_json: bool) -> Result<(), CliError> {
    let status = client.status();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    for line in format_status_lines(&status, unix_millis_now()) {
        println!("{line}");
    }
    Ok(())
}

use outbox_core::{EnqueueOutcome, NewAction};

use crate::cli::OperationArg;
use crate::commands::common::{normalize_entity_id, parse_payload, CliClient};
use crate::error::CliError;

pub fn run_enqueue(
    client: &CliClient,
    id: &str,
    op: OperationArg,
    payload: Option<&str>,
    base_version: Option<&str>,
) -> Result<(), CliError> {
    let action = build_action(id, op, payload, base_version)?;
    let operation = action.operation;
    let id = action.id.clone();

    let outcome = client.enqueue(action)?;
    let verb = match outcome {
        EnqueueOutcome::Inserted => "Queued",
        EnqueueOutcome::Coalesced => "Merged into pending",
        EnqueueOutcome::Replaced => "Replaced pending",
    };
    println!(
        "{verb} {operation} for {id} ({} pending)",
        client.sync_status().pending_changes
    );
    Ok(())
}

pub fn build_action(
    id: &str,
    op: OperationArg,
    payload: Option<&str>,
    base_version: Option<&str>,
) -> Result<NewAction, CliError> {
    let id = normalize_entity_id(id)?;
    let payload = parse_payload(payload)?;

    let mut action = match op {
        OperationArg::Create => {
            NewAction::create(id, payload.ok_or(CliError::MissingPayload("create"))?)
        }
        OperationArg::Update => {
            NewAction::update(id, payload.ok_or(CliError::MissingPayload("update"))?)
        }
        OperationArg::Delete => NewAction::delete(id),
    };
    if let Some(version) = base_version.map(str::trim).filter(|value| !value.is_empty()) {
        action = action.with_base_version(version);
    }
    Ok(action)
}

use outbox_core::Resolution;

use crate::cli::ResolutionArg;
use crate::commands::common::{format_drain_summary, normalize_entity_id, parse_payload, CliClient};
use crate::error::CliError;

pub async fn run_resolve(
    client: &CliClient,
    id: &str,
    strategy: ResolutionArg,
    payload: Option<&str>,
) -> Result<(), CliError> {
    let id = normalize_entity_id(id)?;
    let resolution = build_resolution(strategy, payload)?;
    if !client.remote().is_configured() {
        return Err(CliError::RemoteNotConfigured);
    }

    // Conflicts live for one session; a fresh process has to find them again
    if client.sync_status().conflict_for(&id).is_none() {
        let result = client.force_sync().await;
        tracing::debug!("Conflict detection pass: {}", format_drain_summary(&result));
    }

    let conflict = client.resolve_conflict(&id, resolution)?;
    println!(
        "Resolved conflict on {} ({})",
        conflict.entity_id,
        match strategy {
            ResolutionArg::UseLocal => "keeping local changes",
            ResolutionArg::UseRemote => "keeping remote version",
            ResolutionArg::Merge => "pushing merge",
        }
    );

    if client.queued().iter().any(|action| action.id == id) {
        let result = client.force_sync().await;
        println!("{}", format_drain_summary(&result));
    }
    Ok(())
}

pub fn build_resolution(
    strategy: ResolutionArg,
    payload: Option<&str>,
) -> Result<Resolution, CliError> {
    Ok(match strategy {
        ResolutionArg::UseLocal => Resolution::UseLocal,
        ResolutionArg::UseRemote => Resolution::UseRemote,
        ResolutionArg::Merge => Resolution::Merge {
            payload: parse_payload(payload)?.ok_or(CliError::MissingPayload("merge"))?,
        },
    })
}

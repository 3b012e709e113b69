use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use outbox_core::engine::DrainResult;
use outbox_core::models::{CacheEntry, NetworkQuality, QueuedAction, SyncStatusKind};
use outbox_core::network::{ConnectivityProbe, ConnectivitySample, StaticProbe, TcpProbe};
use outbox_core::remote::{HttpRemote, RemoteApi, RemoteEntity, RemoteError, RemoteResult};
use outbox_core::storage::SqliteStore;
use outbox_core::{EntityId, OutboxStatus, SyncClient, VersionMarker};
use serde_json::Value;

use crate::config::CliConfig;
use crate::error::CliError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Remote the CLI talks to; `Detached` when no URL is configured
#[derive(Debug)]
pub enum CliRemote {
    Http(HttpRemote),
    Detached,
}

impl CliRemote {
    pub const fn is_configured(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

fn detached() -> RemoteError {
    RemoteError::Network("no remote configured".to_string())
}

impl RemoteApi for CliRemote {
    async fn create(&self, id: &EntityId, payload: &Value) -> RemoteResult<VersionMarker> {
        match self {
            Self::Http(remote) => remote.create(id, payload).await,
            Self::Detached => Err(detached()),
        }
    }

    async fn read(&self, id: &EntityId) -> RemoteResult<Option<RemoteEntity>> {
        match self {
            Self::Http(remote) => remote.read(id).await,
            Self::Detached => Err(detached()),
        }
    }

    async fn update(
        &self,
        id: &EntityId,
        payload: &Value,
        expected: Option<&VersionMarker>,
    ) -> RemoteResult<VersionMarker> {
        match self {
            Self::Http(remote) => remote.update(id, payload, expected).await,
            Self::Detached => Err(detached()),
        }
    }

    async fn delete(&self, id: &EntityId) -> RemoteResult<()> {
        match self {
            Self::Http(remote) => remote.delete(id).await,
            Self::Detached => Err(detached()),
        }
    }
}

/// Connectivity source picked from the config
#[derive(Debug)]
pub enum CliProbe {
    Tcp(TcpProbe),
    Static(StaticProbe),
}

impl ConnectivityProbe for CliProbe {
    async fn sample(&self) -> Option<ConnectivitySample> {
        match self {
            Self::Tcp(probe) => probe.sample().await,
            Self::Static(probe) => probe.sample().await,
        }
    }
}

pub type CliClient = SyncClient<CliRemote>;

/// Open the outbox at `db_path`.
///
/// One-shot commands never drain on enqueue: the process would exit before
/// the background pass finished. Without a remote the client stays offline.
pub async fn open_client(
    config: &CliConfig,
    db_path: &Path,
    background: bool,
) -> Result<CliClient, CliError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteStore::open(db_path)?);

    let mut sync = config.sync.clone();
    sync.drain_on_enqueue &= background;

    let (remote, probe) = match config.remote_url() {
        Some(url) => {
            let remote = HttpRemote::new(url, sync.request_timeout())?;
            let probe = config.probe_addr().map_or_else(
                || CliProbe::Static(StaticProbe::unsupported()),
                |addr| CliProbe::Tcp(TcpProbe::new(addr, PROBE_TIMEOUT)),
            );
            (CliRemote::Http(remote), probe)
        }
        None => (CliRemote::Detached, CliProbe::Static(StaticProbe::offline())),
    };

    tracing::debug!("Opening outbox at {}", db_path.display());
    Ok(SyncClient::initialize(sync, store, Arc::new(remote), probe).await?)
}

pub fn parse_payload(raw: Option<&str>) -> Result<Option<Value>, CliError> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(None);
    };
    serde_json::from_str(raw)
        .map(Some)
        .map_err(|error| CliError::InvalidPayload(error.to_string()))
}

pub fn normalize_entity_id(id: &str) -> Result<EntityId, CliError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(CliError::EmptyEntityId);
    }
    Ok(EntityId::from(id))
}

pub fn confirm(prompt: &str) -> Result<bool, CliError> {
    if !io::stdin().is_terminal() {
        return Ok(false);
    }
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let second = 1_000;
    let minute = 60 * second;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < 0 {
        format!("in {}s", diff.unsigned_abs().div_ceil(1_000))
    } else if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

/// Compact one-line rendering of a JSON payload
pub fn payload_preview(payload: &Value, max_chars: usize) -> String {
    let rendered = payload.to_string();
    if rendered.chars().count() <= max_chars {
        return rendered;
    }
    let truncated: String = rendered.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{truncated}...")
}

pub fn format_queue_lines(actions: &[QueuedAction], now_ms: i64) -> Vec<String> {
    actions
        .iter()
        .map(|action| {
            let mut line = format!(
                "{:>4}  {:<6}  {}  {}  {}",
                action.seq,
                action.operation.as_str(),
                action.id,
                format_relative_time(action.timestamp, now_ms),
                payload_preview(&action.payload, 48)
            );
            if action.attempts > 0 {
                line.push_str(&format!("  [{} attempt(s)]", action.attempts));
            }
            if action.force {
                line.push_str("  [force]");
            }
            line
        })
        .collect()
}

pub fn format_cache_lines(entries: &[CacheEntry], now_ms: i64) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            format!(
                "{}  {}  {}  {}  {}",
                entry.key,
                if entry.synced { "synced " } else { "pending" },
                entry.version.as_ref().map_or("-", VersionMarker::as_str),
                format_relative_time(entry.timestamp, now_ms),
                payload_preview(&entry.content, 48)
            )
        })
        .collect()
}

pub const fn quality_label(quality: NetworkQuality) -> &'static str {
    match quality {
        NetworkQuality::Excellent => "excellent",
        NetworkQuality::Good => "good",
        NetworkQuality::Poor => "poor",
    }
}

pub const fn status_label(status: SyncStatusKind) -> &'static str {
    match status {
        SyncStatusKind::Idle => "idle",
        SyncStatusKind::Syncing => "syncing",
        SyncStatusKind::Success => "success",
        SyncStatusKind::Error => "error",
        SyncStatusKind::Conflict => "conflict",
    }
}

pub fn format_status_lines(status: &OutboxStatus, now_ms: i64) -> Vec<String> {
    let network = &status.network;
    let sync = &status.sync;

    let mut network_line = format!(
        "Network:  {} ({})",
        if network.is_online { "online" } else { "offline" },
        quality_label(network.quality)
    );
    if let Some(rtt) = network.rtt_ms {
        network_line.push_str(&format!(", rtt {rtt}ms"));
    }

    let mut lines = vec![
        network_line,
        format!("Sync:     {}", status_label(sync.status)),
        format!("Pending:  {}", sync.pending_changes),
    ];
    if let Some(last_sync) = sync.last_sync {
        lines.push(format!(
            "Last:     {} ({})",
            format_timestamp(last_sync),
            format_relative_time(last_sync, now_ms)
        ));
    }
    if let Some(error) = &sync.last_error {
        lines.push(format!("Error:    {error}"));
    }
    if sync.retry_count > 0 {
        let next = sync
            .next_retry_at
            .map(|at| format!(", next {}", format_relative_time(at, now_ms)));
        lines.push(format!(
            "Retries:  {}{}{}",
            sync.retry_count,
            next.unwrap_or_default(),
            if sync.retry_exhausted {
                " (exhausted, run `outbox sync`)"
            } else {
                ""
            }
        ));
    }
    for conflict in &sync.conflicts {
        lines.push(format!(
            "Conflict: {} (local base {}, remote {})",
            conflict.entity_id,
            conflict
                .local_version
                .version
                .as_ref()
                .map_or("-", VersionMarker::as_str),
            conflict
                .remote_version
                .version
                .as_ref()
                .map_or("deleted", VersionMarker::as_str)
        ));
    }
    lines
}

pub fn format_drain_summary(result: &DrainResult) -> String {
    if result.skipped_offline {
        return "Offline: nothing was sent".to_string();
    }
    if result.cancelled {
        return "Sync cancelled".to_string();
    }

    let mut summary = format!(
        "Synced {}, failed {}, conflicts {}",
        result.success_count, result.error_count, result.conflict_count
    );
    if result.dead_lettered > 0 {
        summary.push_str(&format!(", dropped {}", result.dead_lettered));
    }
    if result.skipped_conflicted > 0 {
        summary.push_str(&format!(", blocked {}", result.skipped_conflicted));
    }
    if let Some(delay) = result.next_retry_in_ms {
        summary.push_str(&format!(" (retry in {}s)", delay.div_ceil(1_000)));
    }
    summary
}

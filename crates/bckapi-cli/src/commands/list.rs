use std::io;
use std::time::Duration;

use bckapi_core::{ApiError, ApiObject, ApiService, Batch, ChainState, ReaderConfig};
use serde_json::json;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;

use crate::cli::ListArgs;
use crate::error::CliError;
use crate::output::stream_writer::{NdjsonStreamWriter, StreamEventError};

/// How the stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Finish {
    Complete,
    Interrupted,
}

impl Finish {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Interrupted => "interrupted",
        }
    }
}

pub async fn run(args: &ListArgs, service: &ApiService) -> Result<(), CliError> {
    let mut writer = NdjsonStreamWriter::new(io::stdout().lock());

    if let Err(error) = service.refresh_root().await {
        return fail(&mut writer, error);
    }
    if service.registry().path(&args.name).is_none() {
        let error = ApiError::UnresolvedLocation {
            resource: args.name.clone(),
            registry_loaded: service.registry().is_loaded(),
        };
        return fail(&mut writer, error);
    }

    let reader = service.paged_reader::<ApiObject>(&args.name, reader_config(args));
    reader.filter(args.filters.iter().cloned());
    let mut batches = reader.receiver();

    writer.emit_start(Some(json!({
        "resource": args.name,
        "filters": reader_filters(&args.filters),
        "max_items": args.max_items,
        "refresh_ms": args.refresh_ms,
    })))?;

    let mut handle = reader.start();
    let mut states = handle.watch();
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    let mut published = 0_u64;
    let finish = loop {
        tokio::select! {
            biased;
            batch = batches.recv() => match batch {
                Ok(batch) => {
                    published += 1;
                    emit_batch(&mut writer, published, &batch)?;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "output fell behind the reader");
                    writer.emit_progress(Some(json!({ "phase": "lagged", "skipped": skipped })))?;
                }
                Err(RecvError::Closed) => break Finish::Complete,
            },
            () = handle.finished() => break Finish::Complete,
            _ = &mut interrupt => break Finish::Interrupted,
            changed = states.changed() => {
                if changed.is_err() {
                    continue;
                }
                let state = *states.borrow_and_update();
                if let ChainState::Backoff(delay) = state {
                    writer.emit_progress(Some(json!({
                        "phase": "backoff",
                        "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    })))?;
                }
            }
        }
    };

    reader.stop();
    loop {
        match batches.try_recv() {
            Ok(batch) => {
                published += 1;
                emit_batch(&mut writer, published, &batch)?;
            }
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    writer.emit_end(Some(json!({
        "status": "ok",
        "reason": finish.as_str(),
        "batches": published,
    })))
}

fn reader_config(args: &ListArgs) -> ReaderConfig {
    let refresh = (args.refresh_ms > 0).then(|| Duration::from_millis(args.refresh_ms));
    ReaderConfig::default()
        .with_max_items((args.max_items > 0).then_some(args.max_items))
        .with_page_interval(Duration::from_millis(args.page_interval_ms))
        .with_partial_results(args.partial)
        .with_sweep_refresh(refresh)
}

fn reader_filters(filters: &[(String, String)]) -> serde_json::Map<String, serde_json::Value> {
    filters
        .iter()
        .map(|(key, value)| (key.clone(), json!(value)))
        .collect()
}

fn emit_batch<W: io::Write>(
    writer: &mut NdjsonStreamWriter<W>,
    sequence: u64,
    batch: &Batch<ApiObject>,
) -> Result<(), CliError> {
    writer.emit_chunk(Some(json!({
        "batch": sequence,
        "items": batch.len(),
        "results": serde_json::to_value(batch.as_slice())?,
    })))
}

/// Reports an API failure on the stream, then hands it back for the exit code.
fn fail<W: io::Write>(writer: &mut NdjsonStreamWriter<W>, error: ApiError) -> Result<(), CliError> {
    let error = CliError::from(error);
    writer.emit_error(StreamEventError::new(error.code(), error.to_string()), None)?;
    Err(error)
}

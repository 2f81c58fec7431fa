use std::{collections::BTreeSet, sync::Arc};

use chrono::Utc;
use common::storage::types::{
    dataset::SequenceOperation,
    datum::{Datum, Provenance},
    raw_record::{Pagination, RawFilter, RawRecord, RevisionCondition},
    summary_request::SummaryReason,
};
use state_machines::core::GuardError;
use tracing::{debug, info, instrument, warn};

use super::{
    context::PipelineContext,
    error::ProcessingError,
    state::{
        DatasetResolved, Finalized, ProcessingMachine, Ready, RecordsCollected, RecordsProcessed,
        StrategyResolved,
    },
};
use crate::parser::ParsedBatch;

#[instrument(
    level = "trace",
    skip_all,
    fields(work_item_id = %ctx.item_id, attempt = ctx.attempt)
)]
pub async fn resolve_dataset(
    machine: ProcessingMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<ProcessingMachine<(), DatasetResolved>, ProcessingError> {
    let dataset_id = ctx
        .item
        .metadata
        .data_set_id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProcessingError::MissingMetadata {
            item_id: ctx.item_id.clone(),
            key: "dataSetId",
        })?;

    let dataset = ctx
        .repository
        .get_dataset(&dataset_id)
        .await?
        .ok_or_else(|| ProcessingError::DatasetNotFound(dataset_id.clone()))?;

    if dataset.user_id.is_empty() {
        return Err(ProcessingError::MissingUserId(dataset_id));
    }

    debug!(
        work_item_id = %ctx.item_id,
        dataset_id = %dataset.id,
        continuous = dataset.is_continuous(),
        "resolved dataset"
    );
    ctx.dataset = Some(dataset);

    machine
        .resolve_dataset()
        .map_err(|(_, guard)| map_guard_error("resolve_dataset", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(work_item_id = %ctx.item_id, attempt = ctx.attempt)
)]
pub async fn resolve_strategy(
    machine: ProcessingMachine<(), DatasetResolved>,
    ctx: &mut PipelineContext<'_>,
) -> Result<ProcessingMachine<(), StrategyResolved>, ProcessingError> {
    let deduplicator = ctx.factory.resolve_registered(ctx.dataset()?)?;

    debug!(
        work_item_id = %ctx.item_id,
        strategy = deduplicator.name(),
        "resolved registered deduplicator"
    );
    ctx.deduplicator = Some(deduplicator);

    machine
        .resolve_strategy()
        .map_err(|(_, guard)| map_guard_error("resolve_strategy", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(work_item_id = %ctx.item_id, attempt = ctx.attempt)
)]
pub async fn collect_records(
    machine: ProcessingMachine<(), StrategyResolved>,
    ctx: &mut PipelineContext<'_>,
) -> Result<ProcessingMachine<(), RecordsCollected>, ProcessingError> {
    let dataset = ctx.dataset()?;

    let records: Vec<RawRecord> = if dataset.is_continuous() {
        let raw_id = ctx
            .item
            .metadata
            .raw_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProcessingError::MissingMetadata {
                item_id: ctx.item_id.clone(),
                key: "rawId",
            })?;

        ctx.raw_data
            .get(raw_id, None)
            .await?
            .filter(|record| !record.processed && record.dataset_id == dataset.id)
            .into_iter()
            .collect()
    } else {
        list_unprocessed(ctx).await?
    };

    debug!(
        work_item_id = %ctx.item_id,
        records = records.len(),
        "collected unprocessed raw records"
    );
    ctx.stats.records_collected = records.len();
    ctx.records = records;

    machine
        .collect_records()
        .map_err(|(_, guard)| map_guard_error("collect_records", &guard))
}

async fn list_unprocessed(ctx: &PipelineContext<'_>) -> Result<Vec<RawRecord>, ProcessingError> {
    let dataset = ctx.dataset()?;
    let filter = RawFilter::unprocessed_for(&dataset.id);
    let mut pagination = Pagination::first(ctx.pipeline_config.tuning.raw_page_size);
    let mut records = Vec::new();

    loop {
        let page = ctx
            .raw_data
            .list(&dataset.user_id, &filter, pagination)
            .await?;
        let exhausted = page.len() < pagination.size;
        records.extend(page);
        if exhausted {
            return Ok(records);
        }
        pagination = pagination.next();
    }
}

#[instrument(
    level = "trace",
    skip_all,
    fields(work_item_id = %ctx.item_id, attempt = ctx.attempt)
)]
pub async fn process_records(
    machine: ProcessingMachine<(), RecordsCollected>,
    ctx: &mut PipelineContext<'_>,
) -> Result<ProcessingMachine<(), RecordsProcessed>, ProcessingError> {
    mark_close_pending(ctx).await?;

    let records = std::mem::take(&mut ctx.records);
    for record in records {
        process_record(ctx, record).await?;
    }

    machine
        .process_records()
        .map_err(|(_, guard)| map_guard_error("process_records", &guard))
}

/// Saves a pending close on a normal dataset before any raw record is marked
/// processed, so a retry with nothing left to collect still finalizes it.
async fn mark_close_pending(ctx: &mut PipelineContext<'_>) -> Result<(), ProcessingError> {
    if ctx.dataset()?.is_continuous() {
        return Ok(());
    }

    let strategy = ctx.deduplicator()?.name();
    let repository = ctx.repository;
    let dataset = ctx.dataset_mut()?;
    if dataset.start_progress(SequenceOperation::Close, strategy, Utc::now()) {
        *dataset = repository.update_dataset(dataset).await?;
        debug!(dataset_id = %dataset.id, strategy, "close marked pending");
    }
    Ok(())
}

async fn process_record(
    ctx: &mut PipelineContext<'_>,
    record: RawRecord,
) -> Result<(), ProcessingError> {
    let condition = RevisionCondition::from(&record);

    let Some(content) = ctx
        .raw_data
        .get_content(&record.id, Some(condition))
        .await?
    else {
        debug!(
            work_item_id = %ctx.item_id,
            raw_id = %record.id,
            revision = record.revision,
            "raw record changed or vanished; skipping"
        );
        ctx.stats.records_skipped = ctx.stats.records_skipped.saturating_add(1);
        return Ok(());
    };

    let batch = match ctx.services.parse_raw_content(&content, &record.id).await {
        Ok(batch) => batch,
        Err(err) => {
            warn!(
                work_item_id = %ctx.item_id,
                raw_id = %record.id,
                error = %err,
                "raw record could not be parsed; marking processed without data"
            );
            ParsedBatch::default()
        }
    };

    for issue in &batch.issues {
        warn!(
            work_item_id = %ctx.item_id,
            raw_id = %record.id,
            reference = %issue.reference,
            reason = %issue.message,
            "skipping malformed reading"
        );
    }
    ctx.stats.readings_rejected = ctx
        .stats
        .readings_rejected
        .saturating_add(batch.issues.len());

    let dataset = ctx.dataset()?;
    let data: Vec<Datum> = batch
        .data
        .into_iter()
        .map(|parsed| {
            let mut datum = parsed.datum;
            datum.id = format!("{}-{}", record.id, parsed.index);
            datum.user_id = Some(dataset.user_id.clone());
            datum.dataset_id = Some(dataset.id.clone());
            datum.device_id = dataset.device_id.clone();
            datum.provenance = Some(Provenance {
                raw_id: record.id.clone(),
                raw_revision: record.revision,
                reference: format!("/{}", parsed.index),
            });
            datum
        })
        .collect();

    let written = ctx
        .deduplicator()?
        .add_data(ctx.repository, dataset, data)
        .await?;
    ctx.stats.data_written = ctx.stats.data_written.saturating_add(written);

    if ctx
        .raw_data
        .update(&record.id, Some(condition), Utc::now())
        .await?
        .is_none()
    {
        warn!(
            work_item_id = %ctx.item_id,
            raw_id = %record.id,
            revision = record.revision,
            "raw record revision moved during processing; left for the next run"
        );
    }
    ctx.stats.records_processed = ctx.stats.records_processed.saturating_add(1);

    debug!(
        work_item_id = %ctx.item_id,
        raw_id = %record.id,
        written,
        "raw record processed"
    );
    Ok(())
}

#[instrument(
    level = "trace",
    skip_all,
    fields(work_item_id = %ctx.item_id, attempt = ctx.attempt)
)]
pub async fn finalize(
    machine: ProcessingMachine<(), RecordsProcessed>,
    ctx: &mut PipelineContext<'_>,
) -> Result<ProcessingMachine<(), Finalized>, ProcessingError> {
    if ctx.dataset()?.is_continuous() {
        return machine
            .finalize()
            .map_err(|(_, guard)| map_guard_error("finalize", &guard));
    }

    let deduplicator = ctx.deduplicator()?;
    let repository = ctx.repository;
    let services = Arc::clone(ctx.services);
    let item_id = ctx.item_id.clone();
    let dataset = ctx.dataset_mut()?;
    deduplicator.close(repository, dataset).await?;

    info!(
        work_item_id = %item_id,
        dataset_id = %dataset.id,
        strategy = deduplicator.name(),
        "dataset finalized"
    );

    // Runs detached so a torn-down worker still triggers it.
    let user_id = dataset.user_id.clone();
    tokio::spawn(async move {
        let reasons = BTreeSet::from([SummaryReason::DatasetFinalized]);
        if let Err(err) = services.maybe_update_summary(&user_id, reasons).await {
            warn!(user_id = %user_id, error = %err, "summary update failed");
        }
    });

    machine
        .finalize()
        .map_err(|(_, guard)| map_guard_error("finalize", &guard))
}

pub fn skip(
    machine: ProcessingMachine<(), RecordsCollected>,
) -> Result<ProcessingMachine<(), Finalized>, ProcessingError> {
    machine
        .skip()
        .map_err(|(_, guard)| map_guard_error("skip", &guard))
}

fn map_guard_error(event: &'static str, guard: &GuardError) -> ProcessingError {
    ProcessingError::InvalidTransition {
        event,
        detail: format!("{guard:?}"),
    }
}

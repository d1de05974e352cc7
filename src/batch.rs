use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::models::{ProcessResult, SessionIndexEntry};
use crate::pipeline::Pipeline;
use crate::source::{is_eligible, SessionStore};
use crate::state::HighWaterMarks;

/// Options for one batch run.
pub struct BatchOptions {
    /// Worker pool size. Both the LLM and the content store are rate-limited,
    /// so this stays small.
    pub workers: usize,
    /// Checked between dispatches; set by the host to stop selecting new work.
    pub cancel_flag: Option<Arc<AtomicBool>>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            cancel_flag: None,
        }
    }
}

/// Everything a batch produces. `high_water` holds, per project, the maximum
/// `modified` observed among selected sessions regardless of their outcome;
/// the host merges it into its mark store only on orderly completion.
pub struct BatchOutcome {
    pub results: Vec<ProcessResult>,
    pub high_water: BTreeMap<String, String>,
    pub cancelled: bool,
}

/// Summary printed after a batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub selected: usize,
    pub published: usize,
    pub skipped: usize,
    pub failed: usize,
    pub elapsed_secs: f64,
}

impl BatchReport {
    pub fn from_results(results: &[ProcessResult], selected: usize, elapsed_secs: f64) -> Self {
        let mut report = Self {
            selected,
            elapsed_secs,
            ..Default::default()
        };
        for result in results {
            if result.published {
                report.published += 1;
            } else if result
                .skipped_reason
                .as_deref()
                .is_some_and(|r| r.contains("failed"))
            {
                report.failed += 1;
            } else {
                report.skipped += 1;
            }
        }
        report
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Batch complete in {:.1}s", self.elapsed_secs)?;
        writeln!(f, "  selected:   {}", self.selected)?;
        writeln!(f, "  published:  {}", self.published)?;
        writeln!(f, "  skipped:    {}", self.skipped)?;
        writeln!(f, "  failed:     {}", self.failed)
    }
}

/// Gather the sessions a batch should process: eligible index entries across
/// all known projects whose `modified` is strictly above the project's mark,
/// sorted by `modified` ascending. Also returns the per-project maximum
/// `modified` among the selection.
///
/// A project whose index fails to parse is logged and skipped; the batch
/// continues with the rest.
pub fn select_candidates(
    store: &SessionStore,
    marks: &HighWaterMarks,
) -> Result<(Vec<SessionIndexEntry>, BTreeMap<String, String>)> {
    let projects = store.list_projects()?;

    let mut selected = Vec::new();
    let mut high_water: BTreeMap<String, String> = BTreeMap::new();

    for project in projects {
        let index = match store.read_sessions_index(&project) {
            Ok(Some(index)) => index,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(project = %project, "skipping project: {e:#}");
                continue;
            }
        };

        let mark = marks.get(&project);
        for entry in index.entries.into_iter().filter(is_eligible) {
            let modified = match &entry.modified {
                Some(m) => m.clone(),
                None => continue,
            };
            if mark.is_some_and(|m| modified.as_str() <= m) {
                continue;
            }

            let observed = high_water.entry(project.clone()).or_default();
            if observed.as_str() < modified.as_str() {
                *observed = modified.clone();
            }
            selected.push(entry);
        }
    }

    selected.sort_by(|a, b| a.modified.cmp(&b.modified));
    Ok((selected, high_water))
}

/// Run one batch: select candidates, fan them out over a bounded worker pool,
/// and collect the per-session results. Sessions fail independently; only a
/// broken session store aborts the batch.
pub async fn run_batch(
    pipeline: &Pipeline,
    marks: &HighWaterMarks,
    options: &BatchOptions,
) -> Result<BatchOutcome> {
    let start = Instant::now();
    let (selected, high_water) = select_candidates(&pipeline.store, marks)?;
    let total = selected.len();

    if selected.is_empty() {
        tracing::info!("no new sessions to process");
        return Ok(BatchOutcome {
            results: Vec::new(),
            high_water,
            cancelled: false,
        });
    }

    let workers = options.workers.max(1);
    tracing::info!(
        sessions = total,
        workers,
        "processing batch"
    );

    let cancel_flag = options.cancel_flag.clone();
    let results: Vec<ProcessResult> = stream::iter(selected)
        .map(|entry| {
            let cancel_flag = cancel_flag.clone();
            async move {
                if cancel_flag
                    .as_ref()
                    .is_some_and(|f| f.load(Ordering::Relaxed))
                {
                    return None;
                }
                Some(pipeline.process_session(&entry).await)
            }
        })
        .buffer_unordered(workers)
        .filter_map(|result| async move { result })
        .collect()
        .await;

    let cancelled = cancel_flag
        .as_ref()
        .is_some_and(|f| f.load(Ordering::Relaxed));

    let report = BatchReport::from_results(&results, total, start.elapsed().as_secs_f64());
    tracing::info!(
        published = report.published,
        skipped = report.skipped,
        failed = report.failed,
        cancelled,
        "batch finished"
    );

    Ok(BatchOutcome {
        results,
        high_water,
        cancelled,
    })
}

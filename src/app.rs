use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Credentials, ResolvedConfig};
use crate::domain::WorkItem;
use crate::error::BulkError;
use crate::grid::GridSpec;
use crate::nsrdb::{NsrdbClient, RequestParameters, RequestSettings};
use crate::pacing::RateLimiter;
use crate::retry::RetryPolicy;
use crate::store::ArtifactStore;

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions {
    pub force: bool,
    pub dry_run: bool,
    /// Keep only the counters; `BatchReport::items` stays empty.
    pub summary_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Skipped,
    Pending,
    Published,
    Failed,
}

/// Terminal state of one work item after a pass of the batch loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Skipped {
        path: String,
    },
    Pending {
        path: String,
    },
    Published {
        path: String,
        attempts: u32,
        bytes: u64,
    },
    Failed {
        error: String,
        error_record: Option<String>,
    },
}

impl ItemOutcome {
    pub fn status(&self) -> ItemStatus {
        match self {
            ItemOutcome::Skipped { .. } => ItemStatus::Skipped,
            ItemOutcome::Pending { .. } => ItemStatus::Pending,
            ItemOutcome::Published { .. } => ItemStatus::Published,
            ItemOutcome::Failed { .. } => ItemStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub year: i32,
    pub lat: f64,
    pub lon: f64,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub planned: usize,
    pub points: usize,
    pub years: usize,
    pub skipped: usize,
    pub pending: usize,
    pub published: usize,
    pub failed: usize,
    pub started_at: String,
    pub finished_at: String,
    pub items: Vec<ItemReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub planned: usize,
    pub valid: usize,
    pub invalid: usize,
    pub missing: usize,
    pub failures: Vec<FailureEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureEntry {
    pub year: i32,
    pub lat: f64,
    pub lon: f64,
    pub error: String,
    pub error_record: String,
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Planned {
        points: usize,
        years: usize,
        total: usize,
    },
    YearStarted {
        year: i32,
        items: usize,
    },
    Retrying {
        item: WorkItem,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    ItemFinished {
        item: WorkItem,
        status: ItemStatus,
    },
    Finished {
        skipped: usize,
        pending: usize,
        published: usize,
        failed: usize,
    },
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Drives the download of every planned work item.
///
/// Individual item failures are recorded next to the artifact they were
/// meant to produce and never stop the batch.
pub struct App<C: NsrdbClient, L: RateLimiter> {
    store: ArtifactStore,
    grid: GridSpec,
    request: RequestSettings,
    retry: RetryPolicy,
    credentials: Credentials,
    client: C,
    limiter: L,
}

impl<C: NsrdbClient, L: RateLimiter> App<C, L> {
    pub fn new(config: &ResolvedConfig, credentials: Credentials, client: C, limiter: L) -> Self {
        Self {
            store: ArtifactStore::with_marker(config.out_dir.clone(), &config.validity_marker),
            grid: config.grid.clone(),
            request: config.request.clone(),
            retry: config.retry.clone(),
            credentials,
            client,
            limiter,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn run(&self, options: FetchOptions, sink: &dyn ProgressSink) -> Result<BatchReport, BulkError> {
        let started_at = iso_timestamp();
        let points = self.grid.points().len();
        let years = self.grid.years().len();
        let planned = self.grid.planned_items();

        info!(planned, points, years, dry_run = options.dry_run, "planned requests");
        sink.event(ProgressEvent::Planned {
            points,
            years,
            total: planned,
        });

        if !options.dry_run {
            self.store.ensure_root()?;
        }

        let mut report = BatchReport {
            planned,
            points,
            years,
            skipped: 0,
            pending: 0,
            published: 0,
            failed: 0,
            started_at,
            finished_at: String::new(),
            items: Vec::new(),
        };
        let mut current_year = None;
        for item in self.grid.work_items() {
            if current_year != Some(item.year) {
                current_year = Some(item.year);
                sink.event(ProgressEvent::YearStarted {
                    year: item.year,
                    items: points,
                });
            }

            let outcome = self.process_item(&item, options, sink);
            let status = outcome.status();
            match status {
                ItemStatus::Skipped => report.skipped += 1,
                ItemStatus::Pending => report.pending += 1,
                ItemStatus::Published => report.published += 1,
                ItemStatus::Failed => report.failed += 1,
            }
            sink.event(ProgressEvent::ItemFinished { item, status });
            if !options.summary_only {
                report.items.push(ItemReport {
                    year: item.year,
                    lat: item.point.lat,
                    lon: item.point.lon,
                    outcome,
                });
            }
        }
        report.finished_at = iso_timestamp();

        info!(
            skipped = report.skipped,
            published = report.published,
            failed = report.failed,
            "batch finished"
        );
        sink.event(ProgressEvent::Finished {
            skipped: report.skipped,
            pending: report.pending,
            published: report.published,
            failed: report.failed,
        });
        Ok(report)
    }

    /// Handles a single work item: skip, fetch with retry, or record the failure.
    pub fn process_item(
        &self,
        item: &WorkItem,
        options: FetchOptions,
        sink: &dyn ProgressSink,
    ) -> ItemOutcome {
        let path = self.store.path_for(item);

        if !options.force && self.store.exists_and_valid(item) {
            debug!(%item, "artifact already valid; skipping");
            return ItemOutcome::Skipped {
                path: path.to_string(),
            };
        }

        if options.dry_run {
            return ItemOutcome::Pending {
                path: path.to_string(),
            };
        }

        match self.store.discard_invalid(item) {
            Ok(true) => warn!(%item, path = %path, "removed invalid artifact"),
            Ok(false) => {}
            Err(err) => return self.fail(item, err.to_string()),
        }
        if let Err(err) = self.store.ensure_year_dir(item.year) {
            return self.fail(item, err.to_string());
        }

        let params = RequestParameters::build(item, &self.request, &self.credentials);
        let staged = self.store.staging_path(item);
        let result = self.retry.run(
            |attempt| {
                self.limiter.acquire();
                debug!(%item, attempt, "fetching");
                let bytes = self.client.fetch(&params, staged.as_std_path())?;
                let published = self.store.publish(&staged, item)?;
                Ok((published, bytes, attempt))
            },
            |attempt, delay, err| {
                sink.event(ProgressEvent::Retrying {
                    item: *item,
                    attempt,
                    delay,
                    error: err.to_string(),
                })
            },
        );

        match result {
            Ok((published, bytes, attempts)) => {
                debug!(%item, attempts, bytes, "published");
                ItemOutcome::Published {
                    path: published.to_string(),
                    attempts,
                    bytes,
                }
            }
            Err(err) => {
                if let Err(cleanup) = self.store.discard_staging(item) {
                    warn!(%item, error = %cleanup, "failed to remove staging file");
                }
                self.fail(item, err.to_string())
            }
        }
    }

    fn fail(&self, item: &WorkItem, error: String) -> ItemOutcome {
        let error_record = match self.store.write_error_record(item, &error) {
            Ok(path) => Some(path.to_string()),
            Err(err) => {
                warn!(%item, error = %err, "failed to write error record");
                None
            }
        };
        debug!(%item, %error, "item failed");
        ItemOutcome::Failed {
            error,
            error_record,
        }
    }
}

/// Inventory of the output tree against the grid, without touching the network.
pub fn status(grid: &GridSpec, store: &ArtifactStore) -> StatusResult {
    let mut result = StatusResult {
        planned: grid.planned_items(),
        valid: 0,
        invalid: 0,
        missing: 0,
        failures: Vec::new(),
    };

    for item in grid.work_items() {
        if store.exists_and_valid(&item) {
            result.valid += 1;
            continue;
        }
        if store.artifact_exists(&item) {
            result.invalid += 1;
        } else {
            result.missing += 1;
        }
        if let Some(error) = store.read_error_record(&item) {
            result.failures.push(FailureEntry {
                year: item.year,
                lat: item.point.lat,
                lon: item.point.lon,
                error: error.trim().to_string(),
                error_record: store.error_path_for(&item).to_string(),
            });
        }
    }
    result
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

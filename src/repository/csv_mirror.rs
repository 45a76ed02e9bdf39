use crate::error::{ControlError, Result};
use crate::global_variables::{EMERGENCY_LOG_CSV, SIGNAL_STATE_CSV};
use crate::models::emergency::{EmergencyEvent, EmergencyRoute, EmergencyStatus};
use crate::models::intersection::{Intersection, IntersectionId};
use crate::models::traffic::TrafficSample;
use crate::repository::TrafficRepository;
use crate::shared_data::{EmergencyLogRecord, SignalBatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Forwards to an inner repository and appends every signal batch and
/// emergency log change to csv files in `dir`.
pub struct CsvMirrorRepository<R> {
    inner: R,
    dir: PathBuf,
}

impl<R: TrafficRepository> CsvMirrorRepository<R> {
    pub fn new(inner: R, dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            ControlError::Persistence(format!("creating log dir {}: {}", dir.display(), e))
        })?;
        Ok(Self { inner, dir })
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn signal_state_path(&self) -> PathBuf {
        self.dir.join(SIGNAL_STATE_CSV)
    }

    pub fn emergency_log_path(&self) -> PathBuf {
        self.dir.join(EMERGENCY_LOG_CSV)
    }

    async fn append<T>(&self, path: PathBuf, records: Vec<T>) -> Result<()>
    where
        T: Serialize + Send + 'static,
    {
        tokio::task::spawn_blocking(move || append_to_csv(&path, &records))
            .await
            .map_err(|e| ControlError::Persistence(format!("csv writer task failed: {}", e)))?
    }
}

// Appends records to a csv file, writing the header only when the file is new.
fn append_to_csv<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let to_persistence =
        |e: &dyn std::fmt::Display| ControlError::Persistence(format!("{}: {}", path.display(), e));

    let file_exists = path.exists();
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| to_persistence(&e))?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(!file_exists)
        .from_writer(file);
    for record in records {
        wtr.serialize(record).map_err(|e| to_persistence(&e))?;
    }
    wtr.flush().map_err(|e| to_persistence(&e))?;
    Ok(())
}

#[async_trait]
impl<R: TrafficRepository> TrafficRepository for CsvMirrorRepository<R> {
    async fn fetch_intersections(&self) -> Result<Vec<Intersection>> {
        self.inner.fetch_intersections().await
    }

    async fn fetch_approach_traffic(&self) -> Result<Vec<TrafficSample>> {
        self.inner.fetch_approach_traffic().await
    }

    async fn fetch_predefined_route(
        &self,
        start: IntersectionId,
        end: IntersectionId,
    ) -> Result<Option<Vec<IntersectionId>>> {
        self.inner.fetch_predefined_route(start, end).await
    }

    async fn fetch_emergency_routes(&self) -> Result<Vec<EmergencyRoute>> {
        self.inner.fetch_emergency_routes().await
    }

    async fn record_traffic_sample(&self, sample: TrafficSample) -> Result<()> {
        self.inner.record_traffic_sample(sample).await
    }

    async fn persist_signal_state(&self, batch: &SignalBatch) -> Result<()> {
        self.inner.persist_signal_state(batch).await?;
        self.append(self.signal_state_path(), batch.to_records()).await
    }

    async fn append_emergency_log(&self, event: &EmergencyEvent) -> Result<()> {
        self.inner.append_emergency_log(event).await?;
        self.append(self.emergency_log_path(), vec![EmergencyLogRecord::opened(event)])
            .await
    }

    async fn update_emergency_log(
        &self,
        event_id: u64,
        status: EmergencyStatus,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.inner.update_emergency_log(event_id, status, at).await?;
        self.append(
            self.emergency_log_path(),
            vec![EmergencyLogRecord::status_change(event_id, status, at)],
        )
        .await
    }
}

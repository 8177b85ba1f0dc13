//! Incremental backfill of daily archives
//!
//! For every sensor the engine walks backwards from today, one calendar day
//! per step, until it passes the day of the sensor's first reading. Days
//! whose archive already exists are skipped without being fetched or
//! verified, days without readings produce no file, every other day is
//! serialized, wrapped by the stream transform and uploaded.
//!
//! A failing sensor never stops its siblings; the outcome of each sensor is
//! collected in the [`SyncReport`].

use crate::database::DataSource;
use crate::error::{SyncError, SyncResult};
use crate::models::{Controller, Sensor, SensorDataRecord, TimeRange};
use crate::services::archive_store::{archive_days, ArchiveStore};
use crate::services::serializers::SerializerFormat;
use crate::services::stream_cipher::StreamTransform;
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Result of syncing one sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorOutcome {
    /// The sensor has no readings at all
    NoData,
    Synced {
        uploaded: usize,
        skipped_existing: usize,
        empty_days: usize,
    },
}

#[derive(Debug)]
pub struct SensorReport {
    pub controller_id: String,
    pub sensor_id: String,
    pub result: SyncResult<SensorOutcome>,
}

/// Everything that happened during one run
#[derive(Debug, Default)]
pub struct SyncReport {
    pub sensors: Vec<SensorReport>,
    /// Controllers whose sensors could not even be listed
    pub controller_failures: Vec<(String, SyncError)>,
}

impl SyncReport {
    /// Archives uploaded across all sensors
    pub fn uploaded(&self) -> usize {
        self.sensors
            .iter()
            .map(|report| match &report.result {
                Ok(SensorOutcome::Synced { uploaded, .. }) => *uploaded,
                _ => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> usize {
        self.sensors.iter().filter(|r| r.result.is_err()).count() + self.controller_failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures() == 0
    }
}

/// Backfills archives for every sensor of a data source
#[derive(Clone)]
pub struct SyncEngine {
    source: Arc<dyn DataSource>,
    store: ArchiveStore,
    format: SerializerFormat,
    transform: StreamTransform,
    workers: usize,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn DataSource>,
        store: ArchiveStore,
        format: SerializerFormat,
        transform: StreamTransform,
    ) -> Self {
        Self {
            source,
            store,
            format,
            transform,
            workers: 1,
        }
    }

    /// Number of sensors of one controller synced concurrently
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Syncs everything up to the current local day
    pub async fn run(&self) -> SyncResult<SyncReport> {
        self.run_at(chrono::Local::now().date_naive()).await
    }

    /// Syncs everything with `today` as the first day of the backfill
    ///
    /// Only a failure to list the controllers is returned as an error;
    /// anything below that is recorded in the report.
    pub async fn run_at(&self, today: NaiveDate) -> SyncResult<SyncReport> {
        let controllers = self.source.list_controllers()?;
        log::info!(
            "Syncing {} controllers to {} ({}, {})",
            controllers.len(),
            self.store.describe(),
            self.format,
            if self.transform.is_encrypting() {
                "encrypted"
            } else {
                "plain"
            }
        );

        let mut report = SyncReport::default();
        for controller in controllers {
            self.sync_controller(&controller, today, &mut report).await;
        }

        log::info!(
            "Sync finished: {} archives uploaded, {} failures",
            report.uploaded(),
            report.failures()
        );
        Ok(report)
    }

    async fn sync_controller(&self, controller: &Controller, today: NaiveDate, report: &mut SyncReport) {
        let sensors = match self.source.list_sensors(controller) {
            Ok(sensors) => sensors,
            Err(e) => {
                log::error!("Controller {}: listing sensors failed: {}", controller.id, e);
                report.controller_failures.push((controller.id.clone(), e));
                return;
            }
        };

        // Sensor tasks assume their parent directory exists
        if let Err(e) = self.store.prepare_controller(&controller.id).await {
            log::error!("Controller {}: {}", controller.id, e);
            for sensor in sensors {
                report.sensors.push(SensorReport {
                    controller_id: controller.id.clone(),
                    sensor_id: sensor.id,
                    result: Err(SyncError::Connection(format!(
                        "controller directory unavailable: {}",
                        e
                    ))),
                });
            }
            return;
        }

        log::info!(
            "Controller {} ({}): {} sensors",
            controller.id,
            controller.name,
            sensors.len()
        );

        // One task per sensor, so no two tasks touch the same directory
        let mut tasks = JoinSet::new();
        for sensor in sensors {
            while tasks.len() >= self.workers {
                if let Some(joined) = tasks.join_next().await {
                    record(report, &controller.id, joined);
                }
            }
            let engine = self.clone();
            tasks.spawn(async move {
                let result = engine.sync_sensor(&sensor, today).await;
                (sensor, result)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            record(report, &controller.id, joined);
        }
    }

    /// Backfills one sensor from `today` down to its first reading
    pub async fn sync_sensor(&self, sensor: &Sensor, today: NaiveDate) -> SyncResult<SensorOutcome> {
        let files = self.store.prepare_sensor(sensor).await?;

        let Some(first) = self.source.first_record_timestamp(&sensor.id)? else {
            log::debug!("Sensor {}: no data", sensor.id);
            return Ok(SensorOutcome::NoData);
        };
        let first_day = first.date();
        let existing = archive_days(&files);

        let mut uploaded = 0;
        let mut skipped_existing = 0;
        let mut empty_days = 0;

        let mut day = today;
        while day >= first_day {
            if existing.contains_key(&day) {
                log::debug!("Sensor {}: {} already archived", sensor.id, day);
                skipped_existing += 1;
            } else {
                let records = self
                    .source
                    .records_in_range(&sensor.id, &TimeRange::day(day))?;
                if records.is_empty() {
                    empty_days += 1;
                } else {
                    log::info!(
                        "Converting {} records of sensor {} for {}",
                        records.len(),
                        sensor.id,
                        day
                    );
                    let bytes = self.render(&records)?;
                    self.store
                        .upload_archive(&sensor.controller_id, &sensor.id, day, bytes)
                        .await?;
                    uploaded += 1;
                }
            }

            day = match day.pred_opt() {
                Some(previous) => previous,
                None => break,
            };
        }

        Ok(SensorOutcome::Synced {
            uploaded,
            skipped_existing,
            empty_days,
        })
    }

    /// Serializes a day and wraps it with a fresh transform
    fn render(&self, records: &[SensorDataRecord]) -> SyncResult<Vec<u8>> {
        let mut writer = self.transform.writer(Vec::new());
        self.format.serializer().serialize(&mut writer, records)?;
        Ok(writer.finish()?)
    }
}

fn record(
    report: &mut SyncReport,
    controller_id: &str,
    joined: Result<(Sensor, SyncResult<SensorOutcome>), tokio::task::JoinError>,
) {
    match joined {
        Ok((sensor, result)) => {
            match &result {
                Ok(SensorOutcome::NoData) => log::info!("Sensor {}: nothing to sync", sensor.id),
                Ok(SensorOutcome::Synced { uploaded, .. }) => {
                    log::info!("Sensor {}: {} archives uploaded", sensor.id, uploaded)
                }
                Err(e) => log::error!("Sensor {} failed: {}", sensor.id, e),
            }
            report.sensors.push(SensorReport {
                controller_id: controller_id.to_string(),
                sensor_id: sensor.id,
                result,
            });
        }
        Err(e) => {
            log::error!("Controller {}: sensor task aborted: {}", controller_id, e);
            report
                .controller_failures
                .push((controller_id.to_string(), SyncError::Other(e.to_string())));
        }
    }
}

//! Telemetry sinks for per-epoch summaries.
//!
//! The trainer starts the sink once during construction and logs one record
//! per epoch. A sink that fails to start aborts construction.

use crate::config::{TelemetryConfig, TelemetryKind};
use crate::error::{Result, TrainError};
use crate::training::stats::EpochSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Identity of one training session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSession {
    pub run_id: String,
    pub project: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    pub start_epoch: usize,
    pub max_epoch: usize,
    pub started_at: DateTime<Utc>,
}

impl RunSession {
    pub fn new(project: impl Into<String>, start_epoch: usize, max_epoch: usize) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            project: project.into(),
            entity: None,
            start_epoch,
            max_epoch,
            started_at: Utc::now(),
        }
    }

    pub fn with_entity(mut self, entity: Option<String>) -> Self {
        self.entity = entity;
        self
    }
}

/// One per-epoch record as emitted by the file and remote sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRecord {
    pub run_id: String,
    pub epoch: usize,
    pub timestamp: DateTime<Utc>,
    pub metrics: EpochSummary,
}

/// Side channel for per-epoch scalar summaries. Never consulted for control.
pub trait TelemetrySink: Send {
    fn start(&mut self, session: &RunSession) -> Result<()>;

    fn log_epoch(&mut self, epoch: usize, summary: &EpochSummary) -> Result<()>;

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn start(&mut self, _session: &RunSession) -> Result<()> {
        Ok(())
    }

    fn log_epoch(&mut self, _epoch: usize, _summary: &EpochSummary) -> Result<()> {
        Ok(())
    }
}

/// Appends one JSON line per epoch to a local file.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    run_id: Option<String>,
    file: Option<File>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            run_id: None,
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TelemetrySink for JsonlSink {
    fn start(&mut self, session: &RunSession) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                TrainError::telemetry(format!("cannot open {}: {e}", self.path.display()))
            })?;
        self.file = Some(file);
        self.run_id = Some(session.run_id.clone());
        Ok(())
    }

    fn log_epoch(&mut self, epoch: usize, summary: &EpochSummary) -> Result<()> {
        let (Some(file), Some(run_id)) = (self.file.as_mut(), self.run_id.as_ref()) else {
            return Err(TrainError::telemetry("sink used before start"));
        };
        let record = EpochRecord {
            run_id: run_id.clone(),
            epoch,
            timestamp: Utc::now(),
            metrics: summary.clone(),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct OpenRunResponse {
    run_id: String,
}

/// Reports to an experiment-tracking service over HTTP.
///
/// `POST {endpoint}/runs` opens the session and must answer with the
/// server-side run id; `POST {endpoint}/runs/{id}/log` carries each epoch.
pub struct RemoteSink {
    endpoint: String,
    client: reqwest::blocking::Client,
    run_id: Option<String>,
}

impl RemoteSink {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
            run_id: None,
        })
    }
}

impl TelemetrySink for RemoteSink {
    fn start(&mut self, session: &RunSession) -> Result<()> {
        let url = format!("{}/runs", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(session)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| TrainError::telemetry(format!("cannot open run at {url}: {e}")))?;
        let opened: OpenRunResponse = response
            .json()
            .map_err(|e| TrainError::telemetry(format!("bad response from {url}: {e}")))?;
        tracing::info!(run_id = %opened.run_id, "Telemetry session started");
        self.run_id = Some(opened.run_id);
        Ok(())
    }

    fn log_epoch(&mut self, epoch: usize, summary: &EpochSummary) -> Result<()> {
        let run_id = self
            .run_id
            .as_deref()
            .ok_or_else(|| TrainError::telemetry("sink used before start"))?;
        let record = EpochRecord {
            run_id: run_id.to_string(),
            epoch,
            timestamp: Utc::now(),
            metrics: summary.clone(),
        };
        self.client
            .post(format!("{}/runs/{run_id}/log", self.endpoint))
            .json(&record)
            .send()?
            .error_for_status()?;
        Ok(())
    }
}

/// Build the sink selected by configuration.
pub fn sink_from_config(config: &TelemetryConfig) -> Result<Box<dyn TelemetrySink>> {
    match config.kind {
        TelemetryKind::None => Ok(Box::new(NoopSink)),
        TelemetryKind::File => {
            let path = config
                .path
                .clone()
                .ok_or_else(|| TrainError::invalid_config("telemetry.path is required"))?;
            Ok(Box::new(JsonlSink::new(path)))
        }
        TelemetryKind::Remote => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| TrainError::invalid_config("telemetry.endpoint is required"))?;
            Ok(Box::new(RemoteSink::new(endpoint)?))
        }
    }
}

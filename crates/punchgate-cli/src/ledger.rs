//! JSON-lines punch ledger used as the save collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use punchgate_core::{PunchNavigator, PunchSaver, PunchType, SaveError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub recorded_at: DateTime<Utc>,
    pub punch_type: PunchType,
    /// The still as a data URL.
    pub image: String,
}

pub struct JsonlLedger {
    path: PathBuf,
}

impl JsonlLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every entry in file order. A missing file is an empty ledger.
    pub fn entries(&self) -> anyhow::Result<Vec<LedgerEntry>> {
        let src = match std::fs::read_to_string(&self.path) {
            Ok(src) => src,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        src.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str::<LedgerEntry>(line).map_err(anyhow::Error::from))
            .collect()
    }

    pub fn summary(&self) -> anyhow::Result<LedgerSummary> {
        let entries = self.entries()?;
        let count = |t: PunchType| entries.iter().filter(|e| e.punch_type == t).count();
        Ok(LedgerSummary {
            ledger: self.path.display().to_string(),
            total: entries.len(),
            clock_in: count(PunchType::In),
            clock_out: count(PunchType::Out),
            last: entries.last().map(|e| LastPunch {
                punch_type: e.punch_type,
                recorded_at: e.recorded_at,
            }),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub ledger: String,
    pub total: usize,
    pub clock_in: usize,
    pub clock_out: usize,
    pub last: Option<LastPunch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastPunch {
    pub punch_type: PunchType,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait]
impl PunchSaver for JsonlLedger {
    async fn save(&self, image_data_url: &str, punch_type: PunchType) -> Result<(), SaveError> {
        let entry = LedgerEntry {
            recorded_at: Utc::now(),
            punch_type,
            image: image_data_url.to_string(),
        };
        let mut line =
            serde_json::to_string(&entry).map_err(|e| SaveError::Rejected(e.to_string()))?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SaveError::Failed(format!("{}: {e}", self.path.display())))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| SaveError::Failed(e.to_string()))?;
        file.flush().await.map_err(|e| SaveError::Failed(e.to_string()))?;

        tracing::debug!(path = %self.path.display(), bytes = line.len(), "ledger entry appended");
        Ok(())
    }
}

/// Reports a recorded punch on stdout.
pub struct TerminalNavigator;

impl PunchNavigator for TerminalNavigator {
    fn punch_succeeded(&self, punch_type: PunchType) {
        println!("Punch {punch_type} recorded.");
    }
}

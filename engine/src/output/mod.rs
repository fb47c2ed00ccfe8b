//! Session artifact persistence
//!
//! Writes the final summary text, the structured data JSON, and one row per
//! session into the shared meetings CSV. Summary/data writes go through a
//! temp file + rename; CSV appends hold the process-wide writer lock so the
//! header is written exactly once and rows never interleave.


use chrono::{DateTime, Local};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::summarizer::types::MeetingData;

/// Process-wide lock serializing CSV writes across sessions.
pub type CsvLock = Arc<tokio::sync::Mutex<()>>;

/// Fixed CSV header; column order is part of the wire contract.
pub const CSV_HEADER: &str = "meeting_date,meeting_time,timestamp_file,contact_name,contact_role,\
contact_location,contact_is_decision_maker,contact_tenure,company_name,company_aum,company_icp,\
company_location,company_is_client,company_competitor_products,company_strategies_of_interest,\
deal_ticket_size,deal_products_of_interest,total_contacts,total_companies,total_deals";

/// Resolved locations of the artifacts written for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactPaths {
    pub summary_path: Option<PathBuf>,
    pub data_path: Option<PathBuf>,
    pub csv_path: Option<PathBuf>,
}

/// Per-session artifact writer.
pub struct OutputWriter {
    output_dir: PathBuf,
    csv_path: PathBuf,
    append_csv: bool,
    meeting_folders: bool,
}

impl OutputWriter {
    pub fn new(output_dir: &str, csv_path: &str, append_csv: bool, meeting_folders: bool) -> Self {
        Self {
            output_dir: expand_tilde(output_dir),
            csv_path: expand_tilde(csv_path),
            append_csv,
            meeting_folders,
        }
    }

    /// Persist all artifacts for a stopped session.
    ///
    /// Paths already written are reported even when a later write fails; the
    /// caller surfaces the error alongside whatever landed on disk.
    pub async fn write_artifacts(
        &self,
        summary: &str,
        data: &MeetingData,
        stopped_at: DateTime<Local>,
        csv_lock: &CsvLock,
    ) -> (ArtifactPaths, Result<()>) {
        let mut paths = ArtifactPaths::default();

        let (dir, summary_name, data_name, stamp) = self.resolve_names(data, stopped_at);

        if let Err(err) = fs::create_dir_all(&dir) {
            return (paths, Err(write_failure(&dir, err)));
        }

        let summary_path = dir.join(summary_name);
        let mut summary_text = summary.to_string();
        if !summary_text.ends_with('\n') {
            summary_text.push('\n');
        }
        if let Err(err) = write_atomic(&summary_path, summary_text.as_bytes()) {
            return (paths, Err(err));
        }
        paths.summary_path = Some(summary_path);

        let data_path = dir.join(data_name);
        let json = match serde_json::to_string_pretty(data) {
            Ok(json) => json,
            Err(err) => return (paths, Err(EngineError::from(err))),
        };
        if let Err(err) = write_atomic(&data_path, json.as_bytes()) {
            return (paths, Err(err));
        }
        paths.data_path = Some(data_path);

        let row = csv_row(data, stopped_at, &stamp);
        if let Err(err) = self.write_csv_row(&row, csv_lock).await {
            return (paths, Err(err));
        }
        paths.csv_path = Some(self.csv_path.clone());

        info!(
            summary = %paths.summary_path.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
            csv = %self.csv_path.display(),
            "session artifacts written"
        );

        (paths, Ok(()))
    }

    /// Best-effort summary write used when a session is aborted mid-flight.
    pub fn write_partial_summary(
        &self,
        text: &str,
        stopped_at: DateTime<Local>,
    ) -> Option<PathBuf> {
        if text.trim().is_empty() {
            return None;
        }
        if fs::create_dir_all(&self.output_dir).is_err() {
            return None;
        }
        let stamp = stopped_at.format("%Y%m%d_%H%M%S").to_string();
        let path = self.output_dir.join(format!("summary_{stamp}_partial.txt"));
        match write_atomic(&path, format!("{}\n", text.trim_end()).as_bytes()) {
            Ok(()) => Some(path),
            Err(err) => {
                warn!(error = %err, "partial summary write failed");
                None
            }
        }
    }

    fn resolve_names(
        &self,
        data: &MeetingData,
        stopped_at: DateTime<Local>,
    ) -> (PathBuf, String, String, String) {
        let stamp = stopped_at.format("%Y%m%d_%H%M%S").to_string();

        if self.meeting_folders {
            if let Some(folder) = meeting_folder_name(data, stopped_at) {
                return (
                    self.output_dir.join(folder),
                    "summary.txt".to_string(),
                    "data.json".to_string(),
                    stamp,
                );
            }
        }

        (
            self.output_dir.clone(),
            format!("summary_{stamp}.txt"),
            format!("data_{stamp}.json"),
            stamp,
        )
    }

    async fn write_csv_row(&self, row: &str, csv_lock: &CsvLock) -> Result<()> {
        let _guard = csv_lock.lock().await;

        if let Some(parent) = self.csv_path.parent() {
            fs::create_dir_all(parent).map_err(|e| write_failure(parent, e))?;
        }

        if self.append_csv {
            let needs_header = match fs::metadata(&self.csv_path) {
                Ok(meta) => meta.len() == 0,
                Err(_) => true,
            };

            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.csv_path)
                .map_err(|e| write_failure(&self.csv_path, e))?;

            // One write syscall per row keeps concurrent appenders whole.
            let mut payload = String::new();
            if needs_header {
                payload.push_str(CSV_HEADER);
                payload.push('\n');
            }
            payload.push_str(row);
            payload.push('\n');

            file.write_all(payload.as_bytes())
                .map_err(|e| write_failure(&self.csv_path, e))?;
            file.flush().map_err(|e| write_failure(&self.csv_path, e))?;
        } else {
            let content = format!("{CSV_HEADER}\n{row}\n");
            write_atomic(&self.csv_path, content.as_bytes())?;
        }

        Ok(())
    }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Write a file via temp + rename so readers never see a partial artifact.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");

    let write_result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(write_failure(path, err));
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        write_failure(path, e)
    })
}

fn write_failure(path: &Path, err: std::io::Error) -> EngineError {
    EngineError::OutputWriteFailure {
        message: format!("{}: {}", path.display(), err),
    }
}

/// Folder name `YYYY-MM-DD Company - Contact` from the primary extracted
/// entities; `None` when neither is present.
fn meeting_folder_name(data: &MeetingData, stopped_at: DateTime<Local>) -> Option<String> {
    let company = data
        .companies
        .first()
        .and_then(|c| c.name.as_deref())
        .map(sanitize_component);
    let contact = data
        .contacts
        .first()
        .and_then(|c| c.name.as_deref())
        .map(sanitize_component);

    let date = stopped_at.format("%Y-%m-%d");
    match (company, contact) {
        (Some(company), Some(contact)) => Some(format!("{date} {company} - {contact}")),
        (Some(company), None) => Some(format!("{date} {company}")),
        (None, Some(contact)) => Some(format!("{date} {contact}")),
        (None, None) => None,
    }
}

/// Strip path separators and control characters from a name component.
fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Build the 20-column CSV row for one session.
fn csv_row(data: &MeetingData, stopped_at: DateTime<Local>, stamp: &str) -> String {
    let contact = data.contacts.first();
    let company = data.companies.first();
    let deal = data.deals.first();

    let fields: Vec<String> = vec![
        stopped_at.format("%Y-%m-%d").to_string(),
        stopped_at.format("%H:%M:%S").to_string(),
        stamp.to_string(),
        opt_str(contact.and_then(|c| c.name.as_deref())),
        opt_str(contact.and_then(|c| c.role.as_deref())),
        opt_str(contact.and_then(|c| c.location.as_deref())),
        opt_bool(contact.and_then(|c| c.is_decision_maker)),
        opt_str(contact.and_then(|c| c.tenure_duration.as_deref())),
        opt_str(company.and_then(|c| c.name.as_deref())),
        opt_str(company.and_then(|c| c.aum.as_deref())),
        company
            .and_then(|c| c.icp_classification)
            .map(|v| v.to_string())
            .unwrap_or_default(),
        opt_str(company.and_then(|c| c.location.as_deref())),
        opt_bool(company.and_then(|c| c.is_client)),
        join_list(company.map(|c| c.competitor_products.as_slice())),
        join_list(company.map(|c| c.strategies_of_interest.as_slice())),
        opt_str(deal.and_then(|d| d.ticket_size.as_deref())),
        join_list(deal.map(|d| d.products_of_interest.as_slice())),
        data.contacts.len().to_string(),
        data.companies.len().to_string(),
        data.deals.len().to_string(),
    ];

    fields
        .iter()
        .map(|f| csv_escape(f))
        .collect::<Vec<_>>()
        .join(",")
}

fn opt_str(value: Option<&str>) -> String {
    value.unwrap_or_default().to_string()
}

fn opt_bool(value: Option<bool>) -> String {
    match value {
        Some(true) => "true".to_string(),
        Some(false) => "false".to_string(),
        None => String::new(),
    }
}

/// List-valued cells are comma-separated inside the cell.
fn join_list(values: Option<&[String]>) -> String {
    values.unwrap_or_default().join(", ")
}

/// Quote a field when it contains a comma, quote, or newline.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

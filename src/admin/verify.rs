use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::admin::error::require_root;
use crate::admin::Result;
use crate::primitives::io::{decode_record, decode_session_dir, RecordName};

const MAX_FINDINGS: usize = 32;

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Something unexpected that does not affect readable records.
    Warning,
    /// A record that the store would treat as missing.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Path of the offending file or directory, relative to the root.
    pub path: String,
    /// Human-readable description of the issue.
    pub message: String,
}

/// Statistics collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Session directories scanned.
    pub sessions: u64,
    /// Record files scanned.
    pub records: u64,
    /// Records whose header and checksum validated.
    pub valid_records: u64,
    /// Left-over temporary files from interrupted writes.
    pub temp_files: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// Whether every record validated.
    pub success: bool,
    /// Issues discovered, capped at a fixed number.
    pub findings: Vec<VerifyFinding>,
    /// Total number of issues, including those not listed.
    pub finding_count: u64,
    /// What was examined.
    pub counts: VerifyCounts,
}

/// Checks every record under `root`.
///
/// Each file must carry a well-formed name and a header whose length and
/// checksum match the payload. Stray temporary files are reported as warnings.
pub fn verify(root: impl AsRef<Path>) -> Result<VerifyReport> {
    let root = root.as_ref();
    require_root(root)?;
    let mut report = Report::default();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let dir_name = entry.file_name().to_string_lossy().into_owned();
        if !entry.file_type()?.is_dir() || decode_session_dir(&dir_name).is_none() {
            report.push(VerifySeverity::Warning, &dir_name, "not a session directory");
            continue;
        }
        report.counts.sessions += 1;
        for file in fs::read_dir(entry.path())? {
            let file = file?;
            let file_name = file.file_name().to_string_lossy().into_owned();
            let rel = format!("{dir_name}/{file_name}");
            if file_name.ends_with(".tmp") {
                report.counts.temp_files += 1;
                report.push(VerifySeverity::Warning, &rel, "interrupted write left a temp file");
                continue;
            }
            if RecordName::parse(&file_name).is_none() {
                report.push(VerifySeverity::Warning, &rel, "unrecognized file name");
                continue;
            }
            report.counts.records += 1;
            let image = fs::read(file.path())?;
            match decode_record(&image) {
                Ok(_) => report.counts.valid_records += 1,
                Err(reason) => report.push(VerifySeverity::Error, &rel, reason.to_string()),
            }
        }
    }

    let success = report.counts.records == report.counts.valid_records;
    Ok(VerifyReport {
        success,
        findings: report.findings,
        finding_count: report.total,
        counts: report.counts,
    })
}

#[derive(Default)]
struct Report {
    findings: Vec<VerifyFinding>,
    total: u64,
    counts: VerifyCounts,
}

impl Report {
    fn push(&mut self, severity: VerifySeverity, path: &str, message: impl Into<String>) {
        self.total += 1;
        if self.findings.len() < MAX_FINDINGS {
            self.findings.push(VerifyFinding {
                severity,
                path: path.to_owned(),
                message: message.into(),
            });
        }
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Job records
//!
//! A `JobRecord` is one captured print job. Records are append-only: once the
//! catalog returns one, it never changes. Document classification lives here
//! too since it is a pure function over the received bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Universal Exit Language sequence that brackets PJL jobs.
pub const UEL: &[u8] = b"\x1b%-12345X";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    PostScript,
    Pcl,
    Unknown,
}

impl DocumentKind {
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::PostScript => "ps",
            DocumentKind::Pcl => "pcl",
            DocumentKind::Unknown => "prn",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "application/pdf",
            DocumentKind::PostScript => "application/postscript",
            DocumentKind::Pcl => "application/vnd.hp-pcl",
            DocumentKind::Unknown => "application/octet-stream",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocumentKind::Pdf => "PDF",
            DocumentKind::PostScript => "PostScript",
            DocumentKind::Pcl => "PCL",
            DocumentKind::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    /// Transport broke after payload bytes arrived; the partial payload was kept.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: u64,
    pub received_at: DateTime<Utc>,
    pub source_address: SocketAddr,
    pub kind: DocumentKind,
    pub page_estimate: u32,
    pub size_bytes: u64,
    /// Relative to the catalog directory
    pub artifact_path: PathBuf,
    pub status: JobStatus,
}

/// Everything the catalog needs to persist a job. The id and artifact name are
/// assigned by the catalog.
#[derive(Debug, Clone)]
pub struct JobDraft {
    pub received_at: DateTime<Utc>,
    pub source_address: SocketAddr,
    pub status: JobStatus,
    pub payload: Vec<u8>,
}

impl JobDraft {
    pub fn new(source_address: SocketAddr, payload: Vec<u8>, status: JobStatus) -> Self {
        Self {
            received_at: Utc::now(),
            source_address,
            status,
            payload,
        }
    }
}

/// Result of classifying a received job stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: DocumentKind,
    pub page_estimate: u32,
}

/// Remove UEL sequences and `@PJL` command lines, leaving the document bytes.
pub fn strip_job_control(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    let mut at_line_start = true;

    while i < data.len() {
        if data[i..].starts_with(UEL) {
            i += UEL.len();
            at_line_start = true;
            continue;
        }
        if at_line_start && data[i..].starts_with(b"@PJL") {
            match data[i..].iter().position(|&b| b == b'\n') {
                Some(end) => i += end + 1,
                None => i = data.len(),
            }
            continue;
        }
        let byte = data[i];
        at_line_start = byte == b'\n';
        out.push(byte);
        i += 1;
    }

    out
}

/// True when nothing but job-control framing and whitespace was received.
/// Drivers pad PJL status exchanges with blank lines; those never become jobs.
pub fn is_control_only(data: &[u8]) -> bool {
    strip_job_control(data)
        .iter()
        .all(|b| b.is_ascii_whitespace())
}

/// Best-effort signature classification. Ambiguous input resolves to `Unknown`.
pub fn classify(data: &[u8]) -> Classification {
    let document = strip_job_control(data);
    let start = document
        .iter()
        .position(|b| !matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
        .unwrap_or(document.len());
    let body = &document[start..];

    let (kind, pages) = if body.starts_with(b"%PDF") {
        (DocumentKind::Pdf, count_pdf_pages(body))
    } else if body.starts_with(b"%!") {
        (DocumentKind::PostScript, count_postscript_pages(body))
    } else if body.first() == Some(&0x1b) {
        (DocumentKind::Pcl, count_occurrences(body, b"\x0c"))
    } else {
        (DocumentKind::Unknown, 1)
    };

    Classification {
        kind,
        page_estimate: pages.max(1),
    }
}

fn count_pdf_pages(body: &[u8]) -> u32 {
    let mut pages = 0;
    for pattern in [&b"/Type /Page"[..], &b"/Type/Page"[..]] {
        let mut offset = 0;
        while let Some(pos) = find(&body[offset..], pattern) {
            let end = offset + pos + pattern.len();
            if body.get(end) != Some(&b's') {
                pages += 1;
            }
            offset = end;
        }
    }
    pages
}

fn count_postscript_pages(body: &[u8]) -> u32 {
    match count_occurrences(body, b"%%Page:") {
        0 => count_occurrences(body, b"showpage"),
        n => n,
    }
}

fn count_occurrences(haystack: &[u8], needle: &[u8]) -> u32 {
    let mut count = 0;
    let mut offset = 0;
    while let Some(pos) = find(&haystack[offset..], needle) {
        count += 1;
        offset += pos + needle.len();
    }
    count
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

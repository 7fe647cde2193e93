// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PJL query answers for the job-ingest responder.
//!
//! Only read-only queries are answered. Job-control commands (`JOB`, `EOJ`,
//! `ENTER LANGUAGE`, `SET`, ...) are accepted silently. Every answer ends
//! with a form feed, the PJL response terminator.

use crate::domain::identity::IdentitySnapshot;

const READY_STATUS: &str = "CODE=10001\r\nDISPLAY=\"Ready\"\r\nONLINE=TRUE\r\n";

/// Answer one `@PJL` command line (without its line terminator).
pub fn respond(line: &str, identity: &IdentitySnapshot, job_id: u64) -> Option<String> {
    let line = line.trim();
    let command = line.strip_prefix("@PJL")?.trim_start();
    let upper = command.to_ascii_uppercase();
    let mut words = upper.split_whitespace();

    let body = match (words.next(), words.next()) {
        (Some("INFO"), Some("ID")) => format!("@PJL INFO ID\r\n\"{}\"\r\n", identity.model),
        (Some("INFO"), Some("STATUS")) => format!("@PJL INFO STATUS\r\n{}", READY_STATUS),
        (Some("INFO"), Some("CONFIG")) => format!(
            "@PJL INFO CONFIG\r\n\
             IN TRAYS [1 ENUMERATED]\r\n\
             \tINTRAY1 LETTER\r\n\
             OUT TRAYS [1 ENUMERATED]\r\n\
             \tUPPER\r\n\
             MEMORY={}\r\n\
             PAGE COUNT={}\r\n",
            identity.memory, identity.page_count
        ),
        (Some("INFO"), Some("PAGECOUNT")) => {
            format!("@PJL INFO PAGECOUNT\r\n{}\r\n", identity.page_count)
        }
        (Some("USTATUS"), Some("DEVICE")) => format!("@PJL USTATUS DEVICE\r\n{}", READY_STATUS),
        (Some("USTATUS"), Some("JOB")) => format!("@PJL USTATUS JOB\r\nSTART={}\r\n", job_id),
        (Some("ECHO"), _) => {
            // Echo preserves the caller's original casing.
            let text = command.get(4..).unwrap_or("").trim();
            format!("@PJL ECHO {}\r\n", text)
        }
        _ => return None,
    };

    Some(format!("{}\x0c", body))
}

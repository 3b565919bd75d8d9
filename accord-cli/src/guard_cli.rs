//! Scope guard commands
//!
//! Lets shell-driven agents route their writes through the same checks the
//! pipeline uses.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use accord_core::guard::{validate_charter, GuardedWriter};
use accord_core::pipeline::Trace;

use crate::{emit, failed, Session};

#[derive(Parser, Debug)]
pub enum GuardCommand {
    /// Write stdin (or --content) to a path, if the charter allows it
    Write {
        /// Target path, relative to the store base or absolute inside it
        path: PathBuf,

        /// Content to write instead of reading stdin
        #[clap(long)]
        content: Option<String>,

        /// Only check whether the write would be allowed
        #[clap(long)]
        dry_run: bool,

        /// Append a line instead of replacing the file
        #[clap(long, conflicts_with = "dry_run")]
        append: bool,
    },

    /// Check whether the charter allows calling an endpoint
    Call {
        endpoint: String,
    },

    /// Validate a charter file
    Validate {
        charter: PathBuf,
    },
}

impl GuardCommand {
    pub fn execute(self, session: &Session) -> Result<bool> {
        match self {
            GuardCommand::Validate { charter } => validate(&charter),
            GuardCommand::Call { endpoint } => call(session, &endpoint),
            GuardCommand::Write {
                path,
                content,
                dry_run,
                append,
            } => write(session, path, content, dry_run, append),
        }
    }
}

fn validate(charter: &std::path::Path) -> Result<bool> {
    let text = fs::read_to_string(charter)
        .with_context(|| format!("reading charter {}", charter.display()))?;
    let report = validate_charter(&text);
    emit(&report)?;
    Ok(report.ok)
}

fn call(session: &Session, endpoint: &str) -> Result<bool> {
    let record = match session
        .capability()
        .and_then(|capability| capability.authorize_call(endpoint))
    {
        Ok(()) => Trace::start("guard").success().with_detail("endpoint", endpoint),
        Err(e) => failed("guard", e.error_code(), &e).with_detail("endpoint", endpoint),
    };
    emit(&record)?;
    Ok(record.ok)
}

fn write(
    session: &Session,
    path: PathBuf,
    content: Option<String>,
    dry_run: bool,
    append: bool,
) -> Result<bool> {
    let capability = match session.capability() {
        Ok(c) => c,
        Err(e) => {
            let record = failed("guard", e.error_code(), &e);
            emit(&record)?;
            return Ok(false);
        }
    };
    let target = if path.is_absolute() {
        path
    } else {
        // Relative to the store base, matching the charter's scopes
        capability.base_directory().join(path)
    };

    let outcome = if dry_run {
        capability.authorize_write(&target)
    } else {
        let content = match content {
            Some(text) => text,
            None => {
                let mut buffer = String::new();
                io::stdin()
                    .read_to_string(&mut buffer)
                    .context("reading content from stdin")?;
                buffer
            }
        };
        let writer = GuardedWriter::new(&capability);
        if append {
            writer.append_line(&target, &content)
        } else {
            writer.write(&target, content.as_bytes())
        }
    };

    let record = match outcome {
        Ok(resolved) => Trace::start("guard")
            .success()
            .with_file(resolved.relative)
            .with_detail("dry_run", dry_run),
        Err(e) => failed("guard", e.error_code(), &e).with_file(target.to_string_lossy()),
    };
    emit(&record)?;
    Ok(record.ok)
}

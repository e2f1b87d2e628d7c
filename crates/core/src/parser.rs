//! Scheduler log-line grammar.
//!
//! A line looks like `NNN (C.P.S) DATE TIME MESSAGE\n`, for example
//! `005 (123.0.0) 10/21 12:00:00 Job terminated. (return value 0)\n`.
//! Parsing never aborts the stream: anything that does not match leaves the
//! affected fields at their default and is reported back to the caller.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::catalog;
use crate::error::{DomainError, DomainResult};
use crate::event::{EXIT_CODE_NOT_SET, Event, JOB_TERMINATED};

static LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]{3}) (\([0-9]+(?:\.[0-9]+){2}\)) ([0-9/]+) ([0-9:]+) (.*)\n")
        .expect("line grammar is a valid regex")
});

static SCHEDULER_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(([0-9]+)\.[0-9]+\.[0-9]+\)").expect("scheduler id is a valid regex")
});

static RETURN_VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(return value ([^)]*)\)").expect("return value clause is a valid regex")
});

impl Event {
    /// Populate the derived fields from the raw text.
    ///
    /// On a grammar mismatch every derived field is left untouched and
    /// `DomainError::Grammar` is returned. The exit code is only looked at for
    /// job terminations; a missing or non-numeric clause yields
    /// [`EXIT_CODE_NOT_SET`].
    pub fn parse(&mut self) -> DomainResult<()> {
        let captures = LINE_RE
            .captures(&self.event)
            .ok_or_else(|| DomainError::grammar(first_line(&self.event)))?;

        self.event_number = captures[1].to_string();
        self.id = captures[2].to_string();
        self.date = captures[3].to_string();
        self.time = captures[4].to_string();
        self.msg = captures[5].to_string();

        if let Some(def) = catalog::definition(&self.event_number) {
            self.event_name = def.name.to_string();
            self.description = def.description.to_string();
        }

        match cluster_id(&self.id) {
            Ok(id) => self.condor_id = id,
            Err(err) => {
                warn!(error = %err, "could not derive cluster id");
                self.condor_id.clear();
            }
        }

        if self.event_number == JOB_TERMINATED {
            self.exit_code = match exit_code(&self.event) {
                Ok(code) => code,
                Err(err) => {
                    warn!(error = %err, hash = %self.hash, "termination without a usable exit code");
                    EXIT_CODE_NOT_SET
                }
            };
        }

        Ok(())
    }
}

/// Extract the cluster component of a `(cluster.proc.subproc)` identifier.
///
/// The component is read as a decimal number: leading zeros are dropped, and
/// an all-zero cluster becomes `"0"`.
pub fn cluster_id(scheduler_id: &str) -> DomainResult<String> {
    let captures = SCHEDULER_ID_RE
        .captures(scheduler_id)
        .ok_or_else(|| DomainError::scheduler_id(scheduler_id))?;

    let trimmed = captures[1].trim_start_matches('0');
    if trimmed.is_empty() {
        Ok("0".to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

/// Extract `N` from a `(return value N)` clause anywhere in `text`.
pub fn exit_code(text: &str) -> DomainResult<i32> {
    let captures = RETURN_VALUE_RE
        .captures(text)
        .ok_or_else(|| DomainError::exit_code("no return value clause"))?;

    let raw = captures[1].trim();
    raw.parse::<i32>()
        .map_err(|e| DomainError::exit_code(format!("{raw:?}: {e}")))
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or_default().to_string()
}

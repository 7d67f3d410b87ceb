//! Commit payload parsing.

use crate::{ObjectId, Result, StorageError};
use chrono::{DateTime, FixedOffset, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An author or committer line: `name <email> seconds ±hhmm`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Display name.
    pub name: String,
    /// Email address, without angle brackets.
    pub email: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Offset as written by git, e.g. `+0200`.
    pub timezone: String,
}

impl Identity {
    /// Parses a raw identity string.
    pub fn parse(raw: &str) -> Result<Self> {
        let email_end = raw
            .rfind('>')
            .ok_or_else(|| invalid(format!("identity without email: {}", raw)))?;
        let email_start = raw[..email_end]
            .rfind('<')
            .ok_or_else(|| invalid(format!("identity without email: {}", raw)))?;

        let name = raw[..email_start].trim().to_string();
        let email = raw[email_start + 1..email_end].to_string();

        let mut when = raw[email_end + 1..].split_whitespace();
        let (Some(seconds), Some(timezone), None) = (when.next(), when.next(), when.next()) else {
            return Err(invalid(format!("identity without time: {}", raw)));
        };
        let timestamp = seconds
            .parse::<i64>()
            .map_err(|e| invalid(format!("invalid timestamp {:?}: {}", seconds, e)))?;

        Ok(Self {
            name,
            email,
            timestamp,
            timezone: timezone.to_string(),
        })
    }

    /// Returns the timestamp in the identity's own offset.
    pub fn time(&self) -> Result<DateTime<FixedOffset>> {
        let bad = || invalid(format!("invalid timezone: {}", self.timezone));
        let tz = self.timezone.as_bytes();
        let (sign, digits) = match tz {
            [sign @ (b'+' | b'-'), digits @ ..] if digits.len() == 4 => (*sign, digits),
            _ => return Err(bad()),
        };
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(bad());
        }
        let value = |pair: &[u8]| i32::from(pair[0] - b'0') * 10 + i32::from(pair[1] - b'0');
        let hours = value(&digits[..2]);
        let minutes = value(&digits[2..]);

        let mut seconds = hours * 3600 + minutes * 60;
        if sign == b'-' {
            seconds = -seconds;
        }

        let offset = FixedOffset::east_opt(seconds)
            .ok_or_else(|| invalid(format!("timezone out of range: {}", self.timezone)))?;
        offset
            .timestamp_opt(self.timestamp, 0)
            .single()
            .ok_or_else(|| invalid(format!("timestamp out of range: {}", self.timestamp)))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} <{}> {} {}",
            self.name, self.email, self.timestamp, self.timezone
        )
    }
}

/// Parsed commit payload.
///
/// Only the first parent is tracked; merge parents beyond it are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Root tree of the snapshot.
    pub tree: ObjectId,
    /// First parent, or [`ObjectId::ZERO`] for a root commit.
    pub parent: ObjectId,
    /// Who wrote the change.
    pub author: Identity,
    /// Who created the commit object.
    pub committer: Identity,
    /// Commit message, everything after the header block.
    pub message: String,
}

impl Commit {
    /// Parses a commit body.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(data);
        let (headers, message) = match text.find("\n\n") {
            Some(split) => (&text[..split], &text[split + 2..]),
            None => (text.as_ref(), ""),
        };

        let mut tree = None;
        let mut parent = None;
        let mut author = None;
        let mut committer = None;

        for line in headers.lines() {
            // Continuation lines of multi-line headers such as gpgsig.
            if line.starts_with(' ') {
                continue;
            }
            match line.split_once(' ') {
                Some(("tree", value)) => tree = Some(ObjectId::from_hex(value)?),
                Some(("parent", value)) if parent.is_none() => {
                    parent = Some(ObjectId::from_hex(value)?)
                }
                Some(("author", value)) => author = Some(Identity::parse(value)?),
                Some(("committer", value)) => committer = Some(Identity::parse(value)?),
                _ => {}
            }
        }

        Ok(Self {
            tree: tree.ok_or_else(|| invalid("commit without tree".to_string()))?,
            parent: parent.unwrap_or(ObjectId::ZERO),
            author: author.ok_or_else(|| invalid("commit without author".to_string()))?,
            committer: committer
                .ok_or_else(|| invalid("commit without committer".to_string()))?,
            message: message.to_string(),
        })
    }

    /// Returns true when the commit has no parent.
    pub fn is_root(&self) -> bool {
        self.parent.is_zero()
    }
}

fn invalid(reason: String) -> StorageError {
    StorageError::InvalidObject(reason)
}

//! Commit history listing options and records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use wisp_storage::{Commit, ObjectId};

/// Page size used when none is given.
pub const DEFAULT_PER_PAGE: usize = 30;
/// Largest accepted page size.
pub const MAX_PER_PAGE: usize = 100;

/// Filters and pagination for [`Client::list_commits`](crate::Client::list_commits).
///
/// History is walked along first parents only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListCommitsOptions {
    /// Commits per page; 0 means [`DEFAULT_PER_PAGE`], capped at [`MAX_PER_PAGE`].
    pub per_page: usize,
    /// 1-based page number; 0 means the first page.
    pub page: usize,
    /// Keep only commits that change this file or directory.
    pub path: Option<String>,
    /// Keep only commits authored at or after this instant.
    pub since: Option<DateTime<Utc>>,
    /// Keep only commits authored at or before this instant.
    pub until: Option<DateTime<Utc>>,
}

impl ListCommitsOptions {
    /// Effective page size.
    pub fn page_size(&self) -> usize {
        match self.per_page {
            0 => DEFAULT_PER_PAGE,
            n => n.min(MAX_PER_PAGE),
        }
    }

    /// Number of matching commits to skip and to keep.
    pub fn window(&self) -> (usize, usize) {
        let size = self.page_size();
        (self.page.max(1).saturating_sub(1).saturating_mul(size), size)
    }

    /// True when the author time passes the `since`/`until` bounds.
    pub fn in_range(&self, time: DateTime<Utc>) -> bool {
        self.since.map_or(true, |since| time >= since)
            && self.until.map_or(true, |until| time <= until)
    }
}

/// A commit together with its id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    /// Commit id.
    pub id: ObjectId,
    /// Parsed commit.
    #[serde(flatten)]
    pub commit: Commit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_page_defaults_and_cap() {
        let options = ListCommitsOptions::default();
        assert_eq!(options.page_size(), 30);
        assert_eq!(options.window(), (0, 30));

        let options = ListCommitsOptions {
            per_page: 500,
            page: 3,
            ..Default::default()
        };
        assert_eq!(options.page_size(), 100);
        assert_eq!(options.window(), (200, 100));
    }

    #[test]
    fn test_time_bounds_are_inclusive() {
        let at = |secs| Utc.timestamp_opt(secs, 0).unwrap();
        let options = ListCommitsOptions {
            since: Some(at(100)),
            until: Some(at(200)),
            ..Default::default()
        };
        assert!(options.in_range(at(100)));
        assert!(options.in_range(at(200)));
        assert!(!options.in_range(at(99)));
        assert!(!options.in_range(at(201)));
        assert!(ListCommitsOptions::default().in_range(at(0)));
    }
}

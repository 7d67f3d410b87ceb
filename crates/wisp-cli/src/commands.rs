//! CLI command implementations.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use std::io::Write;
use tokio_util::sync::CancellationToken;
use wisp_git::{Client, HttpTransport, ListCommitsOptions};
use wisp_storage::{EntryKind, ObjectId, ObjectType, TreeEntry};

/// Client type used by every command.
pub type HttpClient = Client<HttpTransport>;

/// Resolves a full hex id, a ref name, a branch or a tag to an object id.
pub async fn resolve(
    client: &HttpClient,
    cancel: &CancellationToken,
    rev: &str,
) -> Result<ObjectId> {
    client
        .resolve_revision(rev, cancel)
        .await
        .with_context(|| format!("unknown revision: {rev}"))
}

/// Parses an RFC 3339 timestamp or a plain `YYYY-MM-DD` date (midnight UTC).
pub fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
        return Ok(time.with_timezone(&Utc));
    }
    let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") else {
        bail!("invalid time: {raw} (expected RFC 3339 or YYYY-MM-DD)");
    };
    match date.and_hms_opt(0, 0, 0) {
        Some(midnight) => Ok(midnight.and_utc()),
        None => bail!("invalid time: {raw}"),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

fn print_entries(entries: &[TreeEntry]) -> Result<()> {
    let mut out = std::io::stdout().lock();
    for entry in entries {
        writeln!(
            out,
            "{:06o} {} {}\t{}",
            entry.mode,
            entry.kind.as_str(),
            entry.id,
            entry.name
        )?;
    }
    Ok(())
}

fn entries_json(entries: &[TreeEntry]) -> serde_json::Value {
    entries
        .iter()
        .map(|e| {
            json!({
                "name": e.name,
                "mode": format!("{:06o}", e.mode),
                "kind": e.kind,
                "id": e.id,
            })
        })
        .collect()
}

/// Lists a commit's files recursively, or the children of one directory.
pub async fn ls_tree(
    client: &HttpClient,
    cancel: &CancellationToken,
    commit: ObjectId,
    path: Option<&str>,
    json_output: bool,
) -> Result<()> {
    if let Some(path) = path {
        let root = client.get_commit(commit, cancel).await?.tree;
        let entries = client.get_tree_by_path(root, path, cancel).await?;
        if json_output {
            return print_json(&entries_json(&entries));
        }
        return print_entries(&entries);
    }

    let tree = client.get_flat_tree(commit, cancel).await?;
    if json_output {
        return print_json(&tree);
    }

    let mut out = std::io::stdout().lock();
    for entry in &tree.entries {
        writeln!(
            out,
            "{:06o} {} {}\t{}",
            entry.mode,
            entry.kind.as_str(),
            entry.id,
            entry.path
        )?;
    }
    Ok(())
}

/// Prints any object by id.
pub async fn cat_file(
    client: &HttpClient,
    cancel: &CancellationToken,
    id: ObjectId,
    json_output: bool,
) -> Result<()> {
    let object = client.get_object(id, cancel).await?;

    match (object.object_type, json_output) {
        (ObjectType::Tree, false) => print_entries(object.tree_entries()?),
        (ObjectType::Tree, true) => print_json(&entries_json(object.tree_entries()?)),
        (ObjectType::Commit, true) => print_json(object.commit_info()?),
        (kind, true) => print_json(&json!({
            "id": object.id,
            "type": kind,
            "size": object.size(),
            "content": String::from_utf8_lossy(&object.data),
        })),
        (_, false) => {
            let mut out = std::io::stdout().lock();
            out.write_all(&object.data)?;
            out.flush()?;
            Ok(())
        }
    }
}

/// Prints the file at `path` in `commit`.
pub async fn show(
    client: &HttpClient,
    cancel: &CancellationToken,
    commit: ObjectId,
    path: &str,
) -> Result<()> {
    let root = client.get_commit(commit, cancel).await?.tree;
    let content = client
        .get_blob_by_path(root, path, cancel)
        .await
        .with_context(|| format!("{path} at {commit}"))?;

    let mut out = std::io::stdout().lock();
    out.write_all(&content)?;
    out.flush()?;
    Ok(())
}

/// Lists the remote's refs, optionally only those starting with `prefix`.
pub async fn ls_refs(
    client: &HttpClient,
    cancel: &CancellationToken,
    prefix: Option<&str>,
    json_output: bool,
) -> Result<()> {
    let mut refs = client.list_refs(cancel).await?;
    if let Some(prefix) = prefix {
        refs.retain(|r| r.name.starts_with(prefix));
    }
    if json_output {
        return print_json(&refs);
    }

    let mut out = std::io::stdout().lock();
    for r in &refs {
        match &r.symref_target {
            Some(target) => writeln!(out, "{}\t{} -> {}", r.id, r.name, target)?,
            None => writeln!(out, "{}\t{}", r.id, r.name)?,
        }
        if let Some(peeled) = r.peeled {
            writeln!(out, "{}\t{}^{{}}", peeled, r.name)?;
        }
    }
    Ok(())
}

/// Prints first-parent history starting at `start`.
pub async fn log(
    client: &HttpClient,
    cancel: &CancellationToken,
    start: ObjectId,
    options: &ListCommitsOptions,
    json_output: bool,
) -> Result<()> {
    let records = client.list_commits(start, options, cancel).await?;
    if json_output {
        return print_json(&records);
    }

    let mut out = std::io::stdout().lock();
    for record in &records {
        let subject = record.commit.message.lines().next().unwrap_or_default();
        let when = record
            .commit
            .author
            .time()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|_| record.commit.author.timestamp.to_string());
        writeln!(
            out,
            "{} {} {}\t{}",
            record.id, when, record.commit.author.name, subject
        )?;
    }
    Ok(())
}

/// Reports whether the repository exists and the credentials are accepted.
pub async fn check(
    client: &HttpClient,
    cancel: &CancellationToken,
    json_output: bool,
) -> Result<()> {
    let exists = client.repo_exists(cancel).await?;
    let authorized = exists && client.is_authorized(cancel).await?;
    if json_output {
        return print_json(&json!({ "exists": exists, "authorized": authorized }));
    }
    let mut out = std::io::stdout().lock();
    writeln!(out, "exists: {exists}")?;
    writeln!(out, "authorized: {authorized}")?;
    Ok(())
}

/// Lists files changed between two commits.
pub async fn diff(
    client: &HttpClient,
    cancel: &CancellationToken,
    base: ObjectId,
    head: ObjectId,
    json_output: bool,
) -> Result<()> {
    let changes = client.compare_commits(base, head, cancel).await?;
    if json_output {
        return print_json(&changes);
    }

    let mut out = std::io::stdout().lock();
    for change in &changes {
        // Directory entries only matter for the JSON form.
        if EntryKind::from_mode(change.mode) == EntryKind::Tree {
            continue;
        }
        writeln!(out, "{}\t{}", change.status.code(), change.path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time() {
        let day = parse_time("2024-03-01").unwrap();
        assert_eq!(day.to_rfc3339(), "2024-03-01T00:00:00+00:00");

        let offset = parse_time("2024-03-01T02:00:00+02:00").unwrap();
        assert_eq!(offset, day);

        assert!(parse_time("yesterday").is_err());
        assert!(parse_time("2024-13-01").is_err());
    }

    #[test]
    fn test_entries_json_shape() {
        let entry = TreeEntry::new("main.rs", 0o100644, ObjectId::from_bytes([1; 20]));
        let value = entries_json(&[entry]);
        assert_eq!(value[0]["mode"], "100644");
        assert_eq!(value[0]["kind"], "blob");
        assert_eq!(value[0]["name"], "main.rs");
    }
}

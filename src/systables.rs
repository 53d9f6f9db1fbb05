//! System tables: read-only views of history, diffs and status.
//!
//! Each variant of [`SystemTable`] is built from the public session, diff
//! and graph operations only. Results come back as typed rows, or as a
//! [`ResultSet`] of named values for a query layer to consume.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::catalog::Value;
use crate::diff::{diff_roots, diff_table, DiffError, DiffType, TableChange};
use crate::session::{Session, SessionResult};
use crate::snapshot::Root;
use crate::storage::{CommitInfo, TableName};
use crate::warnings::Warnings;

/// Name prefix shared by every system table.
pub const SYSTEM_PREFIX: &str = "vc_";

/// Label of the working root in commit columns.
pub const WORKING: &str = "WORKING";
/// Label of the staged root in commit columns.
pub const STAGED: &str = "STAGED";

/// The system tables of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemTable {
    /// row changes of one table, per commit along first-parent history plus
    /// the uncommitted working changes
    Diff { table: TableName },
    /// rows of one table at every commit
    History { table: TableName },
    /// staged, unstaged and conflicted tables
    Status,
    /// tables changed per commit, with schema and data change flags
    UnscopedDiff,
}

impl SystemTable {
    /// `vc_diff_<table>`, `vc_history_<table>`, `vc_status` or `vc_diff`.
    pub fn name(&self) -> String {
        match self {
            SystemTable::Diff { table } => format!("{}diff_{}", SYSTEM_PREFIX, table),
            SystemTable::History { table } => format!("{}history_{}", SYSTEM_PREFIX, table),
            SystemTable::Status => format!("{}status", SYSTEM_PREFIX),
            SystemTable::UnscopedDiff => format!("{}diff", SYSTEM_PREFIX),
        }
    }

    /// Recognize a system table name.
    pub fn parse(name: &str) -> Option<SystemTable> {
        let rest = name.strip_prefix(SYSTEM_PREFIX)?;
        match rest {
            "status" => Some(SystemTable::Status),
            "diff" => Some(SystemTable::UnscopedDiff),
            _ => {
                if let Some(table) = rest.strip_prefix("diff_") {
                    TableName::new(table).ok().map(|table| SystemTable::Diff { table })
                } else if let Some(table) = rest.strip_prefix("history_") {
                    TableName::new(table).ok().map(|table| SystemTable::History { table })
                } else {
                    None
                }
            }
        }
    }

    /// Materialize the table for `session`.
    pub fn scan(&self, session: &Session) -> SessionResult<ResultSet> {
        let mut warnings = session.repository().config().warnings();
        let rows: Vec<BTreeMap<String, Value>> = match self {
            SystemTable::Diff { table } => diff_rows(session, table, &mut warnings)?
                .into_iter()
                .map(DiffRow::into_values)
                .collect(),
            SystemTable::History { table } => history_rows(session, table)?
                .into_iter()
                .map(HistoryRow::into_values)
                .collect(),
            SystemTable::Status => status_rows(session)?.into_iter().map(StatusRow::into_values).collect(),
            SystemTable::UnscopedDiff => unscoped_diff_rows(session)?
                .into_iter()
                .map(UnscopedDiffRow::into_values)
                .collect(),
        };
        let columns = match self {
            SystemTable::Status => names(&["table_name", "staged", "status"]),
            SystemTable::UnscopedDiff => names(&[
                "commit_hash",
                "committer",
                "date",
                "message",
                "table_name",
                "schema_change",
                "data_change",
            ]),
            _ => column_union(&rows),
        };
        debug!(table = %self.name(), rows = rows.len(), "system table scanned");
        Ok(ResultSet { columns, rows, warnings })
    }
}

fn names(columns: &[&str]) -> Vec<String> {
    columns.iter().map(|c| c.to_string()).collect()
}

/// Columns of rows whose shape changes with the schema over history, in
/// first-seen order.
fn column_union(rows: &[BTreeMap<String, Value>]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for name in row.keys() {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }
    }
    columns
}

/// A materialized system table.
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub columns: Vec<String>,
    /// rows as column name to value; absent columns read as null
    pub rows: Vec<BTreeMap<String, Value>>,
    pub warnings: Warnings,
}

impl ResultSet {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` in row `index`, null when the row lacks it.
    pub fn value(&self, index: usize, column: &str) -> Option<&Value> {
        static NULL: Value = Value::Null;
        let row = self.rows.get(index)?;
        Some(row.get(column).unwrap_or(&NULL))
    }
}

fn date_value(date: Option<DateTime<Utc>>) -> Value {
    date.map_or(Value::Null, Value::Timestamp)
}

// ==================== Diff ====================

/// One row change of [`SystemTable::Diff`].
#[derive(Debug, Clone, PartialEq)]
pub struct DiffRow {
    pub to_commit: String,
    pub from_commit: String,
    pub to_commit_date: Option<DateTime<Utc>>,
    pub from_commit_date: Option<DateTime<Utc>>,
    pub diff_type: DiffType,
    /// `to_<column>` and `from_<column>` values
    pub values: BTreeMap<String, Value>,
}

impl DiffRow {
    fn into_values(self) -> BTreeMap<String, Value> {
        let mut values = self.values;
        values.insert("to_commit".to_string(), Value::Text(self.to_commit));
        values.insert("from_commit".to_string(), Value::Text(self.from_commit));
        values.insert("to_commit_date".to_string(), date_value(self.to_commit_date));
        values.insert("from_commit_date".to_string(), date_value(self.from_commit_date));
        values.insert("diff_type".to_string(), Value::text(self.diff_type.as_str()));
        values
    }
}

struct Point {
    label: String,
    date: Option<DateTime<Utc>>,
    root: Root,
}

impl Point {
    fn commit(session: &Session, info: &CommitInfo) -> SessionResult<Point> {
        Ok(Point {
            label: info.id.to_string(),
            date: Some(info.commit.meta.timestamp),
            root: session.repository().root_of(info.id)?,
        })
    }
}

/// Row changes of `table`: working changes against the head first, then
/// each commit of the first-parent history against its first parent.
pub fn diff_rows(session: &Session, table: &TableName, warnings: &mut Warnings) -> SessionResult<Vec<DiffRow>> {
    let graph = session.repository().graph();
    let mut points = vec![Point {
        label: WORKING.to_string(),
        date: None,
        root: session.working_root()?,
    }];
    for info in graph.first_parent_history(session.head()?) {
        points.push(Point::commit(session, &info?)?);
    }

    let mut rows = Vec::new();
    for pair in points.windows(2) {
        let (to, from) = (&pair[0], &pair[1]);
        let delta = match diff_table(session.store(), table, &from.root, &to.root) {
            Ok(delta) => delta,
            Err(DiffError::TableNotFound(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        if delta.change() == TableChange::Unchanged {
            continue;
        }
        warnings.absorb(delta.warnings());
        let columns = delta.projection_columns();
        for diff in delta.row_diffs()? {
            let projected = delta.project(&diff?, warnings);
            let values = columns
                .iter()
                .cloned()
                .zip(projected.to.into_iter().chain(projected.from))
                .collect();
            rows.push(DiffRow {
                to_commit: to.label.clone(),
                from_commit: from.label.clone(),
                to_commit_date: to.date,
                from_commit_date: from.date,
                diff_type: projected.diff_type,
                values,
            });
        }
    }
    Ok(rows)
}

// ==================== History ====================

/// One row of [`SystemTable::History`]: a table row as of a commit.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub commit_hash: String,
    pub committer: String,
    pub commit_date: DateTime<Utc>,
    pub values: Vec<(String, Value)>,
}

impl HistoryRow {
    fn into_values(self) -> BTreeMap<String, Value> {
        let mut values: BTreeMap<String, Value> = self.values.into_iter().collect();
        values.insert("commit_hash".to_string(), Value::Text(self.commit_hash));
        values.insert("committer".to_string(), Value::Text(self.committer));
        values.insert("commit_date".to_string(), Value::Timestamp(self.commit_date));
        values
    }
}

/// Rows of `table` at every commit reachable from the head, newest first.
/// Commits where the table doesn't exist contribute nothing.
pub fn history_rows(session: &Session, table: &TableName) -> SessionResult<Vec<HistoryRow>> {
    let repo = session.repository();
    let mut rows = Vec::new();
    for info in repo.graph().history(session.head()?) {
        let info = info?;
        let Some(found) = repo.root_of(info.id)?.table(session.store(), table)? else {
            continue;
        };
        for row in found.scan() {
            rows.push(HistoryRow {
                commit_hash: info.id.to_string(),
                committer: info.commit.meta.author.name.clone(),
                commit_date: info.commit.meta.timestamp,
                values: row?.named(found.schema()),
            });
        }
    }
    Ok(rows)
}

// ==================== Status ====================

/// One row of [`SystemTable::Status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub table_name: TableName,
    pub staged: bool,
    pub status: String,
}

impl StatusRow {
    fn into_values(self) -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("table_name".to_string(), Value::Text(self.table_name.to_string())),
            ("staged".to_string(), Value::Bool(self.staged)),
            ("status".to_string(), Value::Text(self.status)),
        ])
    }
}

pub fn status_rows(session: &Session) -> SessionResult<Vec<StatusRow>> {
    let status = session.status()?;
    let staged = status.staged.iter().map(|e| (e, true));
    let unstaged = status.unstaged.iter().map(|e| (e, false));
    let mut rows: Vec<StatusRow> = staged
        .chain(unstaged)
        .map(|(entry, staged)| StatusRow {
            table_name: entry.table.clone(),
            staged,
            status: entry.change.to_string(),
        })
        .collect();
    rows.extend(status.conflicts.into_iter().map(|table_name| StatusRow {
        table_name,
        staged: false,
        status: "conflict".to_string(),
    }));
    Ok(rows)
}

// ==================== Unscoped diff ====================

/// One row of [`SystemTable::UnscopedDiff`]: a table touched by a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnscopedDiffRow {
    pub commit_hash: String,
    pub committer: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub table_name: TableName,
    pub schema_change: bool,
    pub data_change: bool,
}

impl UnscopedDiffRow {
    fn into_values(self) -> BTreeMap<String, Value> {
        let text = |s: Option<String>| s.map_or(Value::Null, Value::Text);
        BTreeMap::from([
            ("commit_hash".to_string(), Value::Text(self.commit_hash)),
            ("committer".to_string(), text(self.committer)),
            ("date".to_string(), date_value(self.date)),
            ("message".to_string(), text(self.message)),
            ("table_name".to_string(), Value::Text(self.table_name.to_string())),
            ("schema_change".to_string(), Value::Bool(self.schema_change)),
            ("data_change".to_string(), Value::Bool(self.data_change)),
        ])
    }
}

/// Tables changed in the working root (against staged), in the staged root
/// (against the head) and by every commit reachable from the head (against
/// its first parent).
pub fn unscoped_diff_rows(session: &Session) -> SessionResult<Vec<UnscopedDiffRow>> {
    let repo = session.repository();
    let head = session.head()?;
    let working = session.working_root()?;
    let staged = session.staged_root()?;
    let head_root = repo.root_of(head)?;

    let mut rows = Vec::new();
    let mut push = |label: &str, info: Option<&CommitInfo>, from: &Root, to: &Root| -> SessionResult<()> {
        for delta in diff_roots(session.store(), from, to).into_result()? {
            let summary = delta.summary()?;
            let Some(table_name) = summary.name().cloned() else {
                continue;
            };
            rows.push(UnscopedDiffRow {
                commit_hash: label.to_string(),
                committer: info.map(|i| i.commit.meta.author.name.clone()),
                date: info.map(|i| i.commit.meta.timestamp),
                message: info.map(|i| i.commit.meta.message.clone()),
                table_name,
                schema_change: summary.schema_changed,
                data_change: summary.data_changed,
            });
        }
        Ok(())
    };

    push(WORKING, None, &staged, &working)?;
    push(STAGED, None, &head_root, &staged)?;
    for info in repo.graph().history(head) {
        let info = info?;
        let Some(parent) = info.commit.first_parent() else {
            continue;
        };
        let from = repo.root_of(parent)?;
        let to = repo.root_of(info.id)?;
        push(&info.id.to_string(), Some(&info), &from, &to)?;
    }
    Ok(rows)
}

//! Ref expressions: `HEAD`, branch names, full or abbreviated commit hashes,
//! each optionally followed by `~N` / `^N` steps. `WORKING` and `STAGED`
//! name the working set roots where a root is accepted.

use std::collections::BTreeSet;

use super::error::{SessionError, SessionResult};
use crate::graph::CommitGraph;
use crate::storage::{BranchName, CommitId, RefManager, Store};

/// shortest commit hash prefix accepted
pub const MIN_HASH_PREFIX: usize = 4;

/// What a ref expression points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTarget {
    Commit(CommitId),
    Working,
    Staged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// `~n`: n-th first-parent ancestor
    Ancestor(usize),
    /// `^n`: n-th parent (1-based)
    Parent(usize),
}

fn parse_steps(expr: &str, suffix: &str) -> SessionResult<Vec<Step>> {
    let mut steps = Vec::new();
    let mut rest = suffix;
    while let Some(op) = rest.chars().next() {
        if op != '~' && op != '^' {
            return Err(SessionError::invalid_ref(expr, format!("unexpected '{}'", op)));
        }
        let digits: String = rest[1..].chars().take_while(char::is_ascii_digit).collect();
        let n = if digits.is_empty() {
            1
        } else {
            digits
                .parse()
                .map_err(|_| SessionError::invalid_ref(expr, "step count out of range"))?
        };
        steps.push(if op == '~' { Step::Ancestor(n) } else { Step::Parent(n) });
        rest = &rest[1 + digits.len()..];
    }
    Ok(steps)
}

/// Resolve `expr` against the refs of `store`. `head` is the branch `HEAD`
/// stands for.
pub(crate) fn resolve(store: &Store, graph: &CommitGraph, head: &BranchName, expr: &str) -> SessionResult<RefTarget> {
    let expr = expr.trim();
    let split = expr.find(&['~', '^'][..]).unwrap_or(expr.len());
    let (name, suffix) = expr.split_at(split);
    let steps = parse_steps(expr, suffix)?;

    if name.eq_ignore_ascii_case("working") || name.eq_ignore_ascii_case("staged") {
        if !steps.is_empty() {
            return Err(SessionError::invalid_ref(expr, "working set roots have no ancestors"));
        }
        return Ok(if name.eq_ignore_ascii_case("working") {
            RefTarget::Working
        } else {
            RefTarget::Staged
        });
    }

    let mut commit = resolve_name(store, graph, head, expr, name)?;
    for step in steps {
        commit = match step {
            Step::Ancestor(n) => {
                let mut current = commit;
                for _ in 0..n {
                    current = graph
                        .commit(current)?
                        .first_parent()
                        .ok_or_else(|| SessionError::invalid_ref(expr, "walks past the first commit"))?;
                }
                current
            }
            Step::Parent(0) => commit,
            Step::Parent(n) => *graph
                .commit(commit)?
                .parents
                .get(n - 1)
                .ok_or_else(|| SessionError::invalid_ref(expr, format!("commit has no parent {}", n)))?,
        };
    }
    Ok(RefTarget::Commit(commit))
}

fn resolve_name(store: &Store, graph: &CommitGraph, head: &BranchName, expr: &str, name: &str) -> SessionResult<CommitId> {
    if name.eq_ignore_ascii_case("head") {
        return Ok(RefManager::resolve_branch(store.refs(), head)?);
    }
    if let Ok(branch) = BranchName::new(name) {
        if RefManager::branch_exists(store.refs(), &branch)? {
            return Ok(RefManager::resolve_branch(store.refs(), &branch)?);
        }
    }
    let is_hex = name.len() >= MIN_HASH_PREFIX && name.chars().all(|c| c.is_ascii_hexdigit());
    if !is_hex {
        return Err(SessionError::invalid_ref(expr, "no such branch or commit"));
    }
    let prefix = name.to_ascii_lowercase();
    if prefix.len() == 40 {
        let id = CommitId::from_hex(&prefix).map_err(|_| SessionError::invalid_ref(expr, "not a commit hash"))?;
        graph.commit(id)?;
        return Ok(id);
    }

    // abbreviated hashes are matched against every commit reachable from a branch
    let mut matches = BTreeSet::new();
    for (_, tip) in RefManager::list_branches(store.refs())? {
        for info in graph.history(tip) {
            let info = info?;
            if info.id.to_string().starts_with(&prefix) {
                matches.insert(info.id);
            }
        }
    }
    let mut matches = matches.into_iter();
    match (matches.next(), matches.next()) {
        (Some(id), None) => Ok(id),
        (None, _) => Err(SessionError::invalid_ref(expr, "no commit with this hash prefix")),
        (Some(_), Some(_)) => Err(SessionError::invalid_ref(expr, "ambiguous commit hash prefix")),
    }
}

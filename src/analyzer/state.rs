//! Per-scope taint state
//!
//! One `TaintState` value is owned by a single analysis pass and threaded
//! explicitly through the evaluator, driver and explainer. Two mappings per
//! scope: sanitized paths, and unsanitized paths with the brace level of the
//! tainting assignment. The unsanitized map always wins on query.
//!
//! The level rule is a crude join-point approximation without a real CFG: a
//! sanitizing assignment clears a prior unsafe mark only when it happens at
//! an equal-or-shallower nesting level. Re-tainting inside a deeper branch
//! is never forgotten; sanitizing inside a deeper branch is never trusted
//! outside it.

use crate::analyzer::policy::SinkPolicy;
use crate::analyzer::scope::ScopeId;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Ordered assignment history for one variable path: position → snippet.
pub type AssignmentHistory = BTreeMap<usize, String>;

#[derive(Debug, Default)]
pub struct TaintState {
    sanitized: HashMap<ScopeId, HashSet<String>>,
    unsanitized: HashMap<ScopeId, HashMap<String, u32>>,
    assignments: HashMap<ScopeId, HashMap<String, AssignmentHistory>>,
}

impl TaintState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `path` sanitized in `scope`. `level` is the brace level of the
    /// sanitizing assignment; an existing unsafe mark is cleared only when
    /// this happens at an equal-or-shallower level.
    pub fn mark_sanitized(&mut self, scope: ScopeId, path: &str, level: u32) {
        self.sanitized
            .entry(scope)
            .or_default()
            .insert(path.to_string());

        if let Some(unsafe_level) = self
            .unsanitized
            .get(&scope)
            .and_then(|m| m.get(path))
            .copied()
        {
            if level <= unsafe_level {
                if let Some(m) = self.unsanitized.get_mut(&scope) {
                    m.remove(path);
                }
            }
        }
    }

    /// Mark `path` unsanitized in `scope`. A trailing `[]` append suffix
    /// normalizes to the base array path: appending one tainted element
    /// taints the whole collection.
    pub fn mark_unsanitized(&mut self, scope: ScopeId, path: &str, level: u32) {
        let path = path.strip_suffix("[]").unwrap_or(path);
        if let Some(s) = self.sanitized.get_mut(&scope) {
            s.remove(path);
        }
        self.unsanitized
            .entry(scope)
            .or_default()
            .insert(path.to_string(), level);
    }

    /// Query taint state for `path` in `scope`, honoring the policy's
    /// built-in safe paths and base-path inheritance.
    pub fn is_sanitized(&self, scope: ScopeId, path: &str, policy: &SinkPolicy) -> bool {
        // Database-handle properties and framework table names are safe at
        // this layer regardless of tracked state.
        if policy.path_is_implicitly_safe(path) {
            return true;
        }

        // Ever set to something unsanitized in this scope? Then unsafe,
        // whatever else happened.
        if self
            .unsanitized
            .get(&scope)
            .map(|m| m.contains_key(path))
            .unwrap_or(false)
        {
            return false;
        }

        if self
            .sanitized
            .get(&scope)
            .map(|s| s.contains(path))
            .unwrap_or(false)
        {
            return true;
        }

        // Array element or object property: inherit the whole-container
        // state of the base path. A base never inherits from a sub-path.
        if let Some(base) = base_path(path) {
            if self
                .unsanitized
                .get(&scope)
                .map(|m| m.contains_key(base))
                .unwrap_or(false)
            {
                return false;
            }
            if self
                .sanitized
                .get(&scope)
                .map(|s| s.contains(base))
                .unwrap_or(false)
            {
                return true;
            }
        }

        false
    }

    /// Record one assignment for diagnostics. Append-only; never consulted
    /// for the safety decision itself.
    pub fn record_assignment(&mut self, scope: ScopeId, path: &str, pos: usize, snippet: String) {
        self.assignments
            .entry(scope)
            .or_default()
            .entry(path.to_string())
            .or_default()
            .insert(pos, snippet);
    }

    /// Ordered assignment history for `path` in `scope`, if any.
    pub fn find_assignments(&self, scope: ScopeId, path: &str) -> Option<&AssignmentHistory> {
        self.assignments.get(&scope).and_then(|m| m.get(path))
    }
}

/// `$foo` for `$foo['k']` / `$foo->prop`; `None` when `path` is already a
/// bare base name.
fn base_path(path: &str) -> Option<&str> {
    let rest = path.strip_prefix('$')?;
    let end = rest
        .find(|c: char| !c.is_alphanumeric() && c != '_')
        .map(|i| i + 1)?;
    if end == path.len() {
        None
    } else {
        Some(&path[..end])
    }
}

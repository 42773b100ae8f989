//! Graph namespace naming.
//!
//! Each project owns one physical graph namespace named `graph_` followed
//! by the 32 hex characters of the project id with separators removed.
//! Names must match `^graph_[0-9a-f]{32}$` and stay within the 63-char
//! identifier limit common to graph engines. The full 128 bits of the id
//! are kept in the name, and [`GraphStore::ensure_graph`] still performs a
//! pre-creation existence check.
//!
//! [`GraphStore::ensure_graph`]: crate::storage::GraphStore::ensure_graph

use crate::models::ProjectId;
use once_cell::sync::Lazy;
use regex::Regex;

/// Identifier length limit imposed by common graph engines.
pub const MAX_GRAPH_NAME_LEN: usize = 63;

#[allow(clippy::unwrap_used)] // compile-time constant pattern
static GRAPH_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^graph_[0-9a-f]{32}$").unwrap());

/// Derives the physical graph name for a project.
#[must_use]
pub fn graph_name(project: ProjectId) -> String {
    format!("graph_{}", project.as_simple_hex())
}

/// Whether a string is a well-formed physical graph name.
#[must_use]
pub fn is_valid_graph_name(name: &str) -> bool {
    name.len() <= MAX_GRAPH_NAME_LEN && GRAPH_NAME_PATTERN.is_match(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_name_shape() {
        let project = ProjectId::generate();
        let name = graph_name(project);
        assert!(name.starts_with("graph_"));
        assert_eq!(name.len(), 6 + 32);
        assert!(is_valid_graph_name(&name));
    }

    #[test]
    fn test_distinct_projects_distinct_names() {
        let a = graph_name(ProjectId::generate());
        let b = graph_name(ProjectId::generate());
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(!is_valid_graph_name("graph_"));
        assert!(!is_valid_graph_name("graph_XYZ"));
        assert!(!is_valid_graph_name("graph_0123456789abcdef"));
        assert!(!is_valid_graph_name(
            "prefix_graph_0123456789abcdef0123456789abcdef"
        ));
        // Uppercase hex is not canonical.
        assert!(!is_valid_graph_name(
            "graph_0123456789ABCDEF0123456789ABCDEF"
        ));
    }

    #[test]
    fn test_length_limit() {
        let project = ProjectId::generate();
        assert!(graph_name(project).len() <= MAX_GRAPH_NAME_LEN);
    }
}

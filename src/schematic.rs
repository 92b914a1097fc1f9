//! Schematic graph: the static declaration of every composable template.
//!
//! A [`CacheSchematic`] maps template names to [`TemplateSchematic`]
//! descriptors. Each descriptor names an optional base template and the
//! fragment files layered on top of it, forming a directed inheritance graph
//! that must be acyclic. Cycle detection runs once at cache construction;
//! parents that do not resolve to another key are permitted here and surface
//! as per-request errors instead.
//!
//! Schematics are plain data and derive `serde` traits, so they can be
//! declared in configuration files:
//!
//! ```toml
//! [base]
//! filepaths = ["templates/base.html"]
//!
//! [nav]
//! base = "base"
//! filepaths = ["templates/nav.html"]
//! ```

use std::collections::HashMap;
use std::collections::hash_map;
use std::path::PathBuf;

use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Describes how to compile one template: an optional base template to
/// inherit from, plus the fragment files specific to this template.
///
/// `base: None` declares a root template with no parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSchematic {
    /// Name of the base template, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    /// Fragment files layered onto the base, in order.
    #[serde(default)]
    pub filepaths: Vec<PathBuf>,
}

impl TemplateSchematic {
    /// A root template assembled from `filepaths` alone.
    pub fn root<I, P>(filepaths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            base: None,
            filepaths: filepaths.into_iter().map(Into::into).collect(),
        }
    }

    /// A template that layers `filepaths` onto the template named `base`.
    pub fn extends<I, P>(base: impl Into<String>, filepaths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            base: Some(base.into()),
            filepaths: filepaths.into_iter().map(Into::into).collect(),
        }
    }
}

/// An inheritance graph of [`TemplateSchematic`]s, keyed by template name.
///
/// The graph is validated for acyclicity when a cache is built from it.
/// Missing parents are not construction errors; a request that needs one
/// fails with [`CacheError::SchematicNotFound`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheSchematic {
    templates: HashMap<String, TemplateSchematic>,
}

impl CacheSchematic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the schematic for `name`, returning the previous
    /// descriptor if one existed.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        schematic: TemplateSchematic,
    ) -> Option<TemplateSchematic> {
        self.templates.insert(name.into(), schematic)
    }

    pub fn get(&self, name: &str) -> Option<&TemplateSchematic> {
        self.templates.get(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Iterate over `(name, schematic)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TemplateSchematic)> {
        self.templates.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// True iff the inheritance graph contains a cycle.
    ///
    /// Holds exactly when building a cache from this schematic would fail
    /// with [`CacheError::CyclicSchematic`].
    pub fn is_cyclic(&self) -> bool {
        self.detect_cycle().is_err()
    }

    /// Check the inheritance graph for cycles.
    ///
    /// Runs a depth-first search with a recursion stack over the resolvable
    /// parent edges. On failure the error names the cycle participants in
    /// traversal order. Parents that do not resolve to a key contribute no
    /// edge and therefore never form part of a cycle.
    pub fn detect_cycle(&self) -> Result<(), CacheError> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut indices: HashMap<&str, NodeIndex> = HashMap::with_capacity(self.templates.len());

        for name in self.templates.keys() {
            indices.insert(name.as_str(), graph.add_node(name.as_str()));
        }
        for (name, schematic) in &self.templates {
            if let Some(base) = schematic.base.as_deref()
                && let Some(&parent) = indices.get(base)
            {
                graph.add_edge(indices[name.as_str()], parent, ());
            }
        }

        let mut colors: HashMap<NodeIndex, Color> =
            graph.node_indices().map(|n| (n, Color::White)).collect();
        let mut path = Vec::new();

        for node in graph.node_indices() {
            if colors[&node] == Color::White
                && let Some(cycle) = dfs_visit(&graph, node, &mut colors, &mut path)
            {
                return Err(CacheError::CyclicSchematic { cycle });
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, TemplateSchematic)> for CacheSchematic {
    fn from_iter<T: IntoIterator<Item = (String, TemplateSchematic)>>(iter: T) -> Self {
        Self {
            templates: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a CacheSchematic {
    type Item = (&'a String, &'a TemplateSchematic);
    type IntoIter = hash_map::Iter<'a, String, TemplateSchematic>;

    fn into_iter(self) -> Self::IntoIter {
        self.templates.iter()
    }
}

/// DFS color states. Gray nodes are on the current recursion stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

fn dfs_visit(
    graph: &DiGraph<&str, ()>,
    node: NodeIndex,
    colors: &mut HashMap<NodeIndex, Color>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    colors.insert(node, Color::Gray);
    path.push(graph[node].to_string());

    for neighbor in graph.neighbors(node) {
        match colors[&neighbor] {
            Color::Gray => {
                let start = path
                    .iter()
                    .position(|name| name.as_str() == graph[neighbor])
                    .unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(graph[neighbor].to_string());
                return Some(cycle);
            }
            Color::White => {
                if let Some(cycle) = dfs_visit(graph, neighbor, colors, path) {
                    return Some(cycle);
                }
            }
            Color::Black => {}
        }
    }

    path.pop();
    colors.insert(node, Color::Black);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> CacheSchematic {
        let mut schematic = CacheSchematic::new();
        schematic.insert("base", TemplateSchematic::root(["base.html"]));
        schematic.insert("nav", TemplateSchematic::extends("base", ["nav.html"]));
        schematic.insert("body1", TemplateSchematic::extends("nav", ["body1.html"]));
        schematic.insert("body2", TemplateSchematic::extends("nav", ["body2.html"]));
        schematic
    }

    #[test]
    fn acyclic_schematic_passes() {
        let schematic = fixture();
        assert!(!schematic.is_cyclic());
        assert!(schematic.detect_cycle().is_ok());
    }

    #[test]
    fn detects_self_cycle() {
        let mut schematic = fixture();
        schematic.insert("nav", TemplateSchematic::extends("nav", ["nav.html"]));

        let err = schematic.detect_cycle().unwrap_err();
        match err {
            CacheError::CyclicSchematic { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&"nav".to_string()));
            }
            other => panic!("expected CyclicSchematic, got {other:?}"),
        }
    }

    #[test]
    fn detects_two_node_cycle() {
        let mut schematic = fixture();
        schematic.insert("base", TemplateSchematic::extends("nav", ["base.html"]));

        assert!(schematic.is_cyclic());
    }

    #[test]
    fn detects_multi_node_cycle() {
        let mut schematic = fixture();
        schematic.insert("base", TemplateSchematic::extends("body1", ["base.html"]));

        let err = schematic.detect_cycle().unwrap_err();
        match err {
            CacheError::CyclicSchematic { cycle } => {
                assert!(cycle.len() >= 4, "cycle {cycle:?} should span base -> body1 chain");
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("expected CyclicSchematic, got {other:?}"),
        }
    }

    #[test]
    fn missing_parent_is_not_a_cycle() {
        let mut schematic = CacheSchematic::new();
        schematic.insert("orphan", TemplateSchematic::extends("missing", ["o.html"]));

        assert!(!schematic.is_cyclic());
    }

    #[test]
    fn clone_is_independent_of_the_original() {
        let original = fixture();
        let mut copy = original.clone();
        copy.insert("nav", TemplateSchematic::root(["other.html"]));

        assert_eq!(
            original.get("nav").and_then(|s| s.base.as_deref()),
            Some("base")
        );
        assert_eq!(copy.get("nav").and_then(|s| s.base.as_deref()), None);
    }

    #[test]
    fn deserializes_from_toml() {
        let schematic: CacheSchematic = toml::from_str(
            r#"
            [base]
            filepaths = ["templates/base.html"]

            [nav]
            base = "base"
            filepaths = ["templates/nav.html"]
            "#,
        )
        .unwrap();

        assert_eq!(schematic.len(), 2);
        assert_eq!(
            schematic.get("nav").and_then(|s| s.base.as_deref()),
            Some("base")
        );
        assert!(!schematic.is_cyclic());
    }
}

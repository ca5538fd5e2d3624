//! Reverse-dependency graph over `(schema, column)` pairs.
//!
//! For every column the graph answers "which computed columns, in which
//! schemas, go stale when this changes", transitively. Registration rejects
//! dependency cycles before anything is recorded.

use super::schema::Schema;
use crate::core::{Result, StoreError};
use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// `(schema, column)`.
pub type ColumnRef = (String, String);

/// Stale computed columns, grouped by the schema they live in.
pub type Invalidation = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Clone, Default)]
pub struct Dependents {
    /// column → every computed column that reads it, directly or not
    dependents: BTreeMap<ColumnRef, Invalidation>,
    /// computed column → columns it reads directly
    edges: BTreeMap<ColumnRef, BTreeSet<ColumnRef>>,
}

impl Dependents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records every computed column of `schema` and recomputes the closure.
    /// Nothing changes if the new edges would form a cycle.
    pub fn register(&mut self, schema: &Schema) -> Result<()> {
        let mut edges = self.edges.clone();
        for col in schema.computed() {
            let node = (schema.name().to_string(), col.name.clone());
            let deps = edges.entry(node).or_default();
            for (dep_schema, dep_cols) in col.dependencies.resolve(schema.name()) {
                // Reading a related row also reads the fields that pick it.
                if dep_schema != schema.name()
                    && let Some(link) = schema.relationship(&dep_schema)
                {
                    for field in link {
                        deps.insert((schema.name().to_string(), field.clone()));
                    }
                }
                for dep in dep_cols {
                    deps.insert((dep_schema.clone(), dep));
                }
            }
        }

        if let Some(cycle) = find_cycle(&edges) {
            let path: Vec<String> = cycle.iter().map(|(s, c)| format!("{}.{}", s, c)).collect();
            return Err(StoreError::DependencyCycle(path.join(" -> ")));
        }

        self.edges = edges;
        self.close();
        Ok(())
    }

    /// Computed columns invalidated by a change to `column` of `schema`.
    pub fn of(&self, schema: &str, column: &str) -> Option<&Invalidation> {
        self.dependents.get(&(schema.to_string(), column.to_string()))
    }

    /// Union of the invalidations of several columns of one schema.
    pub fn of_columns<'a, I>(&self, schema: &str, columns: I) -> Invalidation
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut merged = Invalidation::new();
        for column in columns {
            if let Some(inv) = self.of(schema, column) {
                merge(&mut merged, inv);
            }
        }
        merged
    }

    /// Fixed point: a column's dependents include the dependents of every
    /// computed column that reads it.
    fn close(&mut self) {
        let mut dependents: BTreeMap<ColumnRef, Invalidation> = BTreeMap::new();
        for (node, deps) in &self.edges {
            for dep in deps {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .entry(node.0.clone())
                    .or_default()
                    .insert(node.1.clone());
            }
        }

        let mut rounds = 0;
        let mut changed = true;
        while changed {
            changed = false;
            rounds += 1;
            for (node, deps) in &self.edges {
                let Some(downstream) = dependents.get(node).cloned() else {
                    continue;
                };
                for dep in deps {
                    let entry = dependents.entry(dep.clone()).or_default();
                    changed |= merge(entry, &downstream);
                }
            }
        }

        debug!("dependents closure settled after {} round(s)", rounds);
        self.dependents = dependents;
    }
}

fn merge(into: &mut Invalidation, from: &Invalidation) -> bool {
    let mut changed = false;
    for (schema, cols) in from {
        let entry = into.entry(schema.clone()).or_default();
        let before = entry.len();
        entry.extend(cols.iter().cloned());
        changed |= entry.len() != before;
    }
    changed
}

fn find_cycle(edges: &BTreeMap<ColumnRef, BTreeSet<ColumnRef>>) -> Option<Vec<ColumnRef>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        node: &ColumnRef,
        edges: &BTreeMap<ColumnRef, BTreeSet<ColumnRef>>,
        marks: &mut BTreeMap<ColumnRef, Mark>,
        stack: &mut Vec<ColumnRef>,
    ) -> Option<Vec<ColumnRef>> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| n == node).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(node.clone());
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(node.clone(), Mark::Visiting);
        stack.push(node.clone());
        if let Some(deps) = edges.get(node) {
            for dep in deps {
                if let Some(cycle) = visit(dep, edges, marks, stack) {
                    return Some(cycle);
                }
            }
        }
        stack.pop();
        marks.insert(node.clone(), Mark::Done);
        None
    }

    let mut marks = BTreeMap::new();
    let mut stack = Vec::new();
    edges
        .keys()
        .find_map(|node| visit(node, edges, &mut marks, &mut stack))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, Value};
    use crate::storage::schema::{ColumnDef, ComputedColumn, Dependencies};

    fn passthrough(name: &str, deps: Dependencies) -> ComputedColumn {
        ComputedColumn::per_row(name, DataType::Float, deps, |_| Ok(Value::Null))
    }

    fn parent() -> Schema {
        Schema::builder("Parent")
            .index(["id"])
            .column(ColumnDef::new("width", DataType::Float))
            .build()
            .unwrap()
    }

    fn child() -> Schema {
        Schema::builder("Child")
            .index(["id"])
            .column(ColumnDef::new("parentID", DataType::Integer))
            .column(ColumnDef::new("a", DataType::Float))
            .relationship("Parent", ["parentID"])
            .computed(passthrough("b", Dependencies::local(["a"])))
            .computed(passthrough("c", Dependencies::local(["b"]).on("Parent", ["width"])))
            .computed(passthrough("d", Dependencies::local(["c"])))
            .build()
            .unwrap()
    }

    #[test]
    fn test_transitive_closure() {
        let mut graph = Dependents::new();
        graph.register(&parent()).unwrap();
        graph.register(&child()).unwrap();

        let from_a = graph.of("Child", "a").unwrap();
        assert_eq!(from_a["Child"], BTreeSet::from(["b".into(), "c".into(), "d".into()]));

        let from_width = graph.of("Parent", "width").unwrap();
        assert_eq!(from_width["Child"], BTreeSet::from(["c".into(), "d".into()]));

        assert!(graph.of("Child", "d").is_none());
    }

    #[test]
    fn test_link_fields_are_dependencies() {
        let mut graph = Dependents::new();
        graph.register(&parent()).unwrap();
        graph.register(&child()).unwrap();

        let from_link = graph.of("Child", "parentID").unwrap();
        assert_eq!(from_link["Child"], BTreeSet::from(["c".into(), "d".into()]));
    }

    #[test]
    fn test_closure_is_idempotent() {
        let mut graph = Dependents::new();
        graph.register(&child()).unwrap();
        let first = graph.of_columns("Child", ["a"]);
        graph.close();
        assert_eq!(graph.of_columns("Child", ["a"]), first);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let looped = Schema::builder("Loop")
            .index(["id"])
            .computed(passthrough("x", Dependencies::local(["y"])))
            .computed(passthrough("y", Dependencies::local(["x"])))
            .build()
            .unwrap();

        let mut graph = Dependents::new();
        assert!(matches!(graph.register(&looped), Err(StoreError::DependencyCycle(_))));
        assert!(graph.of("Loop", "x").is_none());
    }
}

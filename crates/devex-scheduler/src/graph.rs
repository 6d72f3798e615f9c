//! Static checks on the `depends_on` graph, run before any plugin.

use devex_core::Resource;
use std::collections::{BTreeSet, HashMap};

/// `(resource, dependency)` pairs where the dependency names no resource.
pub fn unknown_dependencies(resources: &[Resource]) -> Vec<(String, String)> {
    let names: BTreeSet<&str> = resources.iter().map(|r| r.name.as_str()).collect();
    resources
        .iter()
        .flat_map(|r| {
            r.depends_on
                .iter()
                .filter(|dep| !names.contains(dep.as_str()))
                .map(move |dep| (r.name.clone(), dep.clone()))
        })
        .collect()
}

/// Every resource that sits on a dependency cycle, self-dependencies included.
///
/// Resources that merely depend on a cycle are not members; they fail later
/// through normal dependency propagation.
pub fn cycle_members(resources: &[Resource]) -> BTreeSet<String> {
    let index: HashMap<&str, usize> = resources
        .iter()
        .enumerate()
        .map(|(i, r)| (r.name.as_str(), i))
        .collect();
    let edges: Vec<Vec<usize>> = resources
        .iter()
        .map(|r| {
            r.depends_on
                .iter()
                .filter_map(|dep| index.get(dep.as_str()).copied())
                .collect()
        })
        .collect();

    let mut scc = StronglyConnected::new(&edges);
    for node in 0..resources.len() {
        if scc.index[node].is_none() {
            scc.visit(node);
        }
    }

    scc.members
        .into_iter()
        .map(|i| resources[i].name.clone())
        .collect()
}

/// Tarjan's strongly connected components over adjacency lists.
struct StronglyConnected<'a> {
    edges: &'a [Vec<usize>],
    next_index: usize,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    stack: Vec<usize>,
    on_stack: Vec<bool>,
    members: BTreeSet<usize>,
}

impl<'a> StronglyConnected<'a> {
    fn new(edges: &'a [Vec<usize>]) -> Self {
        let n = edges.len();
        Self {
            edges,
            next_index: 0,
            index: vec![None; n],
            lowlink: vec![0; n],
            stack: Vec::new(),
            on_stack: vec![false; n],
            members: BTreeSet::new(),
        }
    }

    fn visit(&mut self, node: usize) {
        self.index[node] = Some(self.next_index);
        self.lowlink[node] = self.next_index;
        self.next_index += 1;
        self.stack.push(node);
        self.on_stack[node] = true;

        let edges = self.edges;
        for &dep in &edges[node] {
            match self.index[dep] {
                None => {
                    self.visit(dep);
                    self.lowlink[node] = self.lowlink[node].min(self.lowlink[dep]);
                }
                Some(dep_index) if self.on_stack[dep] => {
                    self.lowlink[node] = self.lowlink[node].min(dep_index);
                }
                Some(_) => {}
            }
        }

        if Some(self.lowlink[node]) == self.index[node] {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack[member] = false;
                component.push(member);
                if member == node {
                    break;
                }
            }
            if component.len() > 1 || edges[node].contains(&node) {
                self.members.extend(component);
            }
        }
    }
}

//! The control flow automaton (CFA) explored by the analysis and its partitioning into blocks.
//!
//! Nodes of the CFA are program locations, each belonging to exactly one function.
//! Edges are the operations executed when control moves from one location to the next.
//! Interprocedural control flow is represented by *FunctionCall* edges
//! from the call site to the entry location of the callee
//! and by *FunctionReturn* edges from the exit location of the callee to the return site.
//! The call edge knows its return site, so that a call-stack aware domain can match calls and returns.
//!
//! Building a CFA out of a source program is not the job of this crate.
//! Callers assemble it with [`Cfa::new`], [`Cfa::add_function`], [`Cfa::add_location`],
//! [`Cfa::add_edge`] and [`Cfa::add_call`].

use crate::prelude::*;
use derive_more::Deref;
use fnv::FnvHashMap;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef as _;
use std::collections::{BTreeMap, BTreeSet};

/// A program location, i.e. a node of the CFA.
pub type Location = NodeIndex;

/// The node type of the CFA.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct CfaNode {
    /// The function the location belongs to.
    pub function: String,
    /// A human-readable label, used in log messages and graph exports.
    pub label: String,
}

/// The kind of a CFA edge.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum CfaEdgeKind {
    /// An ordinary statement.
    Statement,
    /// An assumption (a branch condition).
    Assume,
    /// A call from a call site to the entry location of the callee.
    FunctionCall {
        /// The location in the caller where control continues after the call returns.
        return_site: Location,
    },
    /// A return from the exit location of a function to a return site.
    FunctionReturn,
    /// An edge without any effect.
    Blank,
}

/// The edge type of the CFA.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone)]
pub struct CfaEdge {
    pub kind: CfaEdgeKind,
    /// The operation of the edge in a form understood by the transfer relation.
    pub code: String,
}

/// The entry and exit location of a function.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct FunctionNodes {
    pub entry: Location,
    pub exit: Location,
}

/// An edge of the CFA as it is handed to a transfer relation.
#[derive(Debug, Clone, Copy)]
pub struct EdgeRef<'a> {
    pub index: EdgeIndex,
    pub source: Location,
    pub target: Location,
    pub edge: &'a CfaEdge,
    /// The node the edge leads to.
    pub target_node: &'a CfaNode,
}

/// A control flow automaton.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Cfa {
    graph: DiGraph<CfaNode, CfaEdge>,
    functions: BTreeMap<String, FunctionNodes>,
    main_function: String,
}

impl Cfa {
    /// Create a CFA that only contains the entry and exit location of the main function.
    pub fn new(main_function: &str) -> Cfa {
        let mut cfa = Cfa {
            graph: DiGraph::new(),
            functions: BTreeMap::new(),
            main_function: main_function.to_string(),
        };
        cfa.add_function(main_function);
        cfa
    }

    /// Add a function with fresh entry and exit locations.
    /// If the function already exists, its entry and exit locations are returned.
    pub fn add_function(&mut self, name: &str) -> FunctionNodes {
        if let Some(nodes) = self.functions.get(name) {
            return *nodes;
        }
        let entry = self.add_location(name, &format!("{name}_entry"));
        let exit = self.add_location(name, &format!("{name}_exit"));
        let nodes = FunctionNodes { entry, exit };
        self.functions.insert(name.to_string(), nodes);
        nodes
    }

    /// Add a location belonging to the given function.
    pub fn add_location(&mut self, function: &str, label: &str) -> Location {
        self.graph.add_node(CfaNode {
            function: function.to_string(),
            label: label.to_string(),
        })
    }

    /// Add an edge between two locations.
    pub fn add_edge(
        &mut self,
        source: Location,
        target: Location,
        kind: CfaEdgeKind,
        code: &str,
    ) -> EdgeIndex {
        self.graph.add_edge(
            source,
            target,
            CfaEdge {
                kind,
                code: code.to_string(),
            },
        )
    }

    /// Add the call edge from `call_site` to the entry of `callee`
    /// and the return edge from the exit of `callee` to `return_site`.
    /// Returns the indices of the call edge and of the return edge.
    pub fn add_call(
        &mut self,
        call_site: Location,
        callee: &str,
        return_site: Location,
    ) -> (EdgeIndex, EdgeIndex) {
        let callee_nodes = self.add_function(callee);
        let call = self.add_edge(
            call_site,
            callee_nodes.entry,
            CfaEdgeKind::FunctionCall { return_site },
            &format!("call {callee}"),
        );
        let ret = self.add_edge(
            callee_nodes.exit,
            return_site,
            CfaEdgeKind::FunctionReturn,
            &format!("return from {callee}"),
        );
        (call, ret)
    }

    /// The underlying graph.
    pub fn graph(&self) -> &DiGraph<CfaNode, CfaEdge> {
        &self.graph
    }

    /// Get the node of a location.
    pub fn node(&self, location: Location) -> &CfaNode {
        &self.graph[location]
    }

    /// Get an edge.
    pub fn edge(&self, edge: EdgeIndex) -> &CfaEdge {
        &self.graph[edge]
    }

    /// All edges leaving a location, in the order in which they were added to the CFA.
    pub fn leaving_edges(&self, location: Location) -> Vec<EdgeRef<'_>> {
        let mut edges: Vec<EdgeRef> = self
            .graph
            .edges(location)
            .map(|edge| EdgeRef {
                index: edge.id(),
                source: edge.source(),
                target: edge.target(),
                edge: edge.weight(),
                target_node: &self.graph[edge.target()],
            })
            .collect();
        edges.sort_by_key(|edge| edge.index);
        edges
    }

    /// The entry and exit location of a function.
    pub fn function(&self, name: &str) -> Option<&FunctionNodes> {
        self.functions.get(name)
    }

    /// All functions of the CFA, ordered by name.
    pub fn functions(&self) -> impl Iterator<Item = (&String, &FunctionNodes)> {
        self.functions.iter()
    }

    /// The name of the main function.
    pub fn main_function(&self) -> &str {
        &self.main_function
    }

    /// The entry location of the main function.
    pub fn main_entry(&self) -> Location {
        self.functions[&self.main_function].entry
    }

    /// Compute a priority for each location, such that
    /// locations earlier in a weak topological order of the CFA have higher priority.
    /// Locations in the same strongly connected component keep the order in which the component was found.
    pub fn topological_priorities(&self) -> FnvHashMap<Location, usize> {
        let mut priorities = FnvHashMap::default();
        // kosaraju_scc returns the components in reverse topological order.
        for (priority, location) in petgraph::algo::kosaraju_scc(&self.graph)
            .into_iter()
            .flatten()
            .enumerate()
        {
            priorities.insert(location, priority);
        }
        priorities
    }
}

/// The call stack of an abstract state, i.e. the names of the active functions.
/// The last element is the function the state belongs to.
#[derive(
    Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Default, PartialOrd, Ord, Deref,
)]
pub struct CallStack(Vec<String>);

impl CallStack {
    /// Create a call stack from the names of the active functions, outermost first.
    pub fn new<T: Into<String>>(functions: impl IntoIterator<Item = T>) -> CallStack {
        CallStack(functions.into_iter().map(|f| f.into()).collect())
    }

    /// The function on top of the call stack.
    pub fn current_function(&self) -> Option<&str> {
        self.0.last().map(|f| f.as_str())
    }

    /// Return the call stack after calling `function`.
    pub fn push(&self, function: &str) -> CallStack {
        let mut stack = self.0.clone();
        stack.push(function.to_string());
        CallStack(stack)
    }

    /// Return the call stack after returning from the current function.
    pub fn pop(&self) -> CallStack {
        let mut stack = self.0.clone();
        stack.pop();
        CallStack(stack)
    }
}

impl std::fmt::Display for CallStack {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "[{}]", self.0.join(" -> "))
    }
}

/// The index of a block in its [`BlockPartitioning`].
#[derive(
    Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord,
)]
pub struct BlockId(pub usize);

/// A region of the CFA that is analyzed separately and summarized by block-abstraction memoization.
/// Blocks are immutable once the partitioning was computed.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Block {
    pub id: BlockId,
    /// The name of the function the block was created from.
    pub name: String,
    /// The only location where control enters the block.
    pub entry: Location,
    /// The locations where control leaves the block.
    pub exits: BTreeSet<Location>,
    /// All locations of the block.
    pub nodes: BTreeSet<Location>,
}

impl Block {
    /// Returns `true` if control leaves the block at the given location.
    pub fn is_exit(&self, location: Location) -> bool {
        self.exits.contains(&location)
    }

    /// Returns `true` if the location belongs to the block.
    pub fn contains(&self, location: Location) -> bool {
        self.nodes.contains(&location)
    }
}

/// The partitioning of a CFA into blocks.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BlockPartitioning {
    blocks: Vec<Block>,
    entry_to_block: FnvHashMap<Location, BlockId>,
}

impl BlockPartitioning {
    /// Create one block per function, except for the main function.
    pub fn function_blocks(cfa: &Cfa) -> BlockPartitioning {
        let mut blocks = Vec::new();
        let mut entry_to_block = FnvHashMap::default();
        for (name, nodes) in cfa.functions() {
            if name == cfa.main_function() {
                continue;
            }
            let id = BlockId(blocks.len());
            let locations = cfa
                .graph()
                .node_indices()
                .filter(|location| &cfa.node(*location).function == name)
                .collect();
            entry_to_block.insert(nodes.entry, id);
            blocks.push(Block {
                id,
                name: name.clone(),
                entry: nodes.entry,
                exits: BTreeSet::from([nodes.exit]),
                nodes: locations,
            });
        }
        BlockPartitioning {
            blocks,
            entry_to_block,
        }
    }

    /// Get a block by its ID.
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    /// Get the block whose entry location is the given location.
    pub fn block_for_entry(&self, location: Location) -> Option<&Block> {
        self.entry_to_block
            .get(&location)
            .map(|id| &self.blocks[id.0])
    }

    /// All blocks of the partitioning.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }
}

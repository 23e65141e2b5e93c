//! Graph views and generic traversal over the IR.
//!
//! Two edge relations matter to passes: control flow between basic blocks
//! (successors are the terminator's targets) and use-def between
//! instructions (successors are the users of a result). Both are exposed
//! through the [`Graph`] trait so one [`Traversal`] iterator serves every
//! pass; an [`EdgeSet`] materializes a bidirectional adjacency when the
//! backward direction is needed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use crate::{value::Use, Block, Func, Inst, Module};

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// A directed graph keyed by node identity.
pub trait Graph {
    type Node: Copy + Eq + Hash;

    fn successors(&self, node: Self::Node) -> Vec<Self::Node>;
}

/// The control-flow graph of a module's blocks: edges follow terminator
/// targets.
pub struct ControlFlowGraph<'m> {
    module: &'m Module,
}

impl<'m> ControlFlowGraph<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self { module }
    }
}

impl Graph for ControlFlowGraph<'_> {
    type Node = Block;

    fn successors(&self, node: Block) -> Vec<Block> {
        self.module.block_successors(node)
    }
}

// ---------------------------------------------------------------------------
// EdgeSet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// A bidirectional edge set over nodes of one kind.
///
/// Built once by a pass, then traversed in either direction through the
/// [`EdgeSet::forward`] / [`EdgeSet::backward`] views.
#[derive(Debug, Default, Clone)]
pub struct EdgeSet<N: Copy + Eq + Hash> {
    succs: HashMap<N, Vec<N>>,
    preds: HashMap<N, Vec<N>>,
}

impl<N: Copy + Eq + Hash> EdgeSet<N> {
    pub fn new() -> Self {
        Self {
            succs: HashMap::new(),
            preds: HashMap::new(),
        }
    }

    pub fn add_edge(&mut self, from: N, to: N) {
        self.succs.entry(from).or_default().push(to);
        self.preds.entry(to).or_default().push(from);
    }

    pub fn successors(&self, node: N) -> &[N] {
        self.succs.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, node: N) -> &[N] {
        self.preds.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn forward(&self) -> DirectedView<'_, N> {
        DirectedView {
            edges: self,
            direction: Direction::Forward,
        }
    }

    pub fn backward(&self) -> DirectedView<'_, N> {
        DirectedView {
            edges: self,
            direction: Direction::Backward,
        }
    }
}

impl EdgeSet<Block> {
    /// The control-flow edges of one function.
    pub fn control_flow(module: &Module, func: Func) -> Self {
        let mut edges = Self::new();
        for block in &module.func(func).blocks {
            for succ in module.block_successors(*block) {
                edges.add_edge(*block, succ);
            }
        }
        edges
    }
}

impl EdgeSet<Inst> {
    /// The use-def edges of one function: an edge runs from a defining
    /// instruction to each of its users.
    pub fn use_def(module: &Module, func: Func) -> Self {
        let mut edges = Self::new();
        let mut operands = Vec::new();
        for block in &module.func(func).blocks {
            for user in &module.block(*block).insts {
                operands.clear();
                module.inst(*user).kind.collect_uses(&mut operands);
                for operand in &operands {
                    if let Use::Inst(_, def) = operand {
                        edges.add_edge(*def, *user);
                    }
                }
            }
        }
        edges
    }
}

/// One direction of an [`EdgeSet`], usable as a [`Graph`].
pub struct DirectedView<'a, N: Copy + Eq + Hash> {
    edges: &'a EdgeSet<N>,
    direction: Direction,
}

impl<N: Copy + Eq + Hash> Graph for DirectedView<'_, N> {
    type Node = N;

    fn successors(&self, node: N) -> Vec<N> {
        match self.direction {
            Direction::Forward => self.edges.successors(node).to_vec(),
            Direction::Backward => self.edges.predecessors(node).to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    BreadthFirst,
    PreOrder,
    PostOrder,
}

/// A lazy traversal from a root. Each reachable node is yielded exactly
/// once; visited tracking is by node identity. The iterator borrows the
/// graph and must not outlive mutations to it.
pub struct Traversal<'g, G: Graph> {
    graph: &'g G,
    order: Order,
    /// BFS/pre-order frontier; front is the BFS head, back the stack top.
    frontier: VecDeque<G::Node>,
    /// Post-order working stack; a node is pushed in the visit phase and
    /// yielded when popped in the emit phase, after its descendants.
    stack: Vec<(G::Node, bool)>,
    visited: HashSet<G::Node>,
}

impl<'g, G: Graph> Traversal<'g, G> {
    pub fn new(graph: &'g G, root: G::Node, order: Order) -> Self {
        let mut traversal = Self {
            graph,
            order,
            frontier: VecDeque::new(),
            stack: Vec::new(),
            visited: HashSet::new(),
        };
        traversal.visited.insert(root);
        match order {
            Order::PostOrder => traversal.stack.push((root, false)),
            _ => traversal.frontier.push_back(root),
        }
        traversal
    }

    pub fn breadth_first(graph: &'g G, root: G::Node) -> Self {
        Self::new(graph, root, Order::BreadthFirst)
    }

    pub fn pre_order(graph: &'g G, root: G::Node) -> Self {
        Self::new(graph, root, Order::PreOrder)
    }

    pub fn post_order(graph: &'g G, root: G::Node) -> Self {
        Self::new(graph, root, Order::PostOrder)
    }
}

impl<G: Graph> Iterator for Traversal<'_, G> {
    type Item = G::Node;

    fn next(&mut self) -> Option<G::Node> {
        match self.order {
            Order::BreadthFirst => {
                let node = self.frontier.pop_front()?;
                for succ in self.graph.successors(node) {
                    if self.visited.insert(succ) {
                        self.frontier.push_back(succ);
                    }
                }
                Some(node)
            }
            Order::PreOrder => {
                let node = self.frontier.pop_back()?;
                // Children go on in reverse so the first successor is
                // visited first.
                for succ in self.graph.successors(node).into_iter().rev() {
                    if self.visited.insert(succ) {
                        self.frontier.push_back(succ);
                    }
                }
                Some(node)
            }
            Order::PostOrder => {
                while let Some((node, emit)) = self.stack.pop() {
                    if emit {
                        return Some(node);
                    }
                    self.stack.push((node, true));
                    for succ in self.graph.successors(node).into_iter().rev() {
                        if self.visited.insert(succ) {
                            self.stack.push((succ, false));
                        }
                    }
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> EdgeSet<u32> {
        // A -> B, A -> C, B -> D, C -> D
        let mut edges = EdgeSet::new();
        edges.add_edge(0, 1);
        edges.add_edge(0, 2);
        edges.add_edge(1, 3);
        edges.add_edge(2, 3);
        edges
    }

    #[test]
    fn breadth_first_diamond() {
        let edges = diamond();
        let order: Vec<u32> = Traversal::breadth_first(&edges.forward(), 0).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn pre_order_diamond() {
        let edges = diamond();
        let order: Vec<u32> = Traversal::pre_order(&edges.forward(), 0).collect();
        assert_eq!(order, vec![0, 1, 3, 2]);
    }

    #[test]
    fn post_order_diamond() {
        let edges = diamond();
        let order: Vec<u32> = Traversal::post_order(&edges.forward(), 0).collect();
        assert_eq!(order, vec![3, 1, 2, 0]);
    }

    #[test]
    fn backward_traversal_follows_predecessors() {
        let edges = diamond();
        let order: Vec<u32> = Traversal::breadth_first(&edges.backward(), 3).collect();
        assert_eq!(order, vec![3, 1, 2, 0]);
    }

    #[test]
    fn each_node_visited_once_with_cycles() {
        let mut edges = EdgeSet::new();
        edges.add_edge(0u32, 1);
        edges.add_edge(1, 0);
        edges.add_edge(1, 2);
        for order in [Order::BreadthFirst, Order::PreOrder, Order::PostOrder] {
            let mut nodes: Vec<u32> = Traversal::new(&edges.forward(), 0, order).collect();
            nodes.sort_unstable();
            assert_eq!(nodes, vec![0, 1, 2]);
        }
    }

    #[test]
    fn unreached_nodes_stay_unvisited() {
        let mut edges = EdgeSet::new();
        edges.add_edge(0u32, 1);
        edges.add_edge(2, 3);
        let nodes: Vec<u32> = Traversal::breadth_first(&edges.forward(), 0).collect();
        assert_eq!(nodes, vec![0, 1]);
    }

    use crate::{
        builder::Builder,
        ty::{DataType, Type},
        value::{Literal, ScalarLiteral},
    };

    /// entry -> b1, entry -> b2, b1 -> exit, b2 -> exit
    fn diamond_function(module: &mut Module) -> (Func, [Block; 4]) {
        let mut b = Builder::new(module);
        let func = b.build_function("f", &[], Type::Void, Vec::new()).unwrap();
        let entry = b.module().entry(func);
        let b1 = b.build_block("b1", &[], func);
        let b2 = b.build_block("b2", &[], func);
        let exit = b.build_block("exit", &[], func);

        let cond = b.module().literal_use(
            Type::scalar(DataType::bool()),
            Literal::Scalar(ScalarLiteral::Bool(true)),
        );
        b.move_to(Some(entry));
        b.conditional(cond, b1, Vec::new(), b2, Vec::new()).unwrap();
        b.move_to(Some(b1));
        b.branch(exit, Vec::new()).unwrap();
        b.move_to(Some(b2));
        b.branch(exit, Vec::new()).unwrap();
        b.move_to(Some(exit));
        b.ret(None).unwrap();

        (func, [entry, b1, b2, exit])
    }

    #[test]
    fn control_flow_traversal_orders() {
        let mut module = Module::new("M");
        let (_, [entry, b1, b2, exit]) = diamond_function(&mut module);

        let cfg = ControlFlowGraph::new(&module);
        let bfs: Vec<Block> = Traversal::breadth_first(&cfg, entry).collect();
        assert_eq!(bfs, vec![entry, b1, b2, exit]);

        let pre: Vec<Block> = Traversal::pre_order(&cfg, entry).collect();
        assert_eq!(pre, vec![entry, b1, exit, b2]);

        let post: Vec<Block> = Traversal::post_order(&cfg, entry).collect();
        assert_eq!(post, vec![exit, b1, b2, entry]);
    }

    #[test]
    fn control_flow_edge_set_walks_backward() {
        let mut module = Module::new("M");
        let (func, [entry, b1, b2, exit]) = diamond_function(&mut module);

        let edges = EdgeSet::control_flow(&module, func);
        let back: Vec<Block> = Traversal::breadth_first(&edges.backward(), exit).collect();
        assert_eq!(back, vec![exit, b1, b2, entry]);
        assert_eq!(edges.predecessors(exit), &[b1, b2]);
    }

    #[test]
    fn use_def_edges_run_from_definitions_to_users() {
        let mut module = Module::new("M");
        let f32s = Type::scalar(DataType::float(32));
        let mut b = Builder::new(&mut module);
        let func = b
            .build_function("g", &[("a", f32s.clone())], f32s.clone(), Vec::new())
            .unwrap();
        let entry = b.module().entry(func);
        b.move_to(Some(entry));
        let a = {
            let m = b.module();
            m.arg_use(m.func(func).args[0])
        };
        let v0 = b.add(a.clone(), a.clone()).unwrap();
        let v0_use = b.module().inst_use(v0);
        let v1 = b.add(v0_use, a).unwrap();
        let v1_use = b.module().inst_use(v1);
        b.ret(Some(v1_use)).unwrap();
        let ret = *module.block(entry).insts.last().unwrap();

        let edges = EdgeSet::use_def(&module, func);
        let forward: Vec<Inst> = Traversal::breadth_first(&edges.forward(), v0).collect();
        assert_eq!(forward, vec![v0, v1, ret]);
        assert_eq!(edges.predecessors(v1), &[v0]);
    }
}

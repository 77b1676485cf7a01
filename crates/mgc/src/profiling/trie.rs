//! Call-Graph Trie - where allocations happen
//!
//! Two kinds of node live in one arena:
//! - Static nodes, one per function activation context of generated code.
//!   They have a fixed layout of entries: allocation points, direct calls
//!   and indirect calls.
//! - Dynamic nodes, parts of a singly linked list that describe code whose
//!   call graph is only discovered at run time: foreign code, and the
//!   callees of indirect calls.
//!
//! ```text
//!  Static(f) ──► [Alloc pc=0x10 #0x100]
//!                [Direct pc=0x18 ─────► Static(g)]
//!                [Indirect pc=0x20 ──► Dyn(Call h) ─► Dyn(Call k) ─► ∅]
//!                                         │              │
//!                                         ▼              ▼
//!                                     Static(h)      Static(k)
//! ```
//!
//! A [`Hole`] names a place that holds an optional node: the root, an entry
//! of a static node, or the callee of a dynamic call part. Nodes are created
//! lazily when a hole is first entered.

use super::PROFINFO_LOWEST;
use crate::error::{MgcError, Result};
use crate::object::PROFINFO_MASK;

/// Index of a node in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Layout of one static-node entry, as emitted by the code generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Allocation { pc: usize },
    DirectCall { call_site: usize, callee_pc: usize },
    IndirectCall { call_site: usize },
}

/// An entry of a static node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticEntry {
    Allocation {
        pc: usize,
        profinfo: u64,
    },
    DirectCall {
        call_site: usize,
        callee_pc: usize,
        callee: Option<NodeId>,
    },
    /// Head of a dynamic chain of `Call` parts, one per callee seen
    IndirectCall {
        call_site: usize,
        chain: Option<NodeId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticNode {
    /// Entry point of the function
    pub pc: usize,
    /// Next node of the tail-call cycle; the node itself when alone
    pub tail_link: NodeId,
    pub entries: Vec<StaticEntry>,
}

/// Payload of a dynamic part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicPart {
    Call { callee: Option<NodeId> },
    Allocation { profinfo: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicNode {
    /// Call site or allocation point
    pub pc: usize,
    pub part: DynamicPart,
    pub next: Option<NodeId>,
}

/// Kind of a dynamic part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicKind {
    Call,
    Allocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrieNode {
    Static(StaticNode),
    Dynamic(DynamicNode),
}

/// A place holding an optional node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hole {
    Root,
    /// Entry `index` of a static node: a direct callee or an indirect chain
    Entry { node: NodeId, index: usize },
    /// Callee of a dynamic `Call` part
    Callee(NodeId),
}

/// Allocation point found by [`Trie::iter_allocation_points`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationPoint {
    pub node: NodeId,
    pub pc: usize,
    pub profinfo: u64,
}

/// Arena of trie nodes
#[derive(Debug, Clone)]
pub struct Trie {
    nodes: Vec<TrieNode>,
    root: Option<NodeId>,
    next_profinfo: u64,
}

impl Default for Trie {
    fn default() -> Self {
        Self::new()
    }
}

impl Trie {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            next_profinfo: PROFINFO_LOWEST,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&TrieNode> {
        self.nodes.get(id.0)
    }

    /// A fresh allocation-site identifier
    ///
    /// Identifiers start at `PROFINFO_LOWEST` and wrap back to it once the
    /// header field is exhausted, so they are never zero nor a sentinel.
    pub fn fresh_profinfo(&mut self) -> u64 {
        let profinfo = self.next_profinfo;
        self.next_profinfo = if profinfo >= PROFINFO_MASK {
            log::warn!("Allocation-site identifiers exhausted, reusing from {:#x}", PROFINFO_LOWEST);
            PROFINFO_LOWEST
        } else {
            profinfo + 1
        };
        profinfo
    }

    fn push(&mut self, node: TrieNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Add a static node for the function at `pc`
    ///
    /// Allocation points get fresh identifiers; call points start empty.
    pub fn add_static_node(&mut self, pc: usize, layout: &[EntryKind]) -> NodeId {
        let id = NodeId(self.nodes.len());
        let entries = layout
            .iter()
            .map(|kind| match *kind {
                EntryKind::Allocation { pc } => StaticEntry::Allocation {
                    pc,
                    profinfo: self.fresh_profinfo(),
                },
                EntryKind::DirectCall {
                    call_site,
                    callee_pc,
                } => StaticEntry::DirectCall {
                    call_site,
                    callee_pc,
                    callee: None,
                },
                EntryKind::IndirectCall { call_site } => StaticEntry::IndirectCall {
                    call_site,
                    chain: None,
                },
            })
            .collect();
        self.push(TrieNode::Static(StaticNode {
            pc,
            tail_link: id,
            entries,
        }))
    }

    /// Use `node` as the root if there is none yet
    pub fn set_root(&mut self, node: NodeId) {
        if self.root.is_none() {
            self.root = Some(node);
        }
    }

    fn static_node(&self, id: NodeId) -> Result<&StaticNode> {
        match self.nodes.get(id.0) {
            Some(TrieNode::Static(node)) => Ok(node),
            _ => Err(MgcError::InvalidArgument(format!("{:?} is not a static node", id))),
        }
    }

    fn static_node_mut(&mut self, id: NodeId) -> Result<&mut StaticNode> {
        match self.nodes.get_mut(id.0) {
            Some(TrieNode::Static(node)) => Ok(node),
            _ => Err(MgcError::InvalidArgument(format!("{:?} is not a static node", id))),
        }
    }

    fn dynamic_node(&self, id: NodeId) -> Option<&DynamicNode> {
        match self.nodes.get(id.0) {
            Some(TrieNode::Dynamic(node)) => Some(node),
            _ => None,
        }
    }

    fn entry(&self, node: NodeId, index: usize) -> Result<&StaticEntry> {
        self.static_node(node)?.entries.get(index).ok_or_else(|| {
            MgcError::InvalidArgument(format!("{:?} has no entry {}", node, index))
        })
    }

    /// Identifier of the allocation point at entry `index` of `node`
    pub fn allocation_point_profinfo(&self, node: NodeId, index: usize) -> Option<u64> {
        match self.entry(node, index).ok()? {
            StaticEntry::Allocation { profinfo, .. } => Some(*profinfo),
            _ => None,
        }
    }

    /// Node held by `hole`
    pub fn get(&self, hole: Hole) -> Result<Option<NodeId>> {
        match hole {
            Hole::Root => Ok(self.root),
            Hole::Entry { node, index } => match self.entry(node, index)? {
                StaticEntry::DirectCall { callee, .. } => Ok(*callee),
                StaticEntry::IndirectCall { chain, .. } => Ok(*chain),
                StaticEntry::Allocation { .. } => Err(MgcError::InvalidArgument(format!(
                    "entry {} of {:?} is an allocation point",
                    index, node
                ))),
            },
            Hole::Callee(part) => match self.dynamic_node(part) {
                Some(DynamicNode {
                    part: DynamicPart::Call { callee },
                    ..
                }) => Ok(*callee),
                _ => Err(MgcError::InvalidArgument(format!("{:?} is not a call part", part))),
            },
        }
    }

    fn fill(&mut self, hole: Hole, id: NodeId) -> Result<()> {
        match hole {
            Hole::Root => self.root = Some(id),
            Hole::Entry { node, index } => {
                let entry = self
                    .static_node_mut(node)?
                    .entries
                    .get_mut(index)
                    .ok_or_else(|| {
                        MgcError::InvalidArgument(format!("{:?} has no entry {}", node, index))
                    })?;
                match entry {
                    StaticEntry::DirectCall { callee, .. } => *callee = Some(id),
                    StaticEntry::IndirectCall { chain, .. } => *chain = Some(id),
                    StaticEntry::Allocation { .. } => {
                        return Err(MgcError::InvalidArgument(format!(
                            "entry {} of {:?} is an allocation point",
                            index, node
                        )))
                    },
                }
            },
            Hole::Callee(part) => match self.nodes.get_mut(part.0) {
                Some(TrieNode::Dynamic(DynamicNode {
                    part: DynamicPart::Call { callee },
                    ..
                })) => *callee = Some(id),
                _ => {
                    return Err(MgcError::InvalidArgument(format!(
                        "{:?} is not a call part",
                        part
                    )))
                },
            },
        }
        Ok(())
    }

    /// Callee node of the direct call at entry `index`, created on first use
    pub fn direct_callee(&mut self, node: NodeId, index: usize) -> Result<NodeId> {
        let callee_pc = match self.entry(node, index)? {
            StaticEntry::DirectCall {
                callee: Some(callee),
                ..
            } => return Ok(*callee),
            StaticEntry::DirectCall { callee_pc, .. } => *callee_pc,
            _ => {
                return Err(MgcError::InvalidArgument(format!(
                    "entry {} of {:?} is not a direct call",
                    index, node
                )))
            },
        };
        let callee = self.add_static_node(callee_pc, &[]);
        self.fill(Hole::Entry { node, index }, callee)?;
        Ok(callee)
    }

    /// Callee node for `callee_pc` reached through the indirect call at
    /// entry `index`
    pub fn indirect_callee(&mut self, node: NodeId, index: usize, callee_pc: usize) -> Result<NodeId> {
        if !matches!(self.entry(node, index)?, StaticEntry::IndirectCall { .. }) {
            return Err(MgcError::InvalidArgument(format!(
                "entry {} of {:?} is not an indirect call",
                index, node
            )));
        }
        let part = self.find_or_add_part(Hole::Entry { node, index }, callee_pc, DynamicKind::Call)?;
        match self.get(Hole::Callee(part))? {
            Some(callee) => Ok(callee),
            None => {
                let callee = self.add_static_node(callee_pc, &[]);
                self.fill(Hole::Callee(part), callee)?;
                Ok(callee)
            },
        }
    }

    /// Identifier of the foreign allocation point `pc` in the chain at `hole`
    pub fn foreign_allocation_point(&mut self, hole: Hole, pc: usize) -> Result<u64> {
        let part = self.find_or_add_part(hole, pc, DynamicKind::Allocation)?;
        match self.dynamic_node(part) {
            Some(DynamicNode {
                part: DynamicPart::Allocation { profinfo },
                ..
            }) => Ok(*profinfo),
            _ => Err(MgcError::InvalidState {
                expected: "allocation part".to_string(),
                actual: format!("{:?}", self.node(part)),
            }),
        }
    }

    /// Enter the foreign call at `call_site` from the chain at `hole`
    ///
    /// Returns the hole of the callee, where the callee's own allocations
    /// and calls are recorded.
    pub fn foreign_call(&mut self, hole: Hole, call_site: usize) -> Result<Hole> {
        let part = self.find_or_add_part(hole, call_site, DynamicKind::Call)?;
        Ok(Hole::Callee(part))
    }

    /// Find the part of kind `kind` for `pc` in the chain at `hole`,
    /// appending one if absent
    fn find_or_add_part(&mut self, hole: Hole, pc: usize, kind: DynamicKind) -> Result<NodeId> {
        let mut last = None;
        let mut cursor = self.get(hole)?;
        while let Some(id) = cursor {
            let node = self.dynamic_node(id).ok_or_else(|| {
                MgcError::InvalidArgument(format!("{:?} does not hold a dynamic chain", hole))
            })?;
            if node.pc == pc && Self::kind_of(&node.part) == kind {
                return Ok(id);
            }
            last = Some(id);
            cursor = node.next;
        }

        let part = match kind {
            DynamicKind::Call => DynamicPart::Call { callee: None },
            DynamicKind::Allocation => DynamicPart::Allocation {
                profinfo: self.fresh_profinfo(),
            },
        };
        let id = self.push(TrieNode::Dynamic(DynamicNode { pc, part, next: None }));
        match last {
            Some(last) => {
                if let Some(TrieNode::Dynamic(node)) = self.nodes.get_mut(last.0) {
                    node.next = Some(id);
                }
            },
            None => self.fill(hole, id)?,
        }
        Ok(id)
    }

    fn kind_of(part: &DynamicPart) -> DynamicKind {
        match part {
            DynamicPart::Call { .. } => DynamicKind::Call,
            DynamicPart::Allocation { .. } => DynamicKind::Allocation,
        }
    }

    /// Kind of a dynamic part; `None` for static nodes
    pub fn classify_dynamic(&self, id: NodeId) -> Option<DynamicKind> {
        self.dynamic_node(id).map(|node| Self::kind_of(&node.part))
    }

    /// Splice `callee` into the tail-call cycle of `caller`
    ///
    /// A callee already on a cycle is left where it is.
    pub fn link_tail_call(&mut self, caller: NodeId, callee: NodeId) -> Result<()> {
        if caller == callee || self.static_node(callee)?.tail_link != callee {
            return Ok(());
        }
        let next = self.static_node(caller)?.tail_link;
        self.static_node_mut(callee)?.tail_link = next;
        self.static_node_mut(caller)?.tail_link = callee;
        Ok(())
    }

    /// Nodes of the tail-call cycle through `node`, starting with it
    pub fn tail_chain(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let mut chain = vec![node];
        let mut cursor = self.static_node(node)?.tail_link;
        while cursor != node {
            chain.push(cursor);
            cursor = self.static_node(cursor)?.tail_link;
        }
        Ok(chain)
    }

    /// Every allocation point in the arena, static and dynamic
    pub fn iter_allocation_points(&self) -> impl Iterator<Item = AllocationPoint> + '_ {
        self.nodes.iter().enumerate().flat_map(|(i, node)| {
            let points: Vec<AllocationPoint> = match node {
                TrieNode::Static(node) => node
                    .entries
                    .iter()
                    .filter_map(|entry| match entry {
                        StaticEntry::Allocation { pc, profinfo } => Some(AllocationPoint {
                            node: NodeId(i),
                            pc: *pc,
                            profinfo: *profinfo,
                        }),
                        _ => None,
                    })
                    .collect(),
                TrieNode::Dynamic(DynamicNode {
                    pc,
                    part: DynamicPart::Allocation { profinfo },
                    ..
                }) => vec![AllocationPoint {
                    node: NodeId(i),
                    pc: *pc,
                    profinfo: *profinfo,
                }],
                TrieNode::Dynamic(_) => Vec::new(),
            };
            points
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Vec<EntryKind> {
        vec![
            EntryKind::Allocation { pc: 0x10 },
            EntryKind::DirectCall {
                call_site: 0x18,
                callee_pc: 0x400,
            },
            EntryKind::IndirectCall { call_site: 0x20 },
            EntryKind::Allocation { pc: 0x28 },
        ]
    }

    #[test]
    fn test_static_allocation_points_get_fresh_ids() {
        let mut trie = Trie::new();
        let f = trie.add_static_node(0x100, &layout());
        assert_eq!(trie.allocation_point_profinfo(f, 0), Some(PROFINFO_LOWEST));
        assert_eq!(trie.allocation_point_profinfo(f, 3), Some(PROFINFO_LOWEST + 1));
        assert_eq!(trie.allocation_point_profinfo(f, 1), None);
        assert_eq!(trie.iter_allocation_points().count(), 2);
    }

    #[test]
    fn test_direct_callee_created_once() {
        let mut trie = Trie::new();
        let f = trie.add_static_node(0x100, &layout());
        let g = trie.direct_callee(f, 1).unwrap();
        assert_eq!(trie.direct_callee(f, 1).unwrap(), g);
        match trie.node(g) {
            Some(TrieNode::Static(node)) => assert_eq!(node.pc, 0x400),
            other => panic!("unexpected {:?}", other),
        }
        assert!(trie.direct_callee(f, 0).is_err());
    }

    #[test]
    fn test_indirect_callees_share_one_chain() {
        let mut trie = Trie::new();
        let f = trie.add_static_node(0x100, &layout());
        let h = trie.indirect_callee(f, 2, 0x500).unwrap();
        let k = trie.indirect_callee(f, 2, 0x600).unwrap();
        assert_ne!(h, k);
        assert_eq!(trie.indirect_callee(f, 2, 0x500).unwrap(), h);

        let head = trie.get(Hole::Entry { node: f, index: 2 }).unwrap().unwrap();
        assert_eq!(trie.classify_dynamic(head), Some(DynamicKind::Call));
        assert_eq!(trie.classify_dynamic(f), None);
    }

    #[test]
    fn test_foreign_allocation_points() {
        let mut trie = Trie::new();
        let a = trie.foreign_allocation_point(Hole::Root, 0x700).unwrap();
        let b = trie.foreign_allocation_point(Hole::Root, 0x708).unwrap();
        assert_ne!(a, b);
        assert_eq!(trie.foreign_allocation_point(Hole::Root, 0x700).unwrap(), a);
        assert!(a >= PROFINFO_LOWEST);

        let inner = trie.foreign_call(Hole::Root, 0x710).unwrap();
        let c = trie.foreign_allocation_point(inner, 0x700).unwrap();
        assert_ne!(c, a);
        assert_eq!(trie.foreign_call(Hole::Root, 0x710).unwrap(), inner);
    }

    #[test]
    fn test_tail_chain_is_cyclic() {
        let mut trie = Trie::new();
        let f = trie.add_static_node(0x100, &[]);
        let g = trie.add_static_node(0x200, &[]);
        let h = trie.add_static_node(0x300, &[]);
        assert_eq!(trie.tail_chain(f).unwrap(), vec![f]);

        trie.link_tail_call(f, g).unwrap();
        trie.link_tail_call(f, h).unwrap();
        assert_eq!(trie.tail_chain(f).unwrap(), vec![f, h, g]);
        assert_eq!(trie.tail_chain(g).unwrap(), vec![g, f, h]);

        // already linked
        trie.link_tail_call(h, g).unwrap();
        assert_eq!(trie.tail_chain(f).unwrap().len(), 3);
    }
}

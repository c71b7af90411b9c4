//! Arena graph of consensus nodes over matched reads.

use crate::index::IndexReader;
use crate::search::{Coords, QueryOverlap, Read};
use crate::ReadId;

/// Index of a node within its graph's arena.
pub type NodeId = u32;

/// Safety cap on the reads a single locus may gather.
const READ_CAP: usize = 2000;

/// Minimum bases two placements must share to be merged or edged.
const MIN_AGREE: i32 = 15;

/// One read's placement within a node, in the node's coordinate frame.
#[derive(Debug, Clone, Copy)]
pub struct Mapped {
    pub id: ReadId,
    pub coords: Coords,
}

/// A consensus stretch of sequence supported by mapped reads.
///
/// `edges[0]` points at nodes extending leftward, `edges[1]` rightward;
/// each edge carries the overlap length and is mirrored on the other node.
#[derive(Debug)]
pub struct Node {
    pub seq: String,
    pub edges: [Vec<(NodeId, u32)>; 2],
    pub reads: Vec<Mapped>,
    pub coords: Coords,
    pub dead: bool,
}

impl Node {
    fn new(seq: String, coords: Coords) -> Self {
        Self {
            seq,
            edges: [Vec::new(), Vec::new()],
            reads: Vec::new(),
            coords,
            dead: false,
        }
    }

    /// Whether this node carries at least `min_reads` supporters.
    #[must_use]
    pub fn is_substantial(&self, min_reads: usize) -> bool {
        self.reads.len() >= min_reads
    }

    /// A node is weak on one side when no read anchors its tip deeply.
    #[must_use]
    pub fn is_weak(&self, cutoff: i32, drxn: usize) -> bool {
        let tip = self.coords[drxn];
        self.reads
            .iter()
            .all(|m| (tip - m.coords[drxn ^ 1]).abs() < cutoff)
    }
}

/// The arena of nodes grown from one query's matched reads.
pub struct Graph {
    pub nodes: Vec<Node>,
}

impl Graph {
    /// Builds consensus nodes from reads placed in the query frame.
    ///
    /// Returns `None` past the read safety cap; the caller records the
    /// locus as non-diploid and moves on. Reads agreeing with a node over
    /// their shared window join it; disagreeing reads open rival nodes,
    /// which is what splits the two alleles of a diploid locus.
    #[must_use]
    pub fn from_reads(reads: &[Read]) -> Option<Self> {
        if reads.len() >= READ_CAP {
            return None;
        }
        let mut sorted: Vec<&Read> = reads.iter().collect();
        sorted.sort_by_key(|r| r.coords[0]);

        let mut graph = Self { nodes: Vec::new() };
        for read in sorted {
            let mut placed = false;
            for node in &mut graph.nodes {
                if Self::agrees(node, read) {
                    Self::absorb(node, read);
                    placed = true;
                    break;
                }
            }
            if !placed {
                let mut node = Node::new(read.seq.clone(), read.coords);
                node.reads.push(Mapped {
                    id: read.id,
                    coords: read.coords,
                });
                graph.nodes.push(node);
            }
        }
        graph.connect();
        Some(graph)
    }

    /// Whether a read's placement matches a node's consensus over their
    /// shared window.
    fn agrees(node: &Node, read: &Read) -> bool {
        let lo = node.coords[0].max(read.coords[0]);
        let hi = node.coords[1].min(read.coords[1]);
        if hi - lo < MIN_AGREE.min(read.coords.len()) {
            return false;
        }
        let node_at = (lo - node.coords[0]) as usize;
        let read_at = (lo - read.coords[0]) as usize;
        let len = (hi - lo) as usize;
        node.seq[node_at..node_at + len] == read.seq[read_at..read_at + len]
    }

    /// Extends a node's consensus with an agreeing read.
    fn absorb(node: &mut Node, read: &Read) {
        if read.coords[1] > node.coords[1] {
            let tail = (node.coords[1] - read.coords[0]) as usize;
            node.seq.push_str(&read.seq[tail..]);
            node.coords[1] = read.coords[1];
        }
        if read.coords[0] < node.coords[0] {
            let head = (node.coords[0] - read.coords[0]) as usize;
            node.seq.insert_str(0, &read.seq[..head]);
            node.coords[0] = read.coords[0];
        }
        node.reads.push(Mapped {
            id: read.id,
            coords: read.coords,
        });
    }

    /// Mirrors suffix-prefix agreements between nodes as bidirected edges.
    fn connect(&mut self) {
        for a in 0..self.nodes.len() {
            for b in 0..self.nodes.len() {
                if a == b {
                    continue;
                }
                let lo = self.nodes[a].coords[1].min(self.nodes[b].coords[1]);
                let hi = self.nodes[a].coords[0].max(self.nodes[b].coords[0]);
                let ol = lo - hi;
                if self.nodes[a].coords[0] < self.nodes[b].coords[0]
                    && self.nodes[a].coords[1] < self.nodes[b].coords[1]
                    && ol >= MIN_AGREE
                {
                    self.nodes[a].edges[1].push((b as NodeId, ol as u32));
                    self.nodes[b].edges[0].push((a as NodeId, ol as u32));
                }
            }
        }
    }

    /// Live (non-tombstoned) node ids.
    pub fn live(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.dead)
            .map(|(i, _)| i as NodeId)
    }

    /// Tombstones a node and unhooks its mirrored edges.
    pub fn remove(&mut self, id: NodeId) {
        self.nodes[id as usize].dead = true;
        for at in 0..self.nodes.len() {
            for side in 0..2 {
                self.nodes[at].edges[side].retain(|&(other, _)| other != id);
            }
        }
    }

    /// Culls thinly covered nodes whose tips the index cannot confirm.
    ///
    /// A node with few reads and a weak tip is probed with overlap counts
    /// at two thirds of the read length; fewer than three confirming reads
    /// drops it.
    pub fn cull(&mut self, ir: &IndexReader, read_len: usize) {
        let ids: Vec<NodeId> = self.live().collect();
        for id in ids {
            let node = &self.nodes[id as usize];
            if node.reads.len() >= 1 + node.seq.len() * 2 / read_len {
                continue;
            }
            for drxn in 0..2usize {
                let node = &self.nodes[id as usize];
                if !node.is_weak((read_len as f32 * 0.6) as i32, drxn) {
                    continue;
                }
                let mut seq = node.seq.clone();
                if seq.len() > read_len {
                    seq = if drxn == 1 {
                        seq[seq.len() - read_len..].to_string()
                    } else {
                        seq[..read_len].to_string()
                    };
                }
                let min_ol = read_len * 2 / 3;
                if QueryOverlap::count_overlaps(&seq, ir, min_ol, drxn == 1) < 3 {
                    self.remove(id);
                    break;
                }
            }
        }
    }

    /// Pairs of live nodes that look like the two alleles of one locus:
    /// spans covering each other, distinct sequences, comparable support.
    #[must_use]
    pub fn diploid_pairs(&self) -> Vec<(NodeId, NodeId)> {
        let ids: Vec<NodeId> = self.live().collect();
        let mut pairs = Vec::new();
        for (ai, &a) in ids.iter().enumerate() {
            for &b in &ids[ai + 1..] {
                let (na, nb) = (&self.nodes[a as usize], &self.nodes[b as usize]);
                let shared = na.coords[1].min(nb.coords[1]) - na.coords[0].max(nb.coords[0]);
                let span = na.coords.len().max(nb.coords.len());
                if shared * 2 < span || na.seq == nb.seq {
                    continue;
                }
                let (ra, rb) = (na.reads.len(), nb.reads.len());
                if ra.max(rb) <= 3 * ra.min(rb).max(1) {
                    pairs.push((a, b));
                }
            }
        }
        pairs.sort_by_key(|&(a, b)| {
            std::cmp::Reverse(
                self.nodes[a as usize].reads.len() + self.nodes[b as usize].reads.len(),
            )
        });
        pairs
    }
}

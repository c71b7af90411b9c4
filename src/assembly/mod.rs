//! The diploid coverage client.
//!
//! Built strictly on the core query contracts: approximate matching to
//! gather reads over a coding sequence, an arena graph of consensus nodes,
//! and overlap probes to cull weak branches. Nodes live in a contiguous
//! vector and refer to each other by index; deletion tombstones a node
//! until the next compaction.

mod coverage;
mod graph;
mod locus;

pub use coverage::Coverage;
pub use graph::{Graph, Mapped, Node, NodeId};
pub use locus::Locus;

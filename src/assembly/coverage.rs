//! The coverage pipeline: seed coding sequences, confirm diploid loci,
//! accumulate coverage statistics.

use std::io::Write;
use std::time::{Duration, Instant};

use tracing::info;

use crate::assembly::graph::Graph;
use crate::assembly::locus::Locus;
use crate::error::Result;
use crate::index::{IndexReader, QueryBinaries};
use crate::params::Params;
use crate::search::MatchQuery;

/// Soft deadline for confirming the loci of one query.
const SEED_DEADLINE: Duration = Duration::from_secs(5);

/// Minimum confirmed locus length.
const MIN_LOCUS_LEN: i32 = 300;

/// Maximum coverage imbalance between alleles.
const MAX_COVER_RATIO: f32 = 1.5;

/// Minimum allele similarity, in percent.
const MIN_SIMILARITY: f32 = 97.0;

/// Rolling state of one coverage run, with its failure category counters.
pub struct Coverage {
    pub queried: u32,
    pub unmatched: u32,
    pub nondiploid: u32,
    pub overtimed: u32,
    pub miscovered: u32,
    pub dissimilar: u32,
    pub short: u32,
    pub coverage: Vec<f32>,
}

impl Coverage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            queried: 0,
            unmatched: 0,
            nondiploid: 0,
            overtimed: 0,
            miscovered: 0,
            dissimilar: 0,
            short: 0,
            coverage: Vec::new(),
        }
    }

    /// Seeds one coding sequence: match, assemble, confirm, measure.
    pub fn seed(
        &mut self,
        seq: &str,
        ir: &IndexReader,
        qb: &QueryBinaries,
        params: &Params,
    ) {
        self.queried += 1;
        let start = Instant::now();

        let mq = MatchQuery::new(seq, ir, 10);
        let reads = mq.yield_reads(qb, params);
        let cap = (seq.len() + 1 - params.read_len as usize) * 20;
        if mq.failure || reads.len() > cap {
            self.nondiploid += 1;
            return;
        }
        if reads.is_empty() {
            self.unmatched += 1;
            return;
        }

        let Some(mut graph) = Graph::from_reads(&reads) else {
            self.nondiploid += 1;
            return;
        };
        graph.cull(ir, params.read_len as usize);
        if graph.live().count() == 0 {
            self.unmatched += 1;
            return;
        }

        let pairs = graph.diploid_pairs();
        if pairs.is_empty() {
            self.nondiploid += 1;
            return;
        }
        for (a, b) in pairs {
            if start.elapsed() > SEED_DEADLINE {
                self.overtimed += 1;
                return;
            }
            let mut locus = Locus::new(
                graph.nodes[a as usize].seq.clone(),
                graph.nodes[b as usize].seq.clone(),
            );
            if !locus.confirm(ir, qb, params) {
                self.nondiploid += 1;
                return;
            }
            if !locus.set_len(MIN_LOCUS_LEN) {
                self.short += 1;
                continue;
            }
            if !locus.set_coverage(MAX_COVER_RATIO) {
                self.miscovered += 1;
                continue;
            }
            if !locus.set_similarity(MIN_SIMILARITY) {
                self.dissimilar += 1;
                continue;
            }
            self.coverage.push(locus.coverage);
            info!(
                coverage = locus.coverage,
                len = locus.len,
                median = self.median(),
                "locus confirmed"
            );
            return;
        }
    }

    /// Median of the confirmed coverage values so far.
    #[must_use]
    pub fn median(&self) -> f32 {
        if self.coverage.is_empty() {
            return 0.0;
        }
        let mut sorted = self.coverage.clone();
        sorted.sort_by(f32::total_cmp);
        let n = sorted.len();
        (sorted[(n - 1) / 2] + sorted[n / 2]) / 2.0
    }

    /// Writes the per-locus coverage values and the summary block.
    pub fn report<W: Write>(&self, out: &mut W) -> Result<()> {
        for cover in &self.coverage {
            writeln!(out, "{cover:.2}")?;
        }
        info!(median = self.median(), "final median coverage");
        info!(queried = self.queried, "total queried coding sequences");
        info!(unmatched = self.unmatched, "unmatched queries");
        info!(nondiploid = self.nondiploid, "non-diploid loci");
        info!(overtimed = self.overtimed, "overtimed queries");
        info!(
            miscovered = self.miscovered,
            "loci with allelic dissimilarity in coverage"
        );
        info!(
            dissimilar = self.dissimilar,
            "loci with allelic dissimilarity in sequence"
        );
        info!(short = self.short, "short loci");
        Ok(())
    }
}

impl Default for Coverage {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_median() {
        let mut cov = Coverage::new();
        assert_eq!(cov.median(), 0.0);
        cov.coverage = vec![4.0, 2.0, 8.0];
        assert!((cov.median() - 4.0).abs() < f32::EPSILON);
        cov.coverage = vec![4.0, 2.0, 8.0, 6.0];
        assert!((cov.median() - 5.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_unmatched_counted() {
        let dir = tempfile::tempdir().unwrap();
        let reads = ["CGTACGTACGTACGTACGTACGTACGTT"];
        let files = crate::transform::build_test_index(dir.path(), &reads, false);
        let ir = IndexReader::new(&files).unwrap();
        let qb = QueryBinaries::new(&files).unwrap();
        let params = Params::load(&files).unwrap();

        let mut cov = Coverage::new();
        let absent = "A".repeat(400);
        cov.seed(&absent, &ir, &qb, &params);
        assert_eq!(cov.queried, 1);
        assert_eq!(cov.unmatched, 1);
        assert!(cov.coverage.is_empty());
    }
}

//! A candidate diploid locus: two allele sequences and their reads.

use crate::assembly::graph::Mapped;
use crate::index::{IndexReader, QueryBinaries};
use crate::params::Params;
use crate::search::{similarity, Coords, MatchQuery, Read};

pub struct Locus {
    pub alleles: [String; 2],
    pub reads: [Vec<Mapped>; 2],
    pub similarity: f32,
    pub coverage: f32,
    pub len: i32,
}

impl Locus {
    #[must_use]
    pub fn new(a: String, b: String) -> Self {
        let len = a.len().min(b.len()) as i32;
        Self {
            alleles: [a, b],
            reads: [Vec::new(), Vec::new()],
            similarity: 0.0,
            coverage: 0.0,
            len,
        }
    }

    /// Assigns reads landing exactly inside allele `i`; the rest spill
    /// into `unmapped` as evidence against the locus being diploid.
    pub fn fill(&mut self, reads: Vec<Read>, unmapped: &mut Vec<Read>, i: usize) {
        for read in reads {
            if let Some(at) = self.alleles[i].find(&read.seq) {
                let at = at as i32;
                self.reads[i].push(Mapped {
                    id: read.id,
                    coords: Coords::new(at, at + read.seq.len() as i32),
                });
            } else {
                unmapped.push(read);
            }
        }
    }

    /// Re-matches both alleles against the index and checks that the
    /// gathered reads explain them without substantial leftovers.
    ///
    /// A timed-out match query or a pile of reads fitting neither allele
    /// marks the locus non-diploid.
    pub fn confirm(
        &mut self,
        ir: &IndexReader,
        qb: &QueryBinaries,
        params: &Params,
    ) -> bool {
        let mut unmapped = Vec::new();
        for i in 0..2 {
            self.reads[i].clear();
            let allele = self.alleles[i].clone();
            let mq = MatchQuery::new(&allele, ir, 5);
            if mq.failure {
                return false;
            }
            self.fill(mq.yield_reads(qb, params), &mut unmapped, i);
        }
        // Reads matching the sister allele are expected; count the rest.
        let strays = unmapped
            .iter()
            .filter(|r| {
                self.alleles[0].find(&r.seq).is_none() && self.alleles[1].find(&r.seq).is_none()
            })
            .count();
        strays < 4
    }

    /// Rejects loci shorter than `min_len`.
    pub fn set_len(&mut self, min_len: i32) -> bool {
        self.len = self.alleles[0].len().min(self.alleles[1].len()) as i32;
        self.len >= min_len
    }

    /// Computes per-allele coverage and rejects allelic imbalance beyond
    /// `max_ratio`.
    pub fn set_coverage(&mut self, max_ratio: f32) -> bool {
        let mut covers = [0.0f32; 2];
        for i in 0..2 {
            if self.alleles[i].is_empty() {
                return false;
            }
            let bases: i32 = self.reads[i].iter().map(|m| m.coords.len()).sum();
            covers[i] = bases as f32 / self.alleles[i].len() as f32;
        }
        let (lo, hi) = (covers[0].min(covers[1]), covers[0].max(covers[1]));
        if lo <= 0.0 || hi / lo > max_ratio {
            return false;
        }
        self.coverage = covers[0] + covers[1];
        true
    }

    /// Scores allele similarity and rejects below `min_similarity`.
    pub fn set_similarity(&mut self, min_similarity: f32) -> bool {
        self.similarity = similarity(&self.alleles[0], &self.alleles[1]);
        self.similarity >= min_similarity
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_fill_and_len() {
        let mut locus = Locus::new("ACGTACGTACGT".into(), "ACGTACCTACGT".into());
        let mut unmapped = Vec::new();
        locus.fill(
            vec![
                Read::new("GTACGT".into(), 0, 0, 6),
                Read::new("TTTTTT".into(), 1, 0, 6),
            ],
            &mut unmapped,
            0,
        );
        assert_eq!(locus.reads[0].len(), 1);
        assert_eq!(unmapped.len(), 1);
        assert!(locus.set_len(10));
        assert!(!locus.set_len(20));
    }

    #[test]
    fn test_coverage_balance() {
        let mut locus = Locus::new("A".repeat(100), "C".repeat(100));
        for i in 0..2 {
            for at in 0..5 {
                locus.reads[i].push(Mapped {
                    id: at,
                    coords: Coords::new(0, 50),
                });
            }
        }
        assert!(locus.set_coverage(1.5));
        assert!((locus.coverage - 5.0).abs() < 0.01);

        locus.reads[1].truncate(1);
        assert!(!locus.set_coverage(1.5));
    }

    #[test]
    fn test_similarity_gate() {
        let mut locus = Locus::new("ACGTACGTACGTACGTACGT".into(), "ACGTACGTACCTACGTACGT".into());
        assert!(locus.set_similarity(90.0));
        assert!(!locus.set_similarity(99.0));
    }
}

//! Suffix-prefix overlap enumeration.
//!
//! A query is translated into the orientation that makes matching reads
//! start with the overlapped bases: reversed for rightward overlaps
//! (`drxn = 1`, read prefix against query suffix), complemented for
//! leftward ones (`drxn = 0`, read reverse complement against the query
//! front). The range descent records a hit at every depth past the
//! minimum overlap where reads terminate.

use std::collections::HashSet;

use crate::alphabet;
use crate::index::{CharCount, IndexReader, QueryBinaries};
use crate::params::Params;
use crate::search::extension::{Ext, Exts};
use crate::search::QueryHit;
use crate::ReadId;

/// One overlap enumeration over the index.
pub struct QueryOverlap {
    q: Vec<u8>,
    hits: Vec<QueryHit>,
    min_ol: usize,
}

impl QueryOverlap {
    /// Enumerates overlaps of at least `min_ol` bases in direction `drxn`.
    #[must_use]
    pub fn new(seq: &str, ir: &IndexReader, min_ol: usize, drxn: bool) -> Self {
        let codes = alphabet::encode(seq.as_bytes()).expect("validated query");
        let q: Vec<u8> = if drxn {
            codes.iter().rev().copied().collect()
        } else {
            codes.iter().map(|&c| alphabet::comp(c)).collect()
        };
        let mut query = Self {
            q,
            hits: Vec::new(),
            min_ol,
        };
        if query.q.len() >= 2 {
            let (rank, count) = ir.set_base_all(query.q[0], query.q[1]);
            if count > 0 {
                query.descend(ir, rank, count, 1);
            }
        }
        query
    }

    fn descend(&mut self, ir: &IndexReader, rank: u64, count: u64, i: usize) {
        let mut ranks = CharCount::default();
        let mut counts = CharCount::default();
        ir.count_range(self.q[i], rank, count, &mut ranks, &mut counts);
        let i = i + 1;
        for j in 0..4usize {
            if counts[j] > 0 && (i >= self.q.len() || self.q[i] == j as u8) {
                self.descend(ir, ranks[j], counts[j], i);
            }
        }
        if counts.ends > 0 && i >= self.min_ol {
            self.hits
                .push(QueryHit::new(ranks.ends as u32, counts.ends as u32, i as i32));
        }
    }

    /// Number of distinct reads overlapping the query by at least the
    /// minimum; hits referencing the same end-id range count once.
    #[must_use]
    pub fn count_overlaps(seq: &str, ir: &IndexReader, min_ol: usize, drxn: bool) -> u32 {
        let qo = Self::new(seq, ir, min_ol, drxn);
        let mut ranges: Vec<(u32, u32)> = qo
            .hits
            .iter()
            .map(|h| (h.rank, h.rank + h.count))
            .collect();
        ranges.sort_unstable();
        let mut total = 0;
        let mut covered = 0u32;
        for (lo, hi) in ranges {
            let lo = lo.max(covered);
            if hi > lo {
                total += hi - lo;
                covered = hi;
            }
        }
        total
    }

    /// Materializes the overlapping reads into an extension trie, keeping
    /// each read at its deepest overlap.
    #[must_use]
    pub fn get_extensions(
        seq: &str,
        ir: &IndexReader,
        qb: &QueryBinaries,
        params: &Params,
        min_ol: usize,
        drxn: bool,
    ) -> Exts {
        let qo = Self::new(seq, ir, min_ol, drxn);
        let mut exts = Exts::new(seq, seq.len() as i32, drxn);
        let mut hits = qo.hits.clone();
        hits.sort_by_key(|h| std::cmp::Reverse(h.coord));
        let mut used: HashSet<ReadId> = HashSet::new();
        for hit in hits {
            for id in qb.get_ids(u64::from(hit.rank), u64::from(hit.count)) {
                if !used.insert(id) {
                    continue;
                }
                let read = qb.get_sequence(id);
                let ol = hit.coord as usize;
                if read.len() <= ol {
                    continue;
                }
                let oriented = if drxn {
                    read
                } else {
                    alphabet::revcomp_str(&read)
                };
                Exts::add(&mut exts.exts, &oriented, id, ol, drxn);
            }
        }
        let base = exts.seq.clone();
        for ext in &mut exts.exts {
            Ext::set(ext, &base, drxn);
            ext.count(params, true);
        }
        exts
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::transform::build_test_index;

    #[test]
    fn test_single_copy_counts_once() {
        let dir = tempfile::tempdir().unwrap();
        let repeat = "ACGT".repeat(10);
        let files = build_test_index(dir.path(), &[repeat.as_str()], false);
        let ir = IndexReader::new(&files).unwrap();
        // The read overlaps the query at depths 12, 16, ... 40, but it is
        // one read and counts once.
        assert_eq!(QueryOverlap::count_overlaps(&repeat, &ir, 10, true), 1);
    }

    #[test]
    fn test_prefix_suffix_counting() {
        let dir = tempfile::tempdir().unwrap();
        let query = "AACCGGTTACGTACGTACGT";
        let reads = [
            "ACGTACGTACGTTTGGCCAA", // prefix matches the query's last 12
            "CGTACGTACGTAAAAAAAAA", // prefix matches the query's last 11
            "GGCCAATTGGCCAATTGGCC", // no overlap
        ];
        let files = build_test_index(dir.path(), &reads, false);
        let ir = IndexReader::new(&files).unwrap();
        assert_eq!(QueryOverlap::count_overlaps(query, &ir, 10, true), 2);
        assert_eq!(QueryOverlap::count_overlaps(query, &ir, 12, true), 1);
        assert_eq!(QueryOverlap::count_overlaps(query, &ir, 13, true), 0);
    }

    #[test]
    fn test_leftward_overlap() {
        let dir = tempfile::tempdir().unwrap();
        // revcomp("TTTTGGGGCCCC") = "GGGGCCCCAAAA"; its prefix of 8 matches
        // the query's first 8 bases reverse complemented.
        let reads = ["GGGGCCCCAAAA"];
        let files = build_test_index(dir.path(), &reads, false);
        let ir = IndexReader::new(&files).unwrap();
        let query = "TTTTGGGGCCCCTTTT";
        assert_eq!(QueryOverlap::count_overlaps(query, &ir, 8, false), 1);
    }

    #[test]
    fn test_extension_trie() {
        let dir = tempfile::tempdir().unwrap();
        let query = "AACCGGTTACGTACGTACGT";
        let reads = ["ACGTACGTACGTTTGGCCAA", "ACGTACGTACGTTTGGAATT"];
        let files = build_test_index(dir.path(), &reads, false);
        let ir = IndexReader::new(&files).unwrap();
        let qb = QueryBinaries::new(&files).unwrap();
        let params = Params::load(&files).unwrap();
        let exts = QueryOverlap::get_extensions(query, &ir, &qb, &params, 10, true);
        let mut ids: Vec<ReadId> = exts.exts.iter().flat_map(Ext::all_ids).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1]);
    }
}

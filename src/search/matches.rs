//! Approximate substring matching: blocked seed and extend.
//!
//! The query is split into blocks sized to the error budget; each block
//! boundary seeds a zero-error two-character interval which is extended
//! one base at a time, earning one mismatch of budget per block boundary
//! crossed. Both the forward and reverse-complement orientations are
//! searched, each covering half the blocks.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::alphabet;
use crate::index::{CharCount, IndexReader, QueryBinaries};
use crate::params::Params;
use crate::search::{align, Coords, QueryHit, Read};

/// Soft per-query deadline; exceeding it abandons the search.
const DEADLINE: Duration = Duration::from_secs(3);

/// A hit whose read did not align end-to-end against the query.
#[derive(Debug, Clone)]
pub struct MatchRead {
    pub seq: String,
    pub id: crate::ReadId,
    pub query: Coords,
    pub read: Coords,
}

/// One approximate-match search over the index.
pub struct MatchQuery {
    /// Query translated per direction: complemented for the left-covering
    /// search, reversed for the right-covering one.
    q: [Vec<u8>; 2],
    /// Block boundaries per direction, ascending.
    blocks: [Vec<usize>; 2],
    hits: [Vec<QueryHit>; 2],
    len: usize,
    /// Set when the soft deadline expired; hits are discarded.
    pub failure: bool,
}

impl MatchQuery {
    /// Runs the search for `seq` with `errors` mismatches per 100 bases.
    #[must_use]
    pub fn new(seq: &str, ir: &IndexReader, errors: usize) -> Self {
        let codes = alphabet::encode(seq.as_bytes()).expect("validated query");
        let len = codes.len();
        let q = [
            codes.iter().map(|&c| alphabet::comp(c)).collect(),
            codes.iter().rev().copied().collect(),
        ];
        let mut query = Self {
            q,
            blocks: [Vec::new(), Vec::new()],
            hits: [Vec::new(), Vec::new()],
            len,
            failure: false,
        };
        query.run(ir, errors);
        query
    }

    fn run(&mut self, ir: &IndexReader, errors: usize) {
        if self.len < 2 {
            return;
        }
        let block_size = self.len.min(100).min((100 / (errors + 1)).max(6));
        let block_count = self.len / block_size;
        let mut extra = self.len - block_size * block_count;
        let extra_begin = ((block_count + 1) / 2).saturating_sub((extra + 1) / 2);
        let d_blocks = [(1 + block_count) / 2, (block_count / 2).max(1)];

        self.blocks[0].push(0);
        for i in 0..block_count {
            let mut next = self.blocks[0].last().unwrap() + block_size;
            if i > extra_begin && extra > 0 {
                next += 1;
                extra -= 1;
            }
            self.blocks[0].push(next);
        }
        self.blocks[1] = self.blocks[0]
            .iter()
            .rev()
            .map(|&b| self.len - b)
            .collect();

        let start = Instant::now();
        for d in 0..2 {
            let mut i = 0;
            while i < d_blocks[d] && !self.failure {
                let at = self.blocks[d][i];
                let (rank, count) = ir.set_base_all(self.q[d][at], self.q[d][at + 1]);
                let seed = i == 0 && errors.min(block_count) > 2;
                self.query(
                    ir,
                    rank,
                    count,
                    self.q[d][at + 1],
                    at + 1,
                    i,
                    1,
                    usize::from(seed),
                    d,
                );
                if seed {
                    // Rescue mismatches in the first two bases of the
                    // first block by trying every substitution.
                    for j in 0..2 {
                        for k in 0..4u8 {
                            if k == self.q[d][j] {
                                continue;
                            }
                            let (c0, c1) = if j == 1 {
                                (self.q[d][0], k)
                            } else {
                                (k, self.q[d][1])
                            };
                            let (rank, count) = ir.set_base_all(c0, c1);
                            self.query(ir, rank, count, c1, self.blocks[d][1], 1, 1, 0, d);
                        }
                    }
                }
                if seed {
                    // The substitution pass already covered the next block.
                    i += 1;
                }
                i += 1;
                if start.elapsed() > DEADLINE {
                    self.failure = true;
                }
            }
        }
        if self.failure {
            self.hits = [Vec::new(), Vec::new()];
        }
    }

    /// Extends one interval a base leftward, branching on every surviving
    /// symbol and spending the error budget on mismatches.
    #[allow(clippy::too_many_arguments)]
    fn query(
        &mut self,
        ir: &IndexReader,
        rank: u64,
        count: u64,
        c: u8,
        i: usize,
        j: usize,
        len: usize,
        err_left: usize,
        d: usize,
    ) {
        let mut ranks = CharCount::default();
        let mut counts = CharCount::default();
        ir.count_range(c, rank, count, &mut ranks, &mut counts);
        let i = i + 1;
        let len = len + 1;

        if len >= self.len.min(50) && counts.ends > 0 {
            let coord = if d == 1 {
                self.len as i32 - i as i32
            } else {
                i as i32
            };
            QueryHit::insert_merged(&mut self.hits[d], ranks.ends as u32, counts.ends as u32, coord);
        }

        let (mut j, mut err_left) = (j, err_left);
        if j + 1 < self.blocks[d].len() && i >= self.blocks[d][j + 1] {
            j += 1;
            err_left += 1;
        }

        for k in 0..4usize {
            if counts[k] == 0 {
                continue;
            }
            if i >= self.len || k as u8 == self.q[d][i] {
                self.query(ir, ranks[k], counts[k], k as u8, i, j, len, err_left, d);
            } else if err_left > 0 {
                self.query(ir, ranks[k], counts[k], k as u8, i, j, len, err_left - 1, d);
            }
        }
    }

    /// Materializes the hit set into deduplicated reads with query-frame
    /// coordinates.
    #[must_use]
    pub fn yield_reads(&self, qb: &QueryBinaries, params: &Params) -> Vec<Read> {
        let mut reads = Vec::new();
        let mut used: HashSet<crate::ReadId> = HashSet::new();
        for d in 0..2 {
            for hit in &self.hits[d] {
                for raw in qb.get_ids(u64::from(hit.rank), u64::from(hit.count)) {
                    let id = if d == 0 { params.rev_id(raw) } else { raw };
                    if !used.insert(id) {
                        continue;
                    }
                    let seq = qb.get_sequence(id);
                    let size = seq.len() as i32;
                    let mut read = Read::new(seq, id, hit.coord, hit.coord);
                    read.coords[d] += if d == 1 { size } else { -size };
                    reads.push(read);
                }
            }
        }
        reads
    }
}

/// A query's matches classified against its own sequence.
pub struct MatchedQuery {
    pub header: String,
    pub seq: String,
    pub exact: Vec<Read>,
    pub inexact: Vec<MatchRead>,
    pub unmatched: Vec<Read>,
}

impl MatchedQuery {
    /// Matches `seq` and splits the results by how each read aligns back.
    #[must_use]
    pub fn new(
        header: &str,
        seq: &str,
        ir: &IndexReader,
        qb: &QueryBinaries,
        params: &Params,
        errors: usize,
    ) -> Self {
        let mut out = Self {
            header: header.to_string(),
            seq: seq.to_string(),
            exact: Vec::new(),
            inexact: Vec::new(),
            unmatched: Vec::new(),
        };
        for r in MatchQuery::new(seq, ir, errors).yield_reads(qb, params) {
            if let Some(at) = seq.find(&r.seq) {
                let at = at as i32;
                out.exact.push(Read::new(r.seq, r.id, at, at + r.coords.len()));
            } else if let Some(at) = r.seq.find(seq) {
                let at = at as i32;
                out.exact
                    .push(Read::new(r.seq, r.id, -at, r.coords.len() - at));
            } else {
                let mut best: Option<(Coords, Coords)> = None;
                for span in align::align(seq, &r.seq, 10) {
                    if best.is_none_or(|b| span.0.len() > b.0.len()) {
                        best = Some(span);
                    }
                }
                match best {
                    Some((q, b)) if q[0] == 0 && b[1] == r.seq.len() as i32 => {
                        out.exact
                            .push(Read::new(r.seq, r.id, q[1] - r.coords.len(), q[1]));
                    }
                    Some((q, b)) if b[0] == 0 && q[1] == seq.len() as i32 => {
                        out.exact
                            .push(Read::new(r.seq, r.id, q[0], q[0] + r.coords.len()));
                    }
                    Some((q, b)) => {
                        out.inexact.push(MatchRead {
                            seq: r.seq,
                            id: r.id,
                            query: q,
                            read: b,
                        });
                    }
                    None => out.unmatched.push(r),
                }
            }
        }
        Read::sort(&mut out.exact, true, 0);
        out.inexact.sort_by_key(|m| m.query[0] - m.read[0]);
        Read::sort(&mut out.unmatched, true, 0);
        out
    }

    /// Prunes weaker placements across a batch of queries: a read matched
    /// exactly anywhere loses its inexact placements, and inexact
    /// placements shorter than the read's best are dropped.
    pub fn compete(queries: &mut [MatchedQuery]) {
        let mut exact: HashSet<crate::ReadId> = HashSet::new();
        for q in queries.iter() {
            exact.extend(q.exact.iter().map(|r| r.id));
        }
        let mut best: std::collections::HashMap<crate::ReadId, i32> =
            std::collections::HashMap::new();
        for q in queries.iter_mut() {
            q.inexact.retain(|m| !exact.contains(&m.id));
            for m in &q.inexact {
                let len = m.read.len();
                best.entry(m.id)
                    .and_modify(|b| *b = (*b).max(len))
                    .or_insert(len);
            }
        }
        for q in queries.iter_mut() {
            q.inexact
                .retain(|m| best.get(&m.id).is_none_or(|&b| b <= m.read.len()));
            q.unmatched
                .retain(|r| !exact.contains(&r.id) && !best.contains_key(&r.id));
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use crate::layout::IndexFiles;
    use crate::transform::build_test_index;

    fn open_all(files: &IndexFiles) -> (IndexReader, QueryBinaries, Params) {
        (
            IndexReader::new(files).unwrap(),
            QueryBinaries::new(files).unwrap(),
            Params::load(files).unwrap(),
        )
    }

    #[test]
    fn test_exact_recall_single_read() {
        let dir = tempfile::tempdir().unwrap();
        let files = build_test_index(dir.path(), &["ACGT", "ACGG"], false);
        let (ir, qb, params) = open_all(&files);
        let mq = MatchQuery::new("ACGT", &ir, 0);
        assert!(!mq.failure);
        let reads = mq.yield_reads(&qb, &params);
        assert!(reads.iter().all(|r| r.id == 0));
        assert!(reads.iter().any(|r| r.seq == "ACGT"));
    }

    #[test]
    fn test_absent_query_is_clean_miss() {
        let dir = tempfile::tempdir().unwrap();
        let reads: Vec<String> = (0..8)
            .map(|i| format!("{}{}", "CGTACGTACGTACGTACGTACGTACG", ["TT", "GG", "CC", "TG"][i % 4]))
            .collect();
        let refs: Vec<&str> = reads.iter().map(String::as_str).collect();
        let files = build_test_index(dir.path(), &refs, false);
        let (ir, qb, params) = open_all(&files);
        let query = "A".repeat(50);
        let mq = MatchQuery::new(&query, &ir, 0);
        assert!(!mq.failure);
        assert!(mq.yield_reads(&qb, &params).is_empty());
    }

    #[test]
    fn test_recall_all_reads_zero_errors() {
        use nucgen::Sequence;
        use rand::{rngs::SmallRng, SeedableRng};
        let mut rng = SmallRng::seed_from_u64(5);
        let mut sequence = Sequence::new();
        let reads: Vec<String> = (0..30)
            .map(|_| {
                sequence.fill_buffer(&mut rng, 60);
                String::from_utf8(sequence.bytes().to_vec()).unwrap()
            })
            .collect();
        let refs: Vec<&str> = reads.iter().map(String::as_str).collect();
        let dir = tempfile::tempdir().unwrap();
        let files = build_test_index(dir.path(), &refs, true);
        let (ir, qb, params) = open_all(&files);
        for (rec, read) in refs.iter().enumerate() {
            let found = MatchQuery::new(read, &ir, 0).yield_reads(&qb, &params);
            let fwd = (rec * 2) as crate::ReadId;
            assert!(
                found.iter().any(|r| r.id == fwd || r.id == fwd + 1),
                "read {rec} not recalled"
            );
        }
    }

    #[test]
    fn test_one_substitution_found_with_budget() {
        use nucgen::Sequence;
        use rand::{rngs::SmallRng, SeedableRng};
        let mut rng = SmallRng::seed_from_u64(9);
        let mut sequence = Sequence::new();
        sequence.fill_buffer(&mut rng, 200);
        let query = String::from_utf8(sequence.bytes().to_vec()).unwrap();
        // The stored read differs from the query at position 25.
        let mut stored = query.clone().into_bytes();
        stored[25] = match stored[25] {
            b'A' => b'C',
            b'C' => b'G',
            b'G' => b'T',
            _ => b'A',
        };
        let stored = String::from_utf8(stored).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let files = build_test_index(dir.path(), &[stored.as_str()], false);
        let (ir, qb, params) = open_all(&files);

        let exact = MatchQuery::new(&query, &ir, 0).yield_reads(&qb, &params);
        assert!(!exact.iter().any(|r| r.seq == stored));
        let with_budget = MatchQuery::new(&query, &ir, 1).yield_reads(&qb, &params);
        assert!(with_budget.iter().any(|r| r.seq == stored));
        // Error budgets are monotone: everything found at 0 errors stays.
        for r in &exact {
            assert!(with_budget.iter().any(|w| w.id == r.id));
        }
    }

    #[test]
    fn test_matched_query_classification() {
        let dir = tempfile::tempdir().unwrap();
        let files = build_test_index(
            dir.path(),
            &["ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT"],
            false,
        );
        let (ir, qb, params) = open_all(&files);
        let query = "ACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGTACGT";
        let mq = MatchedQuery::new("q", query, &ir, &qb, &params, 0);
        assert_eq!(mq.exact.len(), 1);
        assert!(mq.inexact.is_empty());
        assert_eq!(mq.exact[0].coords[0], 0);
    }
}

//! The extension trie built from overlap hits.
//!
//! Each [`Ext`] node carries the bases it extends beyond the query, the
//! reads supporting that extension sorted by how far they reach, and its
//! child branches. Reads adding no new sequence beyond an existing
//! supporter are kept aside as redundant.

use crate::params::Params;
use crate::ReadId;

/// One read's placement within an extension branch.
#[derive(Debug, Clone, Copy)]
pub struct ExtRead {
    pub id: ReadId,
    /// Bases this read extends beyond the branch point.
    pub ext: i32,
    /// Bases this read overlaps the sequence behind the branch point.
    pub ol: i32,
}

/// One branch of the extension trie.
#[derive(Debug, Default)]
pub struct Ext {
    /// Extension bases beyond the parent sequence.
    pub ext: String,
    /// Full branch sequence; filled in by [`Ext::set`].
    pub seq: String,
    pub reads: Vec<ExtRead>,
    pub redundant: Vec<ExtRead>,
    pub exts: Vec<Ext>,
    pub count: i32,
}

impl Ext {
    /// A fresh branch seeded by one read overlapping by `ol`.
    #[must_use]
    pub fn new(seq: &str, id: ReadId, ol: usize, drxn: bool) -> Self {
        let ext = if drxn {
            seq[ol..].to_string()
        } else {
            seq[..seq.len() - ol].to_string()
        };
        Self {
            ext,
            seq: String::new(),
            reads: vec![ExtRead {
                id,
                ext: (seq.len() - ol) as i32,
                ol: ol as i32,
            }],
            redundant: Vec::new(),
            exts: Vec::new(),
            count: 0,
        }
    }

    /// Forks `base` at read index `skim`, returning the branch that keeps
    /// the longer-reaching reads.
    fn split(base: &mut Ext, skim: usize, drxn: bool) -> Self {
        assert!(skim > 0 && skim < base.reads.len());
        let keep = base.reads[skim - 1].ext;
        let mut out = Self {
            ext: base.ext.clone(),
            seq: String::new(),
            reads: base.reads.split_off(skim),
            redundant: Vec::new(),
            exts: std::mem::take(&mut base.exts),
            count: 0,
        };
        base.ext = if drxn {
            base.ext[..keep as usize].to_string()
        } else {
            base.ext[base.ext.len() - keep as usize..].to_string()
        };
        let mut at = 0;
        while at < base.redundant.len() {
            if out.reads[0].ol <= base.redundant[at].ol {
                out.redundant.push(base.redundant[at]);
            }
            if keep < base.redundant[at].ext {
                base.redundant.remove(at);
            } else {
                at += 1;
            }
        }
        out.shift(keep, drxn);
        out
    }

    /// Registers a read on this branch, as a supporter or as redundant.
    fn add_read(&mut self, id: ReadId, ext: i32, ol: i32, ins: usize) -> bool {
        let last = self.reads.last().expect("branch holds its seed read");
        if ext <= last.ext && last.ext + last.ol > ext + ol {
            self.redundant.push(ExtRead { id, ext, ol });
        } else {
            self.reads.insert(ins, ExtRead { id, ext, ol });
        }
        true
    }

    /// Folds a sole child branch into this one.
    pub fn absorb(&mut self, drxn: bool) -> bool {
        if self.exts.len() != 1 {
            return false;
        }
        let child = self.exts.remove(0);
        let grown = self.ext.len() as i32;
        for er in &child.reads {
            self.reads.push(ExtRead {
                id: er.id,
                ext: er.ext + grown,
                ol: er.ol - grown,
            });
        }
        for er in &child.redundant {
            self.redundant.push(ExtRead {
                id: er.id,
                ext: er.ext + grown,
                ol: er.ol - grown,
            });
        }
        self.ext = if drxn {
            format!("{}{}", self.ext, child.ext)
        } else {
            format!("{}{}", child.ext, self.ext)
        };
        self.exts = child.exts;
        true
    }

    /// Supporting read count of the deepest path through this branch.
    pub fn count(&mut self, params: &Params, incl_mp: bool) -> i32 {
        self.count = 0;
        for at in 0..self.exts.len() {
            let child = self.exts[at].count(params, incl_mp);
            self.count = self.count.max(child);
        }
        for er in &self.reads {
            let counted = match params.lib_of(er.id) {
                Some(lib) => incl_mp || lib.is_pe,
                None => incl_mp,
            };
            if counted {
                self.count += 1;
            }
        }
        self.count
    }

    /// Drops weakly supported children, recursively.
    pub fn cull(&mut self) {
        let max = self.exts.iter().map(|e| e.count).max().unwrap_or(0);
        let cutoff = 4.min(max / 100 + i32::from(max > 9));
        self.exts.retain(|e| e.count > cutoff);
        for e in &mut self.exts {
            e.cull();
        }
    }

    /// Removes branches whose best overlap falls below `min_ol`.
    pub fn sanitise(exts: &mut Vec<Ext>, min_ol: i32) {
        exts.retain(|e| e.reads[0].ol >= min_ol);
        for e in exts {
            Self::sanitise(&mut e.exts, min_ol);
        }
    }

    /// Resolves the full branch sequences from the base sequence down.
    pub fn set(ext: &mut Ext, seq: &str, drxn: bool) {
        while ext.absorb(drxn) {}
        let ol = ext.reads[0].ol as usize;
        ext.seq = if drxn {
            format!("{}{}", &seq[seq.len() - ol..], ext.ext)
        } else {
            format!("{}{}", ext.ext, &seq[..ol])
        };
        let base = ext.seq.clone();
        for child in &mut ext.exts {
            Self::set(child, &base, drxn);
        }
    }

    /// Drops the first `by` extension bases after a fork.
    fn shift(&mut self, by: i32, drxn: bool) {
        assert!((by as usize) < self.ext.len());
        self.ext = if drxn {
            self.ext[by as usize..].to_string()
        } else {
            self.ext[..self.ext.len() - by as usize].to_string()
        };
        for er in self.reads.iter_mut().chain(self.redundant.iter_mut()) {
            er.ext -= by;
            er.ol += by;
        }
    }

    /// Every read id reachable through this branch.
    #[must_use]
    pub fn all_ids(&self) -> Vec<ReadId> {
        let mut ids: Vec<ReadId> = self
            .reads
            .iter()
            .chain(self.redundant.iter())
            .map(|er| er.id)
            .collect();
        for child in &self.exts {
            ids.extend(child.all_ids());
        }
        ids
    }
}

/// The root of an extension trie grown off one flank of a query.
#[derive(Debug)]
pub struct Exts {
    /// The base sequence the extensions grow from.
    pub seq: String,
    pub coord: i32,
    pub exts: Vec<Ext>,
}

impl Exts {
    /// Roots a trie at `coord` within `base`, growing in `drxn`.
    #[must_use]
    pub fn new(base: &str, coord: i32, drxn: bool) -> Self {
        let seq = if drxn {
            base[..coord as usize].to_string()
        } else {
            base[base.len() - coord as usize..].to_string()
        };
        Self {
            seq,
            coord: if drxn {
                coord
            } else {
                base.len() as i32 - coord
            },
            exts: Vec::new(),
        }
    }

    /// Threads one overlapping read into the trie: joining a matching
    /// branch, extending an exhausted one, or forking where it disagrees.
    pub fn add(exts: &mut Vec<Ext>, seq: &str, id: ReadId, ol: usize, drxn: bool) -> bool {
        let ext_len = seq.len() - ol;
        let sb = seq.as_bytes();
        let mut added = false;
        for at in 0..exts.len() {
            let limit = exts[at].ext.len().min(ext_len);
            let eb = exts[at].ext.as_bytes();
            let mut i = 0;
            while i < limit {
                let same = if drxn {
                    sb[i + ol] == eb[i]
                } else {
                    sb[sb.len() - 1 - i - ol] == eb[eb.len() - 1 - i]
                };
                if !same {
                    break;
                }
                i += 1;
            }

            // The read matches this branch to its own end.
            if i + ol == seq.len() {
                added = true;
                let ins = exts[at].reads.len();
                exts[at].add_read(id, ext_len as i32, ol as i32, ins);
                continue;
            }

            // The read matches and outruns the branch sequence.
            if i == exts[at].ext.len() {
                if !exts[at].exts.is_empty() {
                    return Self::add(&mut exts[at].exts, seq, id, i + ol, drxn);
                }
                exts[at].ext = if drxn {
                    seq[ol..].to_string()
                } else {
                    seq[..seq.len() - ol].to_string()
                };
                let ins = exts[at].reads.len();
                return exts[at].add_read(id, ext_len as i32, ol as i32, ins);
            }

            // Disagreement after at least one supporting read: fork.
            let skim = exts[at]
                .reads
                .iter()
                .take_while(|r| r.ext <= i as i32)
                .count();
            if skim > 0 && i + ol < seq.len() {
                let alt = Ext::split(&mut exts[at], skim, drxn);
                let mut fresh = Ext::new(seq, id, ol, drxn);
                fresh.shift(exts[at].ext.len() as i32, drxn);
                assert!(!alt.ext.is_empty() && !fresh.ext.is_empty());
                exts[at].exts = vec![alt, fresh];
                return true;
            }
        }
        if !added {
            exts.push(Ext::new(seq, id, ol, drxn));
        }
        true
    }

    /// Counts and prunes the whole trie; true when nothing survives.
    pub fn cull(&mut self, params: &Params, min_ol: i32, min_reads: i32) -> bool {
        Ext::sanitise(&mut self.exts, min_ol);
        for e in &mut self.exts {
            e.count(params, true);
        }
        self.exts.retain(|e| e.count >= min_reads);
        for e in &mut self.exts {
            e.cull();
        }
        self.exts.is_empty()
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_join_extend_fork() {
        // A short read seeds the branch, a longer agreeing read extends
        // it, and a read diverging past the short read's reach forks it.
        let mut exts = Vec::new();
        Exts::add(&mut exts, "ACGTTTGG", 0, 4, true);
        assert_eq!(exts[0].ext, "TTGG");
        Exts::add(&mut exts, "ACGTTTGGCC", 1, 4, true);
        assert_eq!(exts.len(), 1);
        assert_eq!(exts[0].ext, "TTGGCC");

        Exts::add(&mut exts, "ACGTTTGGAA", 2, 4, true);
        assert_eq!(exts.len(), 1);
        assert_eq!(exts[0].ext, "TTGG");
        assert_eq!(exts[0].exts.len(), 2);
        let forks: Vec<&str> = exts[0].exts.iter().map(|e| e.ext.as_str()).collect();
        assert!(forks.contains(&"CC") && forks.contains(&"AA"));

        let mut ids = exts[0].all_ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_disjoint_reads_branch_at_root() {
        let mut exts = Vec::new();
        Exts::add(&mut exts, "ACGTAACC", 0, 4, true);
        Exts::add(&mut exts, "ACGTGGTT", 1, 4, true);
        assert_eq!(exts.len(), 2);
    }

    #[test]
    fn test_set_builds_sequences() {
        // The read's first three bases overlap the base's last three.
        let mut exts = Vec::new();
        Exts::add(&mut exts, "CGTAACC", 0, 3, true);
        let mut root = exts.remove(0);
        Ext::set(&mut root, "TTTACCGT", true);
        assert_eq!(root.seq, "CGTAACC");
    }
}

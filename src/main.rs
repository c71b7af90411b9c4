//! Command line interface: `index`, `match`, `coverage` and `test`.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rand::Rng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use readix::alphabet;
use readix::assembly::Coverage;
use readix::input;
use readix::{
    CharCount, IndexFiles, IndexReader, MatchQuery, Params, QueryBinaries, Read, ReadId, Transform,
};

#[derive(Parser)]
#[command(name = "readix", version, about = "BWT indexing and querying of DNA short reads")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transform and index sequence read data in preparation for querying.
    Index {
        /// Output prefix for the index files.
        #[arg(short = 'p')]
        prefix: PathBuf,
        /// Manifest of input read libraries.
        #[arg(short = 'i')]
        input: Option<PathBuf>,
        /// Re-enter an interrupted transformation at its next cycle.
        #[arg(long)]
        resume: bool,
        /// Index only the forward strand of each read.
        #[arg(long = "no-rev-comp")]
        no_rev_comp: bool,
        /// Minimum mean quality for FASTQ reads.
        #[arg(short = 's', default_value_t = 0)]
        min_score: u32,
    },
    /// Match query sequences against an index.
    Match {
        #[arg(short = 'p')]
        prefix: PathBuf,
        /// FASTA file of query sequences.
        #[arg(short = 'i')]
        input: Option<PathBuf>,
        /// A single query sequence.
        #[arg(short = 's')]
        seq: Option<String>,
        /// Output file; stdout by default.
        #[arg(short = 'o')]
        output: Option<PathBuf>,
        /// Allowed mismatches per 100 bases, 0 to 15.
        #[arg(short = 'e', default_value_t = 0)]
        errors: usize,
    },
    /// Estimate diploid coverage over coding sequences.
    Coverage {
        #[arg(short = 'p')]
        prefix: PathBuf,
        #[arg(short = 'i')]
        input: PathBuf,
        #[arg(short = 'o')]
        output: Option<PathBuf>,
    },
    /// Round-trip randomly sampled reads through the index.
    Test {
        #[arg(short = 'p')]
        prefix: PathBuf,
        /// Number of reads to query.
        #[arg(short = 'c', default_value_t = 10_000)]
        count: u32,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    match Cli::parse().command {
        Command::Index {
            prefix,
            input,
            resume,
            no_rev_comp,
            min_score,
        } => cmd_index(&prefix, input.as_deref(), resume, !no_rev_comp, min_score),
        Command::Match {
            prefix,
            input,
            seq,
            output,
            errors,
        } => cmd_match(&prefix, input.as_deref(), seq.as_deref(), output.as_deref(), errors),
        Command::Coverage {
            prefix,
            input,
            output,
        } => cmd_coverage(&prefix, &input, output.as_deref()),
        Command::Test { prefix, count } => cmd_test(&prefix, count),
    }
}

fn cmd_index(
    prefix: &std::path::Path,
    input: Option<&std::path::Path>,
    resume: bool,
    revcomp: bool,
    min_score: u32,
) -> anyhow::Result<()> {
    if resume && input.is_some() {
        bail!("resume (--resume) and input (-i) are mutually exclusive arguments");
    }
    let files = IndexFiles::new(prefix);
    if let Some(manifest) = input {
        let libs = input::parse_manifest(manifest).context("reading the input manifest")?;
        Transform::load(&files, &libs, min_score, revcomp).context("packing input reads")?;
    } else if !resume {
        bail!("specify either an input (-i) or the resume flag (--resume)");
    }
    Transform::run(&files).context("transforming packed reads")?;
    Ok(())
}

fn cmd_match(
    prefix: &std::path::Path,
    input: Option<&std::path::Path>,
    seq: Option<&str>,
    output: Option<&std::path::Path>,
    errors: usize,
) -> anyhow::Result<()> {
    if errors > 15 {
        bail!("invalid mismatch rate {errors}%, must be between 0-15%");
    }
    let files = IndexFiles::new(prefix);
    let ir = IndexReader::new(&files)?;
    let qb = QueryBinaries::new(&files)?;
    let params = Params::load(&files)?;

    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(std::fs::File::create(path)?),
        None => Box::new(std::io::stdout()),
    };

    match (input, seq) {
        (Some(path), None) => {
            let mut queries = input::ReadFile::open(path, 0)?;
            let mut n = 0u32;
            while let Some(query) = queries.next_read()? {
                n += 1;
                let header = format!("query_{n}");
                match_one(&query, &header, &ir, &qb, &params, errors, &mut out)?;
            }
        }
        (None, Some(query)) => {
            let query = query.to_ascii_uppercase();
            if let Err(base) = alphabet::encode(query.as_bytes()) {
                bail!("invalid base {:?} in query sequence", base as char);
            }
            match_one(&query, "query", &ir, &qb, &params, errors, &mut out)?;
        }
        _ => bail!("specify exactly one of a query file (-i) or sequence (-s)"),
    }
    Ok(())
}

/// Prints a query and its matched reads aligned beneath it.
fn match_one(
    seq: &str,
    header: &str,
    ir: &IndexReader,
    qb: &QueryBinaries,
    params: &Params,
    errors: usize,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let mut reads = MatchQuery::new(seq, ir, errors).yield_reads(qb, params);
    Read::sort(&mut reads, true, 0);
    let base = reads.first().map_or(0, |r| (-r.coords[0]).max(0));

    let mut itoa = itoa::Buffer::new();
    writeln!(out, ">{header}|matched:{}", reads.len())?;
    writeln!(out, "{}{seq}", "-".repeat(base as usize))?;
    for read in &reads {
        out.write_all(b">read_")?;
        out.write_all(itoa.format(read.id).as_bytes())?;
        out.write_all(b"\n")?;
        writeln!(out, "{}{}", "-".repeat((read.coords[0] + base) as usize), read.seq)?;
    }
    Ok(())
}

fn cmd_coverage(
    prefix: &std::path::Path,
    input: &std::path::Path,
    output: Option<&std::path::Path>,
) -> anyhow::Result<()> {
    let files = IndexFiles::new(prefix);
    let ir = IndexReader::new(&files)?;
    let qb = QueryBinaries::new(&files)?;
    let params = Params::load(&files)?;

    let mut queries = input::ReadFile::open(input, 0)?;
    let mut coverage = Coverage::new();
    while let Some(query) = queries.next_read()? {
        if coverage.coverage.len() >= 1000 {
            break;
        }
        if query.len() >= 300 {
            coverage.seed(&query, &ir, &qb, &params);
        }
    }

    let out_path = output.unwrap_or_else(|| std::path::Path::new("./match_result.fa"));
    let mut out = std::fs::File::create(out_path)?;
    coverage.report(&mut out)?;
    Ok(())
}

fn cmd_test(prefix: &std::path::Path, count: u32) -> anyhow::Result<()> {
    let files = IndexFiles::new(prefix);
    let ir = IndexReader::new(&files)?;
    let qb = QueryBinaries::new(&files)?;
    let params = Params::load(&files)?;

    let mut rng = rand::rng();
    let start = std::time::Instant::now();
    let (mut success, mut failed) = (0u32, 0u32);
    for _ in 0..count {
        let id: ReadId = rng.random_range(0..params.seq_count);
        let seq = qb.get_sequence(id);
        let rc: bool = rng.random();
        let codes = alphabet::encode(seq.as_bytes()).expect("stored read");
        let q: Vec<u8> = if rc {
            codes.iter().map(|&c| alphabet::comp(c)).collect()
        } else {
            codes.iter().rev().copied().collect()
        };
        if walk(&ir, &q) {
            success += 1;
        } else {
            failed += 1;
        }
    }

    info!(count, "tested reads as queries");
    if failed > 0 {
        info!(success, failed, "some reads were not found");
    } else {
        info!(success, "all reads were successfully found in the BWT");
    }
    info!(elapsed_ms = start.elapsed().as_millis() as u64, "total time taken");
    Ok(())
}

/// Follows one translated read through the index; true when the full walk
/// lands on its end marker.
fn walk(ir: &IndexReader, q: &[u8]) -> bool {
    let (mut rank, mut count) = ir.set_base_all(q[0], q[1]);
    let mut i = 1;
    loop {
        let mut ranks = CharCount::default();
        let mut counts = CharCount::default();
        ir.count_range(q[i], rank, count, &mut ranks, &mut counts);
        i += 1;
        if i == q.len() {
            return counts.ends > 0;
        }
        if counts[q[i] as usize] == 0 {
            return false;
        }
        rank = ranks[q[i] as usize];
        count = counts[q[i] as usize];
    }
}

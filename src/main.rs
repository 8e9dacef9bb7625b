use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use galign::align::{AlignConfig, Aligner, CancelToken, IndexInput, RunStatus};
use galign::error::AlignerError;
use galign::index;
use galign::index::store::IndexStore;
use galign::io::fasta::{self, FastaSource};
use galign::io::fastq::FastqSource;
use galign::io::reads::ReadSource;
use galign::io::sam::SamWriter;
use galign::search::MismatchBudget;

// 多线程分配密集的场景下，jemalloc 明显优于系统分配器
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser, Debug)]
#[command(name = "galign", author, version, about = "Partitioned suffix-array short-read aligner", arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a partitioned suffix-array index from a reference FASTA
    Index {
        /// Reference FASTA file (first record is used)
        reference: PathBuf,
        /// Output prefix for index artifacts (.meta/.ref/.sarr)
        #[arg(short, long, default_value = "ref")]
        output: PathBuf,
        /// Fragment size in bases
        #[arg(long = "fragment-size", default_value_t = 16 * 1024 * 1024)]
        fragment_size: u32,
        /// Extension tail limit in bases (max read length spanning a boundary)
        #[arg(long, default_value_t = 1024)]
        overlap: u32,
    },
    /// Align reads against a reference or a prebuilt index
    Align {
        /// Prefix of a prebuilt index (takes precedence over --reference)
        #[arg(short = 'i', long = "index")]
        index: Option<PathBuf>,
        /// Reference FASTA to index on the fly, or to rebuild a stale index from
        #[arg(short = 'r', long = "reference")]
        reference: Option<PathBuf>,
        /// Reads file (FASTQ; .fa/.fasta parsed as FASTA)
        reads: PathBuf,
        /// Output SAM path (stdout if omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Absolute mismatch budget per read
        #[arg(long, default_value_t = 0, conflicts_with = "mismatch_percent")]
        mismatches: u32,
        /// Mismatch budget as a percentage of read length (floor)
        #[arg(long = "mismatch-percent")]
        mismatch_percent: Option<f64>,
        /// Also search the reverse-complement strand
        #[arg(long)]
        revcomp: bool,
        /// Report only the minimal-mismatch matches of each read
        #[arg(long = "best-only")]
        best_only: bool,
        /// Drop reads whose minimum Phred score is below this threshold
        #[arg(long = "min-quality")]
        min_quality: Option<u8>,
        /// Stop after emitting this many matches in total
        #[arg(long = "max-results", default_value_t = 10_000_000)]
        max_results: usize,
        /// Total memory limit in MiB (partitions + read batches)
        #[arg(long = "memory-mb", default_value_t = 512)]
        memory_mb: usize,
        /// Fragment size used when indexing on the fly; must match a prebuilt index
        #[arg(long = "fragment-size", default_value_t = 16 * 1024 * 1024)]
        fragment_size: u32,
        /// Extension tail limit used when indexing on the fly
        #[arg(long, default_value_t = 1024)]
        overlap: u32,
        /// Rebuild a stale index from --reference instead of failing
        #[arg(long = "rebuild-stale", requires = "reference")]
        rebuild_stale: bool,
        /// Treat consecutive reads as mate pairs
        #[arg(long)]
        paired: bool,
        #[arg(short = 't', long = "threads", default_value_t = 1)]
        threads: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Index {
            reference,
            output,
            fragment_size,
            overlap,
        } => run_index(&reference, &output, fragment_size, overlap),
        Commands::Align {
            index,
            reference,
            reads,
            out,
            mismatches,
            mismatch_percent,
            revcomp,
            best_only,
            min_quality,
            max_results,
            memory_mb,
            fragment_size,
            overlap,
            rebuild_stale,
            paired,
            threads,
        } => {
            let budget = match mismatch_percent {
                Some(p) => MismatchBudget::Percent(p),
                None => MismatchBudget::Absolute(mismatches),
            };
            let config = AlignConfig {
                fragment_size,
                overlap,
                memory_limit: memory_mb * 1024 * 1024,
                budget,
                search_revcomp: revcomp,
                best_only,
                min_quality,
                max_results,
                threads,
                paired,
            };
            run_align(
                index.as_deref(),
                reference.as_deref(),
                &reads,
                out.as_deref(),
                rebuild_stale,
                config,
            )
        }
    }
}

fn run_index(reference: &Path, output: &Path, fragment_size: u32, overlap: u32) -> Result<()> {
    let (name, seq) = fasta::read_reference(reference)?;
    println!("reference: {} ({} bases)", name, seq.len());

    let started = std::time::Instant::now();
    let idx = index::build_index(&name, &seq, fragment_size, overlap)?;
    println!(
        "indexed {} fragments in {:.2}s",
        idx.meta.fragments.len(),
        started.elapsed().as_secs_f64()
    );

    IndexStore::save(&idx, output)?;
    println!("index saved: {}.{{meta,ref,sarr}}", output.display());
    Ok(())
}

fn run_align(
    index: Option<&Path>,
    reference: Option<&Path>,
    reads: &Path,
    out: Option<&Path>,
    rebuild_stale: bool,
    config: AlignConfig,
) -> Result<()> {
    if index.is_none() && reference.is_none() {
        anyhow::bail!("either --index or --reference is required");
    }

    // 陈旧的预建索引：默认报错，--rebuild-stale 时从参考序列显式重建
    if let (Some(prefix), true) = (index, rebuild_stale) {
        // 其他打开失败留给调度器归因到 IndexReady 阶段
        if let Err(AlignerError::StaleIndex { .. }) =
            IndexStore::open(prefix, Some(config.fragment_size))
        {
            let Some(path) = reference else {
                anyhow::bail!("--rebuild-stale requires --reference");
            };
            let (name, seq) = fasta::read_reference(path)?;
            let idx = index::build_index(&name, &seq, config.fragment_size, config.overlap)?;
            IndexStore::save(&idx, prefix)?;
            println!("stale index rebuilt: {}", prefix.display());
        }
    }

    let aligner = Aligner::new(config)?;
    println!("search kernel: {}", aligner.kernel_name());

    // 现场索引需要把参考序列读进内存；预建索引只读元数据
    let reference_seq = match (index, reference) {
        (Some(_), _) => None,
        (None, Some(path)) => Some(fasta::read_reference(path)?),
        (None, None) => unreachable!(),
    };
    let input = match (index, &reference_seq) {
        (Some(prefix), _) => IndexInput::Prebuilt(prefix),
        (None, Some((name, seq))) => IndexInput::Sequence {
            name: name.as_str(),
            seq: seq.as_slice(),
        },
        (None, None) => unreachable!(),
    };

    let is_fasta = matches!(
        reads.extension().and_then(|e| e.to_str()),
        Some("fa") | Some("fasta") | Some("fna")
    );
    let result = if is_fasta {
        drive(&aligner, &input, FastaSource::open(reads)?, out)
    } else {
        drive(&aligner, &input, FastqSource::open(reads)?, out)
    };

    // 陈旧索引不静默重建，提示用户显式重建
    if let Err(e) = &result {
        if let Some(AlignerError::Phase { source, .. }) = e.downcast_ref::<AlignerError>() {
            if matches!(**source, AlignerError::StaleIndex { .. }) {
                eprintln!(
                    "hint: rerun `galign index` with the requested fragment size, \
                     or pass --rebuild-stale together with --reference"
                );
            }
        }
    }
    result
}

fn drive<S: ReadSource + Send>(
    aligner: &Aligner,
    input: &IndexInput<'_>,
    reads: S,
    out: Option<&Path>,
) -> Result<()> {
    let cancel = CancelToken::new();
    let outcome = match out {
        Some(path) => {
            let mut sink = SamWriter::create(path)?;
            aligner.run(input, reads, &mut sink, &cancel)?
        }
        None => {
            let stdout = std::io::stdout();
            let mut sink = SamWriter::new(stdout.lock());
            aligner.run(input, reads, &mut sink, &cancel)?
        }
    };

    let stats = &outcome.stats;
    eprintln!("index:  {:.2}s", stats.index_elapsed.as_secs_f64());
    eprintln!("load:   {:.2}s", stats.load_elapsed.as_secs_f64());
    eprintln!("search: {:.2}s", stats.search_elapsed.as_secs_f64());
    eprintln!("write:  {:.2}s", stats.write_elapsed.as_secs_f64());
    eprintln!(
        "reads: {} total, {} aligned ({:.1}%), {} quality-filtered, {} skipped",
        stats.reads_total,
        stats.reads_aligned,
        stats.percent_aligned(),
        stats.reads_filtered,
        stats.reads_skipped,
    );
    eprintln!("matches emitted: {}", stats.matches_emitted);
    if stats.truncated {
        eprintln!("note: result cap reached, output truncated");
    }
    if outcome.status == RunStatus::Cancelled {
        eprintln!("run cancelled, partial output discarded");
    }
    Ok(())
}

//! Command-line interface.
//!
//! Four subcommands: `sign` builds a signature file from sequence files,
//! `info` inspects a signature file, `dist` prints a pairwise distance
//! matrix for ad hoc comparisons, and `query` classifies inputs against a
//! reference database.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use rayon::prelude::*;

use crate::bio::kmers::KmerSpec;
use crate::database::ReferenceDb;
use crate::io::{
    signature_from_file, write_results_csv, write_results_json, SequenceFile,
};
use crate::metric::jaccard_distance;
use crate::query::{query_files, QueryParams};
use crate::signatures::{
    file as sigfile, Signature, SignatureArray, SignatureFile, SignatureIds,
    SignatureSetRecord, SignaturesMeta,
};
use crate::utils::CancellationToken;

#[derive(Parser)]
#[command(
    name = "kmertax",
    version,
    about = "Rapid taxonomic identification of microbial genomes from k-mer signatures"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Csv,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compute signatures for sequence files and write a signature file
    Sign {
        /// Sequence files (FASTA/FASTQ, optionally compressed)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Tail length of the k-mers to extract
        #[arg(short, long)]
        k: usize,

        /// Prefix the k-mers must follow
        #[arg(short, long)]
        prefix: String,

        /// Path of the signature file to write
        #[arg(short, long)]
        output: PathBuf,

        /// Optional name stored in the file metadata
        #[arg(long)]
        name: Option<String>,
    },

    /// Print facts about a signature file
    Info {
        /// Signature file to inspect
        file: PathBuf,

        /// Also list the signature IDs
        #[arg(long)]
        ids: bool,

        /// Also dump the metadata JSON
        #[arg(long)]
        metadata: bool,
    },

    /// Pairwise Jaccard distances between sequence files
    Dist {
        /// Sequence files to compare
        #[arg(required = true, num_args = 2..)]
        inputs: Vec<PathBuf>,

        /// Tail length of the k-mers to extract
        #[arg(short, long)]
        k: usize,

        /// Prefix the k-mers must follow
        #[arg(short, long)]
        prefix: String,
    },

    /// Classify query genomes against a reference database
    Query {
        /// Query sequence files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Reference signature file
        #[arg(short, long)]
        signatures: PathBuf,

        /// Reference taxonomy snapshot (JSON, optionally gzipped)
        #[arg(short, long)]
        taxonomy: PathBuf,

        /// Fail if any signature ID has no genome record
        #[arg(long)]
        strict: bool,

        /// Worker threads (0 = one per CPU)
        #[arg(long, default_value_t = 0)]
        threads: usize,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
}

/// Runs a parsed command.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Sign {
            inputs,
            k,
            prefix,
            output,
            name,
        } => run_sign(inputs, k, &prefix, &output, name),
        Commands::Info {
            file,
            ids,
            metadata,
        } => run_info(&file, ids, metadata),
        Commands::Dist { inputs, k, prefix } => run_dist(inputs, k, &prefix),
        Commands::Query {
            inputs,
            signatures,
            taxonomy,
            strict,
            threads,
            output,
            format,
        } => run_query(inputs, &signatures, &taxonomy, strict, threads, output, format),
    }
}

fn scan_inputs(inputs: &[PathBuf], kspec: &KmerSpec) -> Result<Vec<(SequenceFile, Signature)>> {
    inputs
        .par_iter()
        .map(|path| {
            let file = SequenceFile::from_path(path);
            let signature = signature_from_file(kspec, &file)
                .with_context(|| format!("scanning {}", path.display()))?;
            Ok((file, signature))
        })
        .collect()
}

fn run_sign(
    inputs: Vec<PathBuf>,
    k: usize,
    prefix: &str,
    output: &PathBuf,
    name: Option<String>,
) -> Result<()> {
    let kspec = KmerSpec::new(k, prefix.as_bytes())?;
    info!("signing {} files with spec {}", inputs.len(), kspec);

    let scanned = scan_inputs(&inputs, &kspec)?;
    let ids: Vec<String> = scanned
        .iter()
        .map(|(file, _)| {
            file.path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.label())
        })
        .collect();
    let signatures: Vec<Signature> = scanned.into_iter().map(|(_, sig)| sig).collect();
    let array = SignatureArray::from_signatures(&signatures)?;

    let record = SignatureSetRecord {
        kmerspec: Some(kspec),
        meta: SignaturesMeta {
            name,
            id_attr: Some("key".into()),
            ..Default::default()
        },
    };
    let metadata = serde_json::to_value(&record)?;

    let mut out = BufWriter::new(
        File::create(output).with_context(|| format!("creating {}", output.display()))?,
    );
    sigfile::write(
        &mut out,
        &array,
        None,
        Some(&SignatureIds::Strings(ids)),
        Some(&metadata),
    )?;
    out.flush()?;

    println!(
        "wrote {} signatures to {}",
        array.len(),
        output.display()
    );
    Ok(())
}

fn run_info(path: &PathBuf, ids: bool, metadata: bool) -> Result<()> {
    let stream = BufReader::new(
        File::open(path).with_context(|| format!("opening {}", path.display()))?,
    );
    let mut file = SignatureFile::open(stream)?;

    println!("signatures: {}", file.count());
    println!("dtype:      {}", file.dtype());
    println!("elements:   {}", file.nelems());
    println!("ids:        {}", if file.has_ids() { "yes" } else { "no" });
    println!(
        "metadata:   {}",
        if file.has_metadata() { "yes" } else { "no" }
    );

    if ids {
        match file.read_ids()? {
            Some(SignatureIds::Strings(values)) => {
                for id in values {
                    println!("{id}");
                }
            }
            Some(SignatureIds::Ints(values)) => {
                for id in values {
                    println!("{id}");
                }
            }
            None => bail!("file has no IDs"),
        }
    }

    if metadata {
        match file.read_metadata()? {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => bail!("file has no metadata"),
        }
    }

    Ok(())
}

fn run_dist(inputs: Vec<PathBuf>, k: usize, prefix: &str) -> Result<()> {
    let kspec = KmerSpec::new(k, prefix.as_bytes())?;
    let scanned = scan_inputs(&inputs, &kspec)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    write!(out, "file")?;
    for (file, _) in &scanned {
        write!(out, "\t{}", file.label())?;
    }
    writeln!(out)?;

    for (file, sig) in &scanned {
        write!(out, "{}", file.label())?;
        for (_, other) in &scanned {
            let d = jaccard_distance(sig.as_slice(), other.as_slice());
            write!(out, "\t{d:.6}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn run_query(
    inputs: Vec<PathBuf>,
    signatures: &PathBuf,
    taxonomy: &PathBuf,
    strict: bool,
    threads: usize,
    output: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let db = ReferenceDb::load(signatures, taxonomy, strict)?;

    let files: Vec<SequenceFile> = inputs.iter().map(SequenceFile::from_path).collect();
    let params = QueryParams::with_threads(threads);
    let results = query_files(&db, &files, &params, &CancellationToken::new())?;

    let failed = results.items.iter().filter(|i| !i.success).count();
    if failed > 0 {
        info!("{failed} of {} queries failed", results.items.len());
    }

    match output {
        Some(path) => {
            let out = BufWriter::new(
                File::create(&path).with_context(|| format!("creating {}", path.display()))?,
            );
            export(&results, out, format)?;
            println!("wrote results for {} queries to {}", results.items.len(), path.display());
        }
        None => {
            let stdout = io::stdout();
            export(&results, stdout.lock(), format)?;
        }
    }
    Ok(())
}

fn export<W: Write>(
    results: &crate::query::QueryResults,
    out: W,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => write_results_json(results, out)?,
        OutputFormat::Csv => write_results_csv(results, out)?,
    }
    Ok(())
}

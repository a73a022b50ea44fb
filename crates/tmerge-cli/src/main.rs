use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use anyhow::Context;
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tmerge_core::{
    CommandExtractor, DirectoryExtractor, DittoExtractor, Extractor, MetadataStatus,
    Orchestrator, ProcessEvent, ProcessOptions,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExtractorKind {
    /// macOS ditto (keeps resource forks aside)
    Ditto,
    /// Info-ZIP unzip
    Unzip,
    /// Inputs are already-extracted directories
    Dir,
}

#[derive(Parser)]
#[command(name = "tmerge", version, about = "Merge Google Photos Takeout archives, re-embedding sidecar metadata")]
struct Cli {
    /// Takeout archives (or extracted directories with --extractor dir)
    #[arg(required = true)]
    archives: Vec<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    output: PathBuf,

    /// Tool used to unpack each archive
    #[arg(long, value_enum, default_value = "ditto")]
    extractor: ExtractorKind,

    /// Where temporary extraction directories are created
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Leave extracted files in the work directory
    #[arg(long)]
    keep_extracted: bool,

    /// Abort the remaining archives after the first failed one
    #[arg(long)]
    stop_on_failure: bool,

    /// Look for sidecars of unmatched files in the output tree afterwards
    #[arg(long)]
    reprocess: bool,

    /// Only update statuses during --reprocess, don't rewrite files
    #[arg(long, requires = "reprocess")]
    no_reembed: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let t_total = std::time::Instant::now();

    let extractor: Arc<dyn Extractor> = match cli.extractor {
        ExtractorKind::Ditto => Arc::new(DittoExtractor::default()),
        ExtractorKind::Unzip => Arc::new(CommandExtractor::unzip()),
        ExtractorKind::Dir => Arc::new(DirectoryExtractor),
    };

    let options = ProcessOptions {
        archives: cli.archives,
        output: cli.output,
        work_dir: cli.work_dir,
        keep_extracted: cli.keep_extracted,
        stop_on_archive_failure: cli.stop_on_failure,
        reembed_late_matches: !cli.no_reembed,
    };

    let orchestrator = Orchestrator::new(options, extractor);
    let token = orchestrator.cancel_token();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling after the current file...");
        token.cancel();
    })
    .context("failed to install Ctrl-C handler")?;

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {wide_msg}")
            .context("invalid progress template")?
            .progress_chars("=> "),
    );

    // The worker only talks to us through events; the bar lives here.
    let (tx, rx) = mpsc::channel();
    let worker = std::thread::spawn(move || {
        let report = orchestrator.run(&tx);
        (orchestrator, report)
    });

    for event in rx {
        match event {
            ProcessEvent::Status(msg) => bar.println(msg),
            ProcessEvent::FileStarted { filename, .. } => bar.set_message(filename),
            ProcessEvent::Progress { total, processed, .. } => {
                bar.set_length(total);
                bar.set_position(processed);
            }
            ProcessEvent::Stage { .. } | ProcessEvent::FileResult(_) => {}
        }
    }
    bar.finish_and_clear();

    let (orchestrator, mut report) = worker
        .join()
        .map_err(|_| anyhow::anyhow!("processing thread panicked"))?;

    if cli.reprocess && !report.cancelled {
        let late = orchestrator.reprocess(&mut report.results, &|event: ProcessEvent| {
            if let ProcessEvent::Status(msg) = event {
                eprintln!("{}", msg);
            }
        });
        log::info!("{} file(s) matched during reprocessing", late);
    }

    for failed in report.failed_archives() {
        if let Err(reason) = &failed.outcome {
            eprintln!("FAILED {}: {}", failed.archive.display(), reason);
        }
    }

    eprintln!(
        "Done! {} media files: {} with metadata, {} inherited, {} found late, {} without ({:.2}s){}",
        report.results.len(),
        report.count(MetadataStatus::FoundAndApplied),
        report.count(MetadataStatus::InheritedFromOriginal),
        report.count(MetadataStatus::MetadataFoundLate),
        report.count(MetadataStatus::NoMetadataFound),
        t_total.elapsed().as_secs_f64(),
        if report.cancelled { " [cancelled]" } else { "" }
    );

    let failures = report.failed_archives().count();
    if failures > 0 {
        anyhow::bail!("{} archive(s) failed", failures);
    }
    Ok(())
}

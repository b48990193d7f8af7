use clap::Parser;
use itertools::Itertools;
use regroup::RegroupError;
use regroup::bookkeeping::BookkeepingRecord;
use regroup::executor::{ExecutionResult, Executor, HaddInvoker};
use regroup::planner::plan_groups;
use regroup::{reconciler, recovery};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Regroup skimmed datasets by merging their per-job output files into
/// larger files and rebuilding the dataset metadata to match.
#[derive(Parser)]
#[command(name = "regroup")]
#[command(about = "Regroup skimmed dataset files into larger merged files", long_about = None)]
struct Cli {
    /// JSON file containing the skimmed-files bookkeeping record
    #[arg(short = 'l', long = "files-list")]
    files_list: PathBuf,

    /// Output folder for the merged files
    #[arg(short = 'o', long = "outputdir")]
    outputdir: String,

    /// Restrict the run to the listed datasets (repeatable)
    #[arg(long = "only-datasets")]
    only_datasets: Vec<String>,

    /// Limit the number of files merged per group (capped at 500)
    #[arg(short = 'f', long = "files")]
    files: Option<usize>,

    /// Limit the number of events merged per group
    #[arg(short = 'e', long = "events")]
    events: Option<u64>,

    /// Number of parallel merge workers
    #[arg(short = 's', long = "scaleout", default_value_t = 2)]
    scaleout: usize,

    /// Pass the overwrite flag to the merge tool
    #[arg(long)]
    overwrite: bool,

    /// Do not execute any merge, only save the plan and metadata
    #[arg(long)]
    dry: bool,

    /// Merge executable to invoke per group
    #[arg(long, default_value = "hadd")]
    tool: String,

    /// Directory for the plan, script and definition artifacts
    #[arg(long = "artifacts-dir", default_value = ".")]
    artifacts_dir: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            eprintln!("[regroup] {} group(s) failed", failed);
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("[regroup] {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<usize, RegroupError> {
    let record = BookkeepingRecord::load(&cli.files_list)?;
    let datasets = record.into_datasets(&cli.only_datasets)?;
    let plan = plan_groups(&datasets, &cli.outputdir, cli.files, cli.events);

    println!(
        "[regroup] will merge {} groups of files",
        plan.total_groups()
    );
    println!(
        "[regroup] datasets: {}",
        plan.datasets.iter().map(|d| d.dataset.as_str()).join(", ")
    );

    // Recovery artifacts land before any merge runs, so a killed or failed
    // run is replayable without recomputing the plan.
    fs::create_dir_all(&cli.artifacts_dir)?;
    recovery::write_artifacts(&plan, &cli.artifacts_dir, &cli.tool, cli.scaleout)?;

    let invoker = Arc::new(HaddInvoker {
        tool: cli.tool.clone(),
    });
    let executor = Executor::new(cli.scaleout, cli.overwrite, cli.dry, invoker);
    let results = executor.run(&plan)?;

    let failed: Vec<&ExecutionResult> = results.iter().filter(|r| r.is_failure()).collect();
    for result in &failed {
        println!(
            "#### failed merge: {} (dataset {})",
            result.output_path, result.dataset
        );
    }

    let definitions = reconciler::reconcile(&datasets, &plan);
    let definition_path = cli.artifacts_dir.join("skimmed_dataset_definition_hadd.json");
    reconciler::write_definition(&definitions, &definition_path)?;
    println!(
        "[regroup] dataset definition written to {}",
        definition_path.display()
    );
    println!("[regroup] DONE");

    Ok(failed.len())
}

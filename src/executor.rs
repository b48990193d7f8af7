use crate::RegroupError;
use crate::planner::GroupPlan;
use crossbeam_channel::unbounded;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::thread;

/// The external merge command, reduced to a succeed-or-fail call so tests can
/// script outcomes without spawning processes.
pub trait MergeInvoker: Send + Sync {
    fn invoke(&self, output: &str, inputs: &[String], overwrite: bool) -> Result<(), String>;
}

/// Invokes the real merge tool: `<tool> [-f] <output> <inputs...>`.
pub struct HaddInvoker {
    pub tool: String,
}

impl MergeInvoker for HaddInvoker {
    fn invoke(&self, output: &str, inputs: &[String], overwrite: bool) -> Result<(), String> {
        let mut cmd = Command::new(&self.tool);
        if overwrite {
            cmd.arg("-f");
        }
        cmd.arg(output);
        cmd.args(inputs);

        match cmd.status() {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(format!("{} exited with {}", self.tool, status)),
            Err(e) => Err(format!("failed to launch {}: {}", self.tool, e)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecStatus {
    Success,
    Failed(String),
    /// Dry-run runs record every group without touching the merge tool.
    Unattempted,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub dataset: String,
    pub output_path: String,
    pub status: ExecStatus,
}

impl ExecutionResult {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, ExecStatus::Failed(_))
    }
}

struct Job {
    dataset: String,
    output_path: String,
    inputs: Vec<String>,
}

/// Runs every planned group through the merge tool on a fixed pool of
/// `scaleout` worker threads. Groups are distributed over a channel; each
/// worker reports one result per group back over a second channel, so the
/// only shared write target is the channel itself.
pub struct Executor {
    scaleout: usize,
    overwrite: bool,
    dry_run: bool,
    invoker: Arc<dyn MergeInvoker>,
}

impl Executor {
    pub fn new(
        scaleout: usize,
        overwrite: bool,
        dry_run: bool,
        invoker: Arc<dyn MergeInvoker>,
    ) -> Self {
        Self {
            scaleout: scaleout.max(1),
            overwrite,
            dry_run,
            invoker,
        }
    }

    /// Execute the plan. A failing group is recorded and never aborts its
    /// siblings; the caller decides whether a non-zero failure count is fatal.
    /// Results carry no ordering guarantee across groups.
    pub fn run(&self, plan: &GroupPlan) -> Result<Vec<ExecutionResult>, RegroupError> {
        // Created up front so concurrent workers never race on mkdir.
        create_output_dirs(plan)?;

        if self.dry_run {
            return Ok(plan
                .groups()
                .map(|(dataset, group)| ExecutionResult {
                    dataset: dataset.to_string(),
                    output_path: group.output_path.clone(),
                    status: ExecStatus::Unattempted,
                })
                .collect());
        }

        let (job_tx, job_rx) = unbounded::<Job>();
        let (result_tx, result_rx) = unbounded::<ExecutionResult>();

        for (dataset, group) in plan.groups() {
            job_tx
                .send(Job {
                    dataset: dataset.to_string(),
                    output_path: group.output_path.clone(),
                    inputs: group.input_paths(),
                })
                .map_err(|e| RegroupError::Other(format!("failed to queue group: {}", e)))?;
        }
        // Workers drain until the queue closes.
        drop(job_tx);

        thread::scope(|scope| {
            for _ in 0..self.scaleout {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let invoker = Arc::clone(&self.invoker);
                let overwrite = self.overwrite;
                scope.spawn(move || {
                    for job in job_rx.iter() {
                        println!("[regroup] running: {}", job.output_path);
                        let status = match invoker.invoke(&job.output_path, &job.inputs, overwrite)
                        {
                            Ok(()) => ExecStatus::Success,
                            Err(reason) => {
                                eprintln!(
                                    "[regroup] error producing group {}: {}",
                                    job.output_path, reason
                                );
                                ExecStatus::Failed(reason)
                            }
                        };
                        let _ = result_tx.send(ExecutionResult {
                            dataset: job.dataset,
                            output_path: job.output_path,
                            status,
                        });
                    }
                });
            }
        });
        drop(result_tx);

        Ok(result_rx.iter().collect())
    }
}

fn create_output_dirs(plan: &GroupPlan) -> Result<(), RegroupError> {
    for (_, group) in plan.groups() {
        if let Some(parent) = Path::new(&group.output_path).parent() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookkeeping::{Cutflow, DatasetRecord, FileEntry, SampleWeights};
    use crate::planner::plan_groups;
    use serde_json::Map;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Scripted invoker: fails exactly the listed output paths and records
    /// every invocation it sees.
    struct FakeInvoker {
        fail_on: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeInvoker {
        fn new(fail_on: &[&str]) -> Self {
            Self {
                fail_on: fail_on.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl MergeInvoker for FakeInvoker {
        fn invoke(&self, output: &str, _inputs: &[String], _overwrite: bool) -> Result<(), String> {
            self.calls.lock().unwrap().push(output.to_string());
            if self.fail_on.iter().any(|f| f == output) {
                Err("scripted failure".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn dataset(name: &str, nfiles: usize) -> DatasetRecord {
        DatasetRecord {
            name: name.to_string(),
            files: (0..nfiles)
                .map(|i| FileEntry {
                    path: format!("{}_{}.root", name, i),
                    events: 10,
                })
                .collect(),
            cutflow: Cutflow {
                initial: 100,
                skim: 10,
            },
            weights: SampleWeights::RealData,
            metadata: Map::new(),
        }
    }

    fn plan_in_tempdir(records: &[DatasetRecord], max_files: Option<usize>) -> (tempfile::TempDir, GroupPlan) {
        let dir = tempfile::tempdir().unwrap();
        let outputdir = dir.path().join("merged");
        let plan = plan_groups(records, outputdir.to_str().unwrap(), max_files, None);
        (dir, plan)
    }

    #[test]
    fn test_one_result_per_group_and_failure_isolated() {
        let records = vec![dataset("A", 4), dataset("B", 2)];
        let (_dir, plan) = plan_in_tempdir(&records, Some(2));
        assert_eq!(plan.total_groups(), 3);

        let failing = plan.datasets[0].groups[1].output_path.clone();
        let invoker = Arc::new(FakeInvoker::new(&[&failing]));
        let executor = Executor::new(2, false, false, invoker.clone());

        let results = executor.run(&plan).unwrap();
        assert_eq!(results.len(), 3);

        let failed: Vec<&ExecutionResult> = results.iter().filter(|r| r.is_failure()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].output_path, failing);
        assert_eq!(failed[0].dataset, "A");

        // Every group was attempted despite the failure, in whatever order
        // the pool got to them.
        let attempted: HashSet<String> = invoker.calls.lock().unwrap().iter().cloned().collect();
        let planned: HashSet<String> = plan
            .groups()
            .map(|(_, g)| g.output_path.clone())
            .collect();
        assert_eq!(attempted, planned);
    }

    #[test]
    fn test_dry_run_records_unattempted_without_invoking() {
        let records = vec![dataset("A", 3)];
        let (_dir, plan) = plan_in_tempdir(&records, None);

        let invoker = Arc::new(FakeInvoker::new(&[]));
        let executor = Executor::new(2, false, true, invoker.clone());
        let results = executor.run(&plan).unwrap();

        assert_eq!(results.len(), 1);
        assert!(results.iter().all(|r| r.status == ExecStatus::Unattempted));
        assert!(invoker.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_output_directories_created_before_dispatch() {
        let records = vec![dataset("A", 1), dataset("B", 1)];
        let (dir, plan) = plan_in_tempdir(&records, None);

        let executor = Executor::new(1, false, true, Arc::new(FakeInvoker::new(&[])));
        executor.run(&plan).unwrap();

        assert!(dir.path().join("merged/A").is_dir());
        assert!(dir.path().join("merged/B").is_dir());
    }

    #[test]
    fn test_overwrite_flag_reaches_invoker() {
        struct OverwriteProbe {
            saw: Mutex<Vec<bool>>,
        }
        impl MergeInvoker for OverwriteProbe {
            fn invoke(&self, _o: &str, _i: &[String], overwrite: bool) -> Result<(), String> {
                self.saw.lock().unwrap().push(overwrite);
                Ok(())
            }
        }

        let records = vec![dataset("A", 1)];
        let (_dir, plan) = plan_in_tempdir(&records, None);
        let probe = Arc::new(OverwriteProbe {
            saw: Mutex::new(Vec::new()),
        });
        Executor::new(1, true, false, probe.clone()).run(&plan).unwrap();

        assert_eq!(*probe.saw.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_hadd_invoker_reports_exit_status() {
        // `true` and `false` stand in for the merge tool.
        let ok = HaddInvoker {
            tool: "true".to_string(),
        };
        assert!(ok.invoke("out.root", &["a.root".to_string()], false).is_ok());

        let bad = HaddInvoker {
            tool: "false".to_string(),
        };
        let err = bad
            .invoke("out.root", &["a.root".to_string()], false)
            .unwrap_err();
        assert!(err.contains("exited with"), "got: {}", err);

        let missing = HaddInvoker {
            tool: "/nonexistent/merge-tool".to_string(),
        };
        let err = missing
            .invoke("out.root", &["a.root".to_string()], false)
            .unwrap_err();
        assert!(err.contains("failed to launch"), "got: {}", err);
    }
}

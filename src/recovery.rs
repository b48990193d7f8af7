use crate::RegroupError;
use crate::planner::GroupPlan;
use itertools::Itertools;
use serde_json::{Map, Value, json};
use std::fs;
use std::path::{Path, PathBuf};

/// Paths of the three durable artifacts describing a plan.
pub struct RecoveryArtifacts {
    pub plan_summary: PathBuf,
    pub command_script: PathBuf,
    pub retry_driver: PathBuf,
}

/// Serialize the plan into its replayable artifacts: a JSON grouping summary
/// (`hadd.json`), a flat merge-command list (`hadd.sh`) and a standalone
/// retry driver (`retry_hadd.sh`). Written before any merge runs, so a
/// killed run can always be replayed without recomputing the plan.
pub fn write_artifacts(
    plan: &GroupPlan,
    artifacts_dir: &Path,
    tool: &str,
    scaleout: usize,
) -> Result<RecoveryArtifacts, RegroupError> {
    let plan_summary = artifacts_dir.join("hadd.json");
    let command_script = artifacts_dir.join("hadd.sh");
    let retry_driver = artifacts_dir.join("retry_hadd.sh");

    fs::write(&plan_summary, serde_json::to_string_pretty(&plan_summary_json(plan))?)?;
    fs::write(&command_script, command_script_text(plan, tool))?;
    fs::write(&retry_driver, retry_driver_text(scaleout))?;

    Ok(RecoveryArtifacts {
        plan_summary,
        command_script,
        retry_driver,
    })
}

fn plan_summary_json(plan: &GroupPlan) -> Value {
    let mut by_dataset = Map::new();
    for dataset_plan in &plan.datasets {
        let mut files = Map::new();
        for group in &dataset_plan.groups {
            files.insert(
                group.output_path.clone(),
                Value::from(group.input_paths()),
            );
        }
        by_dataset.insert(dataset_plan.dataset.clone(), json!({ "files": files }));
    }
    Value::Object(by_dataset)
}

fn command_script_text(plan: &GroupPlan, tool: &str) -> String {
    let mut script = String::new();
    for (_, group) in plan.groups() {
        script.push_str(&format!(
            "{} -ff {} {}\n",
            tool,
            group.output_path,
            group.input_paths().iter().join(" ")
        ));
    }
    script
}

fn retry_driver_text(scaleout: usize) -> String {
    format!(
        r#"#!/bin/sh
# Replays the merge commands in hadd.sh through a pool of {scaleout} workers.
# Usage: sh retry_hadd.sh [substring]
# Only commands containing the substring are retried, so a subset of
# datasets can be redone after a partial failure.
set -u
cd "$(dirname "$0")"
FILTER="${{1:-}}"
: > retry_failed.txt
grep -e "$FILTER" hadd.sh | xargs -d '\n' -n 1 -P {scaleout} -I{{}} sh -c '{{}} || echo "{{}}" >> retry_failed.txt'
echo "DONE!"
if [ -s retry_failed.txt ]; then
    echo "Failed commands:"
    cat retry_failed.txt
fi
"#,
        scaleout = scaleout
    )
}

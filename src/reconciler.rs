use crate::RegroupError;
use crate::bookkeeping::{DatasetRecord, SampleWeights};
use crate::planner::GroupPlan;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// The dataset definition downstream analysis configuration consumes instead
/// of the original one: updated metadata plus the merged output files.
#[derive(Debug, Serialize)]
pub struct DatasetDefinition {
    pub metadata: Map<String, Value>,
    pub files: Vec<String>,
}

/// Derive the post-merge metadata for every dataset in the plan. This is a
/// purely arithmetic pass over the plan and the original bookkeeping totals;
/// it does not depend on whether any merge succeeded. A dataset with an
/// undefined derived quantity gets a `<key>_error` entry instead of aborting
/// the rest of the reconciliation.
pub fn reconcile(
    records: &[DatasetRecord],
    plan: &GroupPlan,
) -> BTreeMap<String, DatasetDefinition> {
    let mut definitions = BTreeMap::new();

    for dataset_plan in &plan.datasets {
        let Some(record) = records.iter().find(|r| r.name == dataset_plan.dataset) else {
            continue;
        };

        let mut metadata = record.metadata.clone();
        metadata.insert(
            "nevents".to_string(),
            Value::String(record.total_events().to_string()),
        );

        if record.cutflow.initial == 0 {
            println!(
                "[regroup] warning: dataset {} has a zero initial cutflow counter, skim efficiency undefined",
                record.name
            );
            metadata.insert(
                "skim_efficiency_error".to_string(),
                Value::String("initial cutflow counter is zero".to_string()),
            );
            metadata.insert(
                "size_error".to_string(),
                Value::String("skim efficiency undefined".to_string()),
            );
        } else {
            let efficiency = record.cutflow.skim as f64 / record.cutflow.initial as f64;
            metadata.insert(
                "skim_efficiency".to_string(),
                Value::String(efficiency.to_string()),
            );
            // The merged size is an approximation: file size is assumed to
            // scale linearly with the fraction of events kept by the skim.
            match declared_size(&record.metadata) {
                Some(size) => {
                    let new_size = (size as f64 * efficiency).round() as u64;
                    metadata.insert("size".to_string(), Value::String(new_size.to_string()));
                }
                None => {
                    println!(
                        "[regroup] warning: dataset {} has no usable declared size",
                        record.name
                    );
                    metadata.insert(
                        "size_error".to_string(),
                        Value::String("declared size missing or not an integer".to_string()),
                    );
                }
            }
        }

        if let SampleWeights::Simulated {
            sum_genweights,
            sum_genweights_skimmed,
        } = record.weights
        {
            // The skim biases the retained genweight sum; downstream weights
            // must be multiplied back up by the inverse retention.
            if sum_genweights_skimmed == 0.0 {
                println!(
                    "[regroup] warning: dataset {} has a zero skimmed genweight sum, rescale undefined",
                    record.name
                );
                metadata.insert(
                    "skim_rescale_genweights_error".to_string(),
                    Value::String("skimmed genweight sum is zero".to_string()),
                );
            } else {
                let rescale = sum_genweights / sum_genweights_skimmed;
                metadata.insert(
                    "skim_rescale_genweights".to_string(),
                    Value::String(rescale.to_string()),
                );
            }
        }

        metadata.insert("isSkim".to_string(), Value::String("True".to_string()));

        definitions.insert(
            dataset_plan.dataset.clone(),
            DatasetDefinition {
                metadata,
                files: dataset_plan
                    .groups
                    .iter()
                    .map(|g| g.output_path.clone())
                    .collect(),
            },
        );
    }

    definitions
}

pub fn write_definition(
    definitions: &BTreeMap<String, DatasetDefinition>,
    path: &Path,
) -> Result<(), RegroupError> {
    fs::write(path, serde_json::to_string_pretty(definitions)?)?;
    Ok(())
}

// The upstream bookkeeping stringifies sizes, so accept both forms.
fn declared_size(metadata: &Map<String, Value>) -> Option<u64> {
    match metadata.get("size") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

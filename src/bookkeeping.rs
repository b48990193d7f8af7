use crate::RegroupError;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// One skimmed input file and the number of events it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub path: String,
    pub events: u64,
}

/// Per-dataset event counters for the two selection stages the regrouping
/// cares about.
#[derive(Debug, Clone, Copy)]
pub struct Cutflow {
    pub initial: u64,
    pub skim: u64,
}

/// Genweight sums before and after skimming. Real data carries no sampling
/// weight, so the distinction is a tagged variant rather than optional floats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleWeights {
    Simulated {
        sum_genweights: f64,
        sum_genweights_skimmed: f64,
    },
    RealData,
}

/// Everything known about one logical dataset after validation: its ordered
/// skimmed file list, cutflow counters, weight sums and the descriptive
/// metadata block passed through to the output definition.
#[derive(Debug, Clone)]
pub struct DatasetRecord {
    pub name: String,
    pub files: Vec<FileEntry>,
    pub cutflow: Cutflow,
    pub weights: SampleWeights,
    pub metadata: Map<String, Value>,
}

impl DatasetRecord {
    pub fn is_simulated(&self) -> bool {
        matches!(self.weights, SampleWeights::Simulated { .. })
    }

    /// Exact event count of the skimmed dataset, independent of how the
    /// files end up grouped or whether any merge succeeded.
    pub fn total_events(&self) -> u64 {
        self.files.iter().map(|f| f.events).sum()
    }
}

#[derive(Debug, Deserialize)]
pub struct CutflowTable {
    pub initial: BTreeMap<String, u64>,
    pub skim: BTreeMap<String, u64>,
}

#[derive(Debug, Deserialize)]
pub struct DatasetsMetadata {
    pub by_dataset: BTreeMap<String, Map<String, Value>>,
}

/// On-disk schema of the bookkeeping record the skimming jobs produce.
/// Weight-sum tables are absent for runs containing only real data.
#[derive(Debug, Deserialize)]
pub struct BookkeepingRecord {
    pub skimmed_files: BTreeMap<String, Vec<String>>,
    pub nskimmed_events: BTreeMap<String, Vec<u64>>,
    pub cutflow: CutflowTable,
    pub datasets_metadata: DatasetsMetadata,
    #[serde(default)]
    pub sum_genweights: BTreeMap<String, f64>,
    #[serde(default)]
    pub sum_genweights_skimmed: BTreeMap<String, f64>,
}

impl BookkeepingRecord {
    pub fn load(path: &Path) -> Result<Self, RegroupError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Validate and convert the raw record into per-dataset records. When
    /// `only` is non-empty, datasets not named in it are dropped before
    /// validation, matching the allow-list behavior of the CLI.
    pub fn into_datasets(self, only: &[String]) -> Result<Vec<DatasetRecord>, RegroupError> {
        let mut events_by_dataset = self.nskimmed_events;
        let mut metadata_by_dataset = self.datasets_metadata.by_dataset;
        let mut records = Vec::new();

        for (name, paths) in self.skimmed_files {
            if !only.is_empty() && !only.contains(&name) {
                continue;
            }

            let events = events_by_dataset.remove(&name).ok_or_else(|| {
                RegroupError::Planning(format!("no skimmed event counts for dataset {}", name))
            })?;
            if events.len() != paths.len() {
                return Err(RegroupError::Planning(format!(
                    "dataset {} has {} files but {} event counts",
                    name,
                    paths.len(),
                    events.len()
                )));
            }

            // Duplicate entries would silently double count events and merge
            // the same file into two groups, so they are rejected up front.
            let mut seen = HashSet::new();
            for path in &paths {
                if !seen.insert(path.as_str()) {
                    return Err(RegroupError::Planning(format!(
                        "dataset {} lists file {} more than once",
                        name, path
                    )));
                }
            }

            let initial = *self.cutflow.initial.get(&name).ok_or_else(|| {
                RegroupError::Planning(format!("no initial cutflow counter for dataset {}", name))
            })?;
            let skim = *self.cutflow.skim.get(&name).ok_or_else(|| {
                RegroupError::Planning(format!("no skim cutflow counter for dataset {}", name))
            })?;

            let metadata = metadata_by_dataset.remove(&name).ok_or_else(|| {
                RegroupError::Planning(format!("no metadata block for dataset {}", name))
            })?;

            let weights = if is_simulated_flag(&metadata) {
                let sum_genweights = *self.sum_genweights.get(&name).ok_or_else(|| {
                    RegroupError::Planning(format!(
                        "simulated dataset {} has no genweight sum",
                        name
                    ))
                })?;
                let sum_genweights_skimmed =
                    *self.sum_genweights_skimmed.get(&name).ok_or_else(|| {
                        RegroupError::Planning(format!(
                            "simulated dataset {} has no skimmed genweight sum",
                            name
                        ))
                    })?;
                SampleWeights::Simulated {
                    sum_genweights,
                    sum_genweights_skimmed,
                }
            } else {
                SampleWeights::RealData
            };

            let files = paths
                .into_iter()
                .zip(events)
                .map(|(path, events)| FileEntry { path, events })
                .collect();

            records.push(DatasetRecord {
                name,
                files,
                cutflow: Cutflow { initial, skim },
                weights,
                metadata,
            });
        }

        Ok(records)
    }
}

// The upstream bookkeeping stringifies booleans, so "True"/"true" count too.
fn is_simulated_flag(metadata: &Map<String, Value>) -> bool {
    match metadata.get("isMC") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "True" || s == "true",
        _ => false,
    }
}

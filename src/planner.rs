use crate::bookkeeping::{DatasetRecord, FileEntry};

/// Hard cap on the number of inputs merged in one invocation, so the
/// external command never blows past OS argument-length limits.
pub const MAX_FILES_PER_GROUP: usize = 500;

/// A contiguous run of a dataset's files slated to be merged into one output.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub output_path: String,
    pub members: Vec<FileEntry>,
}

impl Group {
    pub fn input_paths(&self) -> Vec<String> {
        self.members.iter().map(|f| f.path.clone()).collect()
    }

    pub fn total_events(&self) -> u64 {
        self.members.iter().map(|f| f.events).sum()
    }
}

#[derive(Debug, Clone)]
pub struct DatasetPlan {
    pub dataset: String,
    pub groups: Vec<Group>,
}

/// The full grouping decision for a run. Built once, then read by the
/// executor, the script emitter and the reconciler without mutation.
#[derive(Debug, Clone)]
pub struct GroupPlan {
    pub datasets: Vec<DatasetPlan>,
}

impl GroupPlan {
    pub fn total_groups(&self) -> usize {
        self.datasets.iter().map(|d| d.groups.len()).sum()
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &Group)> {
        self.datasets
            .iter()
            .flat_map(|d| d.groups.iter().map(move |g| (d.dataset.as_str(), g)))
    }
}

/// Partition every dataset's file list into ordered groups under a file-count
/// ceiling and an optional event-count ceiling. Datasets without files are
/// dropped with a warning; every other dataset contributes at least one group.
pub fn plan_groups(
    records: &[DatasetRecord],
    outputdir: &str,
    max_files: Option<usize>,
    max_events: Option<u64>,
) -> GroupPlan {
    let max_files = effective_max_files(max_files);
    let mut datasets = Vec::new();

    for record in records {
        if record.files.is_empty() {
            println!(
                "[regroup] warning: dataset {} has no skimmed files, skipping",
                record.name
            );
            continue;
        }

        let mut groups: Vec<Group> = Vec::new();
        let mut members: Vec<FileEntry> = Vec::new();
        let mut events_in_group: u64 = 0;
        let mut ngroup = 1usize;

        for file in &record.files {
            // Close against the state *before* adding, so the ceilings stay
            // upper bounds. A first file already over the event ceiling still
            // opens the group: files are never dropped or split.
            let over_files = members.len() + 1 > max_files;
            let over_events = max_events
                .map(|cap| events_in_group + file.events > cap)
                .unwrap_or(false);
            if !members.is_empty() && (over_files || over_events) {
                groups.push(Group {
                    output_path: group_output_path(outputdir, &record.name, ngroup),
                    members: std::mem::take(&mut members),
                });
                ngroup += 1;
                events_in_group = 0;
            }

            members.push(file.clone());
            events_in_group += file.events;
        }

        // Remainder flush: the last group is emitted even below the ceilings.
        if !members.is_empty() {
            groups.push(Group {
                output_path: group_output_path(outputdir, &record.name, ngroup),
                members,
            });
        }

        datasets.push(DatasetPlan {
            dataset: record.name.clone(),
            groups,
        });
    }

    GroupPlan { datasets }
}

fn effective_max_files(max_files: Option<usize>) -> usize {
    match max_files {
        Some(n) => n.min(MAX_FILES_PER_GROUP).max(1),
        None => MAX_FILES_PER_GROUP,
    }
}

fn group_output_path(outputdir: &str, dataset: &str, ngroup: usize) -> String {
    format!("{}/{}/{}_{}.root", outputdir, dataset, dataset, ngroup)
}

//! Run the transforms of a batch of variables on a bounded worker pool.
//!
//! Variables are handled one at a time in configuration order. All file groups of
//! a variable are submitted to the pool at once and their results are collected in
//! the order they complete. If any of them fails, the rest are still allowed to
//! finish, then the first failure is returned and no further variables are started.
use std::{path::PathBuf, sync::mpsc};

use error_stack::ResultExt;

use crate::config::VariableSpec;
use crate::resolver::{FileGroup, ResolveError};
use crate::transform::TransformError;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Could not start a pool of {0} workers")]
    Pool(usize),
    #[error("Could not find the input files for variable '{0}'")]
    Resolve(String),
    #[error("Failed to CMORize variable '{variable}' from {key}")]
    Task { variable: String, key: String },
}

/// The outcome of one transform.
#[derive(Debug)]
pub struct TaskResult {
    pub variable: String,
    pub key: String,
    pub outcome: error_stack::Result<PathBuf, TransformError>,
}

impl TaskResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Two workers for every three available cores, at least one.
pub fn default_worker_count() -> usize {
    let ncpu = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    ((ncpu as f64 / 1.5).floor() as usize).max(1)
}

/// Resolve and transform every variable in `variables`.
///
/// `resolve` finds the file groups of a variable and `transform` turns one group into
/// an output file; both are called from worker threads for the transform and the
/// calling thread for the resolution. Returns the results of every task run if all
/// succeeded. A failing resolution stops the batch immediately.
pub fn run_batch<R, F>(
    variables: &[VariableSpec],
    resolve: R,
    transform: F,
    workers: usize,
) -> error_stack::Result<Vec<TaskResult>, DispatchError>
where
    R: Fn(&VariableSpec) -> error_stack::Result<Vec<FileGroup>, ResolveError>,
    F: Fn(&VariableSpec, &FileGroup) -> error_stack::Result<PathBuf, TransformError> + Sync,
{
    let workers = workers.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("cmorize-worker-{i}"))
        .build()
        .change_context(DispatchError::Pool(workers))?;
    log::info!("Using at most {workers} workers");

    let mut results = vec![];
    for spec in variables {
        let groups = resolve(spec).change_context_lazy(|| DispatchError::Resolve(spec.name.clone()))?;
        if groups.is_empty() {
            continue;
        }
        log::debug!("Submitting {} file groups for variable '{}'", groups.len(), spec.name);

        let variable_results = run_variable(&pool, spec, &groups, &transform);
        let failed = variable_results.iter().any(|r| !r.is_ok());
        results.extend(variable_results);
        if failed {
            break;
        }
    }

    log::info!("Batch summary:\n{}", summary_table(&results));

    let first_failure = results.iter().position(|r| !r.is_ok());
    match first_failure {
        None => Ok(results),
        Some(idx) => {
            let failed = results.swap_remove(idx);
            let (variable, key) = (failed.variable, failed.key);
            match failed.outcome {
                Err(report) => Err(report.change_context(DispatchError::Task { variable, key })),
                Ok(_) => Ok(results),
            }
        }
    }
}

fn run_variable<F>(pool: &rayon::ThreadPool, spec: &VariableSpec, groups: &[FileGroup], transform: &F) -> Vec<TaskResult>
where
    F: Fn(&VariableSpec, &FileGroup) -> error_stack::Result<PathBuf, TransformError> + Sync,
{
    let (tx, rx) = mpsc::channel();
    let mut results = Vec::with_capacity(groups.len());

    std::thread::scope(|ts| {
        ts.spawn(move || {
            pool.scope(|s| {
                for group in groups {
                    let tx = tx.clone();
                    s.spawn(move |_| {
                        let outcome = transform(spec, group);
                        // the receiver lives until every sender is gone
                        let _ = tx.send((group.key.clone(), outcome));
                    });
                }
            });
        });

        for (key, outcome) in rx.iter() {
            match &outcome {
                Ok(_) => log::info!("Finished CMORizing {key}"),
                Err(e) => log::error!("Failed to CMORize {key}\n{e:?}"),
            }
            results.push(TaskResult {
                variable: spec.name.clone(),
                key,
                outcome,
            });
        }
    });

    results
}

/// Render one row per task: variable, file group, status and output file or error.
pub fn summary_table(results: &[TaskResult]) -> String {
    let mut builder = tabled::builder::Builder::new();
    builder.push_record(["variable", "input", "status", "output"]);
    for res in results {
        let (status, detail) = match &res.outcome {
            Ok(path) => ("ok", path.display().to_string()),
            Err(e) => ("FAILED", e.current_context().to_string()),
        };
        builder.push_record([res.variable.clone(), res.key.clone(), status.to_string(), detail]);
    }
    let mut table = builder.build();
    table
        .with(tabled::settings::style::Style::blank())
        .with(tabled::settings::Alignment::left());
    table.to_string()
}

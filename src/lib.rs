pub mod cli;
pub mod config;
pub mod pool;
pub mod remote;
pub mod resource;
pub mod ssh;
pub mod utils;

#[cfg(test)]
mod testing;

use anyhow::{anyhow, bail, Result};
use crossbeam_channel::unbounded;
use config::{Config, Operation, ResourceKind};
use remote::RemoteClient;
use resource::{apply, FileReconciler, FolderReconciler, Located, Reconcile};
use serde::Serialize;
use serde_json::{json, Value};
use ssh::channel::Transport;
use std::thread;

/// Per-path results of one operation. Paths are reported in the order they
/// were given, failed ones carry their error chain.
#[derive(Debug)]
pub struct Report {
    pub results: Vec<Value>,
    pub failures: usize,
}

impl Report {
    fn collect(results: Vec<(String, Result<Value>)>) -> Self {
        let mut failures = 0;
        let results = results
            .into_iter()
            .map(|(path, result)| match result {
                Ok(value) => value,
                Err(e) => {
                    log::error!("{}: {:#}", path, e);
                    failures += 1;
                    json!({ "path": path, "error": format!("{:#}", e) })
                }
            })
            .collect();
        Report { results, failures }
    }
}

pub fn run(config: Config) -> Result<()> {
    log::info!(
        "Connecting to {}@{}:{} ({} channels{})",
        config.username,
        config.host,
        config.port,
        config.max_sessions,
        if config.sudo { ", sudo" } else { "" }
    );
    let client = RemoteClient::connect(&config)?;

    let report = execute(&client, &config.operation);
    if let Err(e) = client.close() {
        log::warn!("Failed to close SSH connection cleanly: {}", e);
    }
    let report = report?;

    println!("{}", serde_json::to_string_pretty(&report.results)?);
    if report.failures > 0 {
        bail!("{} of {} paths failed", report.failures, report.results.len());
    }
    Ok(())
}

/// Runs `operation` against the remote host on as many worker threads as
/// the client has channels, all of them sharing the client's channel pool.
pub fn execute<T: Transport>(client: &RemoteClient<T>, operation: &Operation) -> Result<Report> {
    let files = FileReconciler::new(client);
    let folders = FolderReconciler::new(client);
    let workers = client.pool().capacity();

    let results = match operation {
        Operation::ApplyFile(spec) => {
            in_parallel(std::slice::from_ref(spec), workers, |spec| apply_one(&files, spec))
        }
        Operation::ApplyFolders(specs) => {
            in_parallel(specs, workers, |spec| apply_one(&folders, spec))
        }
        Operation::Read { kind: ResourceKind::File, paths } => {
            in_parallel(paths, workers, |path| read_one(&files, path))
        }
        Operation::Read { kind: ResourceKind::Folder, paths } => {
            in_parallel(paths, workers, |path| read_one(&folders, path))
        }
        Operation::Delete { kind: ResourceKind::File, paths } => {
            in_parallel(paths, workers, |path| delete_one(&files, path))
        }
        Operation::Delete { kind: ResourceKind::Folder, paths } => {
            in_parallel(paths, workers, |path| delete_one(&folders, path))
        }
    };

    Ok(Report::collect(results))
}

fn apply_one<R>(reconciler: &R, desired: &R::Desired) -> Result<Value>
where
    R: Reconcile,
    R::Desired: Located,
    R::Observed: Serialize,
{
    let (outcome, state) = apply(reconciler, desired)?;
    Ok(json!({ "outcome": outcome, "state": state }))
}

fn read_one<R>(reconciler: &R, path: &str) -> Result<Value>
where
    R: Reconcile,
    R::Observed: Serialize,
{
    let state = reconciler.read(path)?;
    Ok(json!({ "path": path, "state": state }))
}

fn delete_one<R: Reconcile>(reconciler: &R, path: &str) -> Result<Value> {
    let deleted = match reconciler.read(path)? {
        Some(prior) => {
            reconciler.delete(&prior)?;
            true
        }
        None => {
            log::info!("{} does not exist, nothing to delete", path);
            false
        }
    };
    Ok(json!({ "path": path, "deleted": deleted }))
}

/// Runs `work` over `items` on at most `workers` threads pulling from a
/// shared job queue. Results come back in item order.
fn in_parallel<I, F>(items: &[I], workers: usize, work: F) -> Vec<(String, Result<Value>)>
where
    I: Located + Sync,
    F: Fn(&I) -> Result<Value> + Sync,
{
    let (jobs, queue) = unbounded::<(usize, &I)>();
    for job in items.iter().enumerate() {
        if jobs.send(job).is_err() {
            break;
        }
    }
    drop(jobs);

    let mut results: Vec<Option<Result<Value>>> = items.iter().map(|_| None).collect();
    let work = &work;
    thread::scope(|s| {
        let (done, finished) = unbounded();
        let mut handles = Vec::new();
        for id in 0..workers.clamp(1, items.len().max(1)) {
            let queue = queue.clone();
            let done = done.clone();
            let spawned = thread::Builder::new()
                .name(format!("reconcile-{}", id))
                .spawn_scoped(s, move || {
                    for (index, item) in queue.iter() {
                        if done.send((index, work(item))).is_err() {
                            break;
                        }
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    log::warn!("Could not start worker {}: {}", id, e);
                    break;
                }
            }
        }
        drop(done);

        for (index, result) in finished.iter() {
            results[index] = Some(result);
        }
        for handle in handles {
            if handle.join().is_err() {
                log::error!("A reconcile worker panicked");
            }
        }
    });

    items
        .iter()
        .zip(results)
        .map(|(item, result)| {
            let path = item.path().to_string();
            let result =
                result.unwrap_or_else(|| Err(anyhow!("Worker for {} did not finish", path)));
            (path, result)
        })
        .collect()
}

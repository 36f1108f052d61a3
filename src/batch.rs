//! # Batch executor
//!
//! Independent simulations, or independent output evaluations of a snapshot, run
//! on the blocking thread pool of the tokio runtime, at most `n_worker` at a time.
//! Results are always returned in submission order.

use crate::{
    aggregator::Aggregator,
    metric::{self, NamedMetric, OutputSpec},
    model::OpticalSystem,
    simulation::{run_simulation, SimulationResult},
    Config, Error, Result,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use tokio::sync::Semaphore;

/// Simulation job
#[derive(Debug, Clone)]
pub struct Job {
    pub config: Arc<Config>,
    pub seed: u64,
}
impl Job {
    pub fn new(config: Arc<Config>, seed: u64) -> Self {
        Self { config, seed }
    }
}

async fn execute<T, F>(
    tasks: Vec<F>,
    n_worker: usize,
    progress: Option<Arc<AtomicUsize>>,
) -> Vec<Result<T>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(n_worker.max(1)));
    let handles: Vec<_> = tasks
        .into_iter()
        .map(|task| {
            let semaphore = semaphore.clone();
            let progress = progress.clone();
            tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Worker(e.to_string()))?;
                let result = tokio::task::spawn_blocking(task)
                    .await
                    .map_err(|e| Error::Worker(e.to_string()))?;
                if let Some(progress) = progress {
                    progress.fetch_add(1, Ordering::Relaxed);
                }
                result
            })
        })
        .collect();
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(
            handle
                .await
                .map_err(|e| Error::Worker(e.to_string()))
                .and_then(|result| result),
        );
    }
    results
}

/// Batch of simulations
pub struct Batch {
    jobs: Vec<Job>,
    n_worker: usize,
    progress: Arc<AtomicUsize>,
}
impl Batch {
    /// Creates a batch running one job per available CPU
    pub fn new(jobs: Vec<Job>) -> Self {
        Self {
            jobs,
            n_worker: std::thread::available_parallelism().map_or(1, |n| n.get()),
            progress: Arc::new(AtomicUsize::new(0)),
        }
    }
    /// Sets the maximum number of concurrent jobs
    pub fn workers(mut self, n_worker: usize) -> Self {
        self.n_worker = n_worker;
        self
    }
    /// Number of jobs in the batch
    pub fn len(&self) -> usize {
        self.jobs.len()
    }
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
    /// Counter of completed jobs
    pub fn progress(&self) -> Arc<AtomicUsize> {
        self.progress.clone()
    }
    /// Runs all the jobs, returning one result per job in job order
    pub async fn run(self) -> Vec<Result<SimulationResult>> {
        log::info!(
            "running {} simulations on {} workers",
            self.jobs.len(),
            self.n_worker
        );
        let tasks: Vec<_> = self
            .jobs
            .into_iter()
            .map(|job| move || run_simulation(&job.config, job.seed))
            .collect();
        execute(tasks, self.n_worker, Some(self.progress)).await
    }
}

/// Runs the simulation `jobs`, at most `n_worker` at a time
pub async fn run_batch(jobs: Vec<Job>, n_worker: usize) -> Vec<Result<SimulationResult>> {
    Batch::new(jobs).workers(n_worker).run().await
}

/// Evaluates the `outputs` of the `model` snapshot concurrently
///
/// Each output keeps the noise stream of its index so the metrics are the same
/// as a sequential evaluation.
pub async fn evaluate_concurrently(
    model: Arc<OpticalSystem>,
    outputs: Vec<OutputSpec>,
    seed: u64,
    n_worker: usize,
) -> Result<Vec<NamedMetric>> {
    let tasks: Vec<_> = outputs
        .into_iter()
        .enumerate()
        .map(|(i, spec)| {
            let model = model.clone();
            move || {
                let mut aggregator = Aggregator::new(&model);
                metric::evaluate_output(&mut aggregator, &spec, i, seed)
            }
        })
        .collect();
    execute(tasks, n_worker, None).await.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{
            Disturbance, ModalBasis, NoiseModel, Output, PhaseSampling, Sensor, Source, SourceKind,
        },
        Simulation,
    };

    fn config(sigma: f64) -> Config {
        Config::new(ModalBasis::new(6, 4.))
            .source(Source::new("cal", SourceKind::CalUnit).sees(["ncpa"]))
            .disturbance(
                Disturbance::zernike("ncpa", vec![0., 1., 0., 0.5, 0., 0.]).seen_by(["cal"]),
            )
            .sensor(
                Sensor::phase("pd", PhaseSampling::Modal)
                    .noise(NoiseModel::Gaussian { sigma })
                    .sees(["cal", "ncpa"]),
            )
            .output(Output::rms("pd", "cal").noisy())
            .output(Output::rms("pd", "cal").name("clean"))
            .output(Output::rms("pd", "cal").name("noisy").noisy())
    }

    #[tokio::test]
    async fn batch_results_are_in_job_order() {
        let good = Arc::new(config(0.1));
        let bad = Arc::new(config(-1.));
        let jobs = vec![
            Job::new(good.clone(), 1),
            Job::new(bad, 2),
            Job::new(good.clone(), 3),
        ];
        let batch = Batch::new(jobs).workers(2);
        let progress = batch.progress();
        let results = batch.run().await;
        assert_eq!(progress.load(Ordering::Relaxed), 3);
        assert_eq!(
            results[0].as_ref().unwrap().outputs,
            run_simulation(&good, 1).unwrap().outputs
        );
        assert!(matches!(results[1], Err(Error::ConfigValidation(_))));
        assert_eq!(
            results[2].as_ref().unwrap().outputs,
            run_simulation(&good, 3).unwrap().outputs
        );
    }

    #[tokio::test]
    async fn concurrent_evaluation_matches_sequential() {
        let simulation = Simulation::new(&config(0.2)).unwrap();
        let sequential = simulation.run(7).unwrap().outputs;
        let concurrent = evaluate_concurrently(
            Arc::new(simulation.model().clone()),
            simulation.evaluator().outputs().to_vec(),
            7,
            3,
        )
        .await
        .unwrap();
        assert_eq!(sequential, concurrent);
    }
}

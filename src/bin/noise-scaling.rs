use chrono::prelude::*;
use linya::{Bar, Progress};
use ncpa::{
    batch::{Batch, Job},
    config::{
        Disturbance, ModalBasis, NoiseModel, Output, PhaseSampling, Sensor, Source, SourceKind,
    },
    Config,
};
use std::{
    collections::BTreeMap,
    fs::{create_dir_all, File},
    path::Path,
    sync::{atomic::Ordering, Arc},
    time::Duration,
};
use tokio::sync::Mutex;

const N_SEED: usize = 200;
const SIGMA: f64 = 5e-9;

fn config(k: f64) -> Config {
    Config::new(ModalBasis::new(11, 4.))
        .source(Source::new("cal", SourceKind::CalUnit).sees(["ncpa"]))
        .disturbance(Disturbance::zernike("ncpa", vec![0.; 11]).seen_by(["cal"]))
        .sensor(
            Sensor::phase("pd", PhaseSampling::Modal)
                .unit(1e9)
                .noise(NoiseModel::Gaussian { sigma: k * SIGMA })
                .sees(["cal", "ncpa"]),
        )
        .output(Output::rms("pd", "cal").name("wfe").noisy())
}

fn variance(data: &[f64]) -> f64 {
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let local: DateTime<Local> = Local::now();
    let data_path = Path::new(".").join("data").join(local.to_rfc3339());
    create_dir_all(&data_path)?;
    println!("Data repository: {:?}", &data_path);

    let scales = [1f64, 2., 4.];
    let jobs: Vec<_> = scales
        .iter()
        .flat_map(|&k| {
            let config = Arc::new(config(k));
            (0..N_SEED as u64).map(move |seed| Job::new(config.clone(), seed))
        })
        .collect();
    let n_job = jobs.len();

    let batch = Batch::new(jobs);
    let done = batch.progress();
    let progress = Arc::new(Mutex::new(Progress::new()));
    let batch_progress = progress.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(200));
        let bar: Bar = batch_progress.lock().await.bar(n_job, "Noise scaling");
        loop {
            interval.tick().await;
            let mut progress = batch_progress.lock().await;
            progress.set_and_draw(&bar, done.load(Ordering::Relaxed));
            if progress.is_done(&bar) {
                break;
            }
        }
    });
    let results = batch.run().await;

    let mut wfe: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for (i, result) in results.into_iter().enumerate() {
        let k = scales[i / N_SEED];
        let value = result?
            .get("wfe")
            .and_then(|o| o.value.as_scalar())
            .ok_or_else(|| anyhow::anyhow!("missing output `wfe`"))?;
        wfe.entry(format!("{k}")).or_default().push(value);
    }
    let reference = variance(&wfe["1"]);
    for k in scales {
        let var = variance(&wfe[&format!("{k}")]);
        println!(
            "k={k}: var(WFE)={var:.3e}nm^2, ratio={:.2} (expected {:.0})",
            var / reference,
            k * k
        );
    }

    serde_pickle::to_writer(
        &mut File::create(data_path.join("noise-scaling.pkl"))?,
        &wfe,
        Default::default(),
    )?;

    Ok(())
}

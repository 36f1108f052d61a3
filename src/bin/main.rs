use chrono::prelude::*;
use ncpa::{
    config::{
        Disturbance, Dm, DmKind, Lenslets, ModalBasis, NoiseModel, Output, OutputKind, PathTag,
        PhaseSampling, Projection, Sensor, Source, SourceKind,
    },
    Config, Simulation,
};
use std::{
    fs::{create_dir_all, File},
    path::Path,
    time::Instant,
};

const N_MODE: usize = 11;

fn nm(coefficients: &[f64]) -> Vec<f64> {
    coefficients.iter().map(|c| c * 1e-9).collect()
}

fn mcao() -> Config {
    let calibration = ["cal0", "cal1", "cal2"];
    let science = ["sky0", "sky1"];
    let every_source = calibration.iter().chain(&science).chain(&["ngs"]);
    Config::new(ModalBasis::new(N_MODE, 4.))
        .source(Source::new("cal0", SourceKind::CalUnit).sees(["ncpa", "ncpa-hi", "dmhi", "dmlo"]))
        .source(
            Source::new("cal1", SourceKind::CalUnit)
                .field(30., 0.)
                .sees(["ncpa", "ncpa-hi", "dmhi", "dmlo"]),
        )
        .source(
            Source::new("cal2", SourceKind::CalUnit)
                .field(-15., 26.)
                .sees(["ncpa", "ncpa-hi", "dmhi", "dmlo"]),
        )
        .source(
            Source::new("sky0", SourceKind::OnSky)
                .sees(["ncpa", "ncpa-hi", "sci", "dsm", "dmhi", "dmlo"]),
        )
        .source(
            Source::new("sky1", SourceKind::OnSky)
                .field(20., 20.)
                .sees(["ncpa", "ncpa-hi", "sci", "dsm", "dmhi", "dmlo"]),
        )
        .source(
            Source::new("ngs", SourceKind::Ngs)
                .field(40., 0.)
                .flux(1e3)
                .sees(["ncpa", "dsm", "dmhi", "dmlo"]),
        )
        .disturbance(
            Disturbance::zernike(
                "ncpa",
                nm(&[0., 20., -15., 40., 10., -8., 12., 6., -4., 3., 5.]),
            )
            .seen_by(every_source.clone().copied()),
        )
        .disturbance(
            Disturbance::zernike("ncpa-hi", nm(&[0., 0., 0., 15., -10., 8., 5., -6., 4., 0., 2.]))
                .altitude(8e3)
                .radius(6.)
                .seen_by(calibration.iter().chain(&science).copied()),
        )
        .disturbance(
            Disturbance::zernike("sci", nm(&[0., 3., 2., 0., 0., 0., 0., 0., 0., 0., 0.]))
                .path(PathTag::Science)
                .seen_by(science),
        )
        .dm(Dm::new("dsm", DmKind::Dsm).illuminates(science.iter().chain(&["ngs"]).copied()))
        .dm(Dm::new("dmhi", DmKind::DmHi)
            .altitude(8e3)
            .radius(6.)
            .illuminates(every_source.clone().copied()))
        .dm(Dm::new("dmlo", DmKind::DmLo)
            .altitude(1e3)
            .radius(4.2)
            .illuminates(every_source.copied()))
        .sensor(
            Sensor::phase("pd", PhaseSampling::Modal)
                .unit(1e9)
                .noise(NoiseModel::Gaussian { sigma: 0.5e-9 })
                .sees(
                    calibration
                        .iter()
                        .chain(&["ncpa", "ncpa-hi", "dsm", "dmhi", "dmlo"])
                        .copied(),
                ),
        )
        .sensor(
            Sensor::phase("science", PhaseSampling::Map { nsample: 32 })
                .unit(1e9)
                .sees(
                    science
                        .iter()
                        .chain(&["ncpa", "ncpa-hi", "sci", "dsm", "dmhi", "dmlo"])
                        .copied(),
                ),
        )
        .sensor(
            Sensor::shwfs("sh", Lenslets::Geometric { nsubx: 8, npoints: 2 })
                .unit(1e9)
                .noise(NoiseModel::Photon {
                    sigma: 1e-9,
                    reference_flux: 1e3,
                })
                .sees(["ngs", "ncpa", "dsm", "dmhi", "dmlo"]),
        )
        .output(Output::rms("pd", "cal0"))
        .output(Output::rms("pd", "cal1"))
        .output(Output::rms("pd", "cal2"))
        .output(Output::rms("science", "sky0").name("on-axis WFE [nm]"))
        .output(Output::rms("science", "sky1").name("off-axis WFE [nm]"))
        .output(Output::rms("sh", "ngs").noisy())
        .output(Output::new(OutputKind::MeasurementVector, "pd", "cal0").name("pd modes [nm]"))
        .projection(
            Projection::new("pd", calibration)
                .dms(["dsm", "dmhi", "dmlo"])
                .model_based(["dsm"]),
        )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let local: DateTime<Local> = Local::now();
    let data_path = Path::new(".").join("data").join(local.to_rfc3339());
    create_dir_all(&data_path)?;
    println!("Data repository: {:?}", &data_path);

    let config = mcao();
    let simulation = Simulation::new(&config)?;
    println!("{}", simulation.model());

    let now = Instant::now();
    let result = simulation.run(0)?;
    log::info!("Simulation duration: {}ms", now.elapsed().as_millis());
    println!("{result}");

    serde_pickle::to_writer(
        &mut File::create(data_path.join("ncpa.pkl"))?,
        &result,
        Default::default(),
    )?;

    Ok(())
}

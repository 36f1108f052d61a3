use approx::{assert_abs_diff_eq, assert_relative_eq};
use nalgebra as na;
use ncpa::{
    aggregator::Aggregator,
    config::{
        Disturbance, Dm, DmKind, Lenslets, ModalBasis, NoiseModel, Output, OutputKind,
        PhaseSampling, Projection, Sensor, Source, SourceKind,
    },
    projector::{self, LeastSquares},
    run_simulation, Config, Simulation,
};

fn scalar(result: &ncpa::SimulationResult, name: &str) -> f64 {
    result
        .get(name)
        .and_then(|o| o.value.as_scalar())
        .unwrap_or_else(|| panic!("missing scalar output `{name}`"))
}

#[test]
fn zero_disturbance_gives_zero_residual() {
    let config = Config::new(ModalBasis::new(6, 4.))
        .source(Source::new("cal", SourceKind::CalUnit).sees(["ncpa", "dsm"]))
        .disturbance(Disturbance::zernike("ncpa", vec![0.; 6]).seen_by(["cal"]))
        .dm(Dm::new("dsm", DmKind::Dsm).illuminates(["cal"]))
        .sensor(Sensor::phase("pd", PhaseSampling::Modal).sees(["cal", "ncpa", "dsm"]))
        .sensor(
            Sensor::phase("map", PhaseSampling::Map { nsample: 16 }).sees(["cal", "ncpa", "dsm"]),
        )
        .sensor(
            Sensor::shwfs("sh", Lenslets::Geometric { nsubx: 6, npoints: 3 })
                .sees(["cal", "ncpa", "dsm"]),
        )
        .output(Output::rms("pd", "cal"))
        .output(Output::rms("map", "cal"))
        .output(Output::rms("sh", "cal"));
    let result = run_simulation(&config, 11).unwrap();
    for name in ["pd@cal", "map@cal", "sh@cal"] {
        assert_eq!(scalar(&result, name), 0.);
    }
}

/// Common-path disturbance corrected by a DM illuminated by every source
fn common_path(n_direction: usize) -> Config {
    let coefficients = vec![0., 0.4, -0.3, 0.8, 0.1, -0.2, 0.5];
    let fields: Vec<(String, (f64, f64))> = (0..n_direction)
        .map(|i| {
            let angle = 2. * std::f64::consts::PI * i as f64 / n_direction as f64;
            (format!("cal{i}"), (30. * angle.cos(), 30. * angle.sin()))
        })
        .chain([("sky".to_string(), (12., -7.))])
        .collect();
    let ids: Vec<&str> = fields.iter().map(|(id, _)| id.as_str()).collect();
    let mut config = Config::new(ModalBasis::new(coefficients.len(), 4.))
        .disturbance(Disturbance::zernike("ncpa", coefficients).seen_by(ids.clone()))
        .dm(Dm::new("dm", DmKind::Vdm).illuminates(ids.clone()))
        .sensor(
            Sensor::phase("pd", PhaseSampling::Modal)
                .sees(ids.iter().copied().chain(["ncpa", "dm"])),
        )
        .projection(Projection::new("pd", ids[..n_direction].to_vec()));
    for (id, (x, y)) in &fields {
        config = config
            .source(
                Source::new(id.as_str(), SourceKind::CalUnit)
                    .field(*x, *y)
                    .sees(["ncpa", "dm"]),
            )
            .output(Output::rms("pd", id.as_str()));
    }
    config
}

#[test]
fn common_path_is_corrected_for_any_sampling() {
    for n_direction in [1, 3, 8] {
        let result = run_simulation(&common_path(n_direction), 0).unwrap();
        for output in &result.outputs {
            let rms = output.value.as_scalar().unwrap();
            assert!(rms < 1e-5, "{n_direction} directions, {}: {rms}", output.name);
        }
    }
}

#[test]
fn vanishing_regularization_is_least_squares() {
    let config = Config::new(ModalBasis::new(6, 4.))
        .source(Source::new("a", SourceKind::CalUnit).field(-30., 0.).sees(["ncpa", "dm"]))
        .source(Source::new("b", SourceKind::CalUnit).field(30., 10.).sees(["ncpa", "dm"]))
        .disturbance(
            Disturbance::zernike("ncpa", vec![0.1, 0.5, -0.2, 0.3, 0.2, -0.1])
                .altitude(5e3)
                .radius(5.)
                .seen_by(["a", "b"]),
        )
        .dm(Dm::new("dm", DmKind::DmHi).altitude(9e3).radius(6.).illuminates(["a", "b"]))
        .sensor(Sensor::phase("pd", PhaseSampling::Modal).sees(["a", "b", "ncpa", "dm"]))
        .projection(Projection::new("pd", ["a", "b"]));
    let simulation = Simulation::new(&config).unwrap();
    let terms = simulation
        .projector()
        .unwrap()
        .terms(&mut Aggregator::new(simulation.model()), 0)
        .unwrap();
    let solution = projector::solve(
        &terms,
        LeastSquares {
            regularization: 1e-12,
            max_condition: 1e14,
        },
    )
    .unwrap();

    let n = 6;
    let mut a = na::DMatrix::<f64>::zeros(2 * n, n);
    let mut b = na::DVector::<f64>::zeros(2 * n);
    for (d, term) in terms.iter().enumerate() {
        for i in 0..n {
            b[d * n + i] = term.residual[i];
            for j in 0..n {
                a[(d * n + i, j)] = term.influences[0][(i, j)];
            }
        }
    }
    let direct = a.pseudo_inverse(0f64).unwrap() * b;
    for j in 0..n {
        assert_abs_diff_eq!(solution.update[0][j], direct[j], epsilon = 1e-6);
    }
}

/// The DSM is in front of the calibration unit: the calibration light misses its
/// current command
fn ground_layer(model_based: bool) -> Config {
    let projection = Projection::new("pd", ["cal"]).dms(["dsm", "vdm"]);
    Config::new(ModalBasis::new(5, 4.))
        .source(Source::new("cal", SourceKind::CalUnit).sees(["ncpa", "vdm"]))
        .source(Source::new("sky", SourceKind::OnSky).sees(["ncpa", "dsm", "vdm"]))
        .disturbance(
            Disturbance::zernike("ncpa", vec![0., 1., 0.5, -0.4, 0.2]).seen_by(["cal", "sky"]),
        )
        .dm(Dm::new("dsm", DmKind::Dsm)
            .command(vec![0., 0.3, -0.2, 0., 0.1])
            .illuminates(["sky"]))
        .dm(Dm::new("vdm", DmKind::Vdm).illuminates(["cal", "sky"]))
        .sensor(Sensor::phase("pd", PhaseSampling::Modal).sees(["cal", "ncpa", "dsm", "vdm"]))
        .sensor(Sensor::phase("science", PhaseSampling::Modal).sees(["sky", "ncpa", "dsm", "vdm"]))
        .output(Output::rms("science", "sky"))
        .projection(if model_based {
            projection.model_based(["dsm"])
        } else {
            projection
        })
}

#[test]
fn ground_layer_dm_needs_the_model_based_term() {
    let naive = run_simulation(&ground_layer(false), 0).unwrap();
    let on_sky = scalar(&naive, "science@sky");
    // the DSM command is left out of the calibration residual
    assert_relative_eq!(on_sky, (0.14f64 / 5.).sqrt(), max_relative = 1e-4);

    let modelled = run_simulation(&ground_layer(true), 0).unwrap();
    assert!(scalar(&modelled, "science@sky") < 1e-5);
}

fn noisy(sigma: f64) -> Config {
    Config::new(ModalBasis::new(8, 4.))
        .source(Source::new("cal", SourceKind::CalUnit).sees(["ncpa", "dm"]))
        .disturbance(
            Disturbance::zernike("ncpa", vec![0., 0.2, 0.1, 0., 0., 0., 0., 0.]).seen_by(["cal"]),
        )
        .dm(Dm::new("dm", DmKind::DmLo).illuminates(["cal"]))
        .sensor(
            Sensor::phase("pd", PhaseSampling::Modal)
                .noise(NoiseModel::Gaussian { sigma })
                .sees(["cal", "ncpa", "dm"]),
        )
        .output(Output::rms("pd", "cal").noisy())
        .output(Output::new(OutputKind::MeasurementVector, "pd", "cal").name("modes").noisy())
        .projection(Projection::new("pd", ["cal"]).noisy())
}

#[test]
fn identical_seeds_give_identical_results() {
    let config = noisy(0.05);
    let a = run_simulation(&config, 42).unwrap();
    let b = run_simulation(&config, 42).unwrap();
    assert_eq!(a.outputs, b.outputs);
    assert_eq!(
        a.projection.as_ref().unwrap().commands,
        b.projection.as_ref().unwrap().commands
    );
    let c = run_simulation(&config, 43).unwrap();
    assert_ne!(a.outputs, c.outputs);
}

#[test]
fn noise_variance_scales_quadratically() {
    let sample = |sigma: f64| -> Vec<f64> {
        let config = Config::new(ModalBasis::new(8, 4.))
            .source(Source::new("cal", SourceKind::CalUnit).sees(["ncpa"]))
            .disturbance(Disturbance::zernike("ncpa", vec![0.; 8]).seen_by(["cal"]))
            .sensor(
                Sensor::phase("pd", PhaseSampling::Modal)
                    .noise(NoiseModel::Gaussian { sigma })
                    .sees(["cal", "ncpa"]),
            )
            .output(Output::rms("pd", "cal").noisy());
        (0..50)
            .map(|seed| scalar(&run_simulation(&config, seed).unwrap(), "pd@cal"))
            .collect()
    };
    let variance = |x: &[f64]| {
        let mean = x.iter().sum::<f64>() / x.len() as f64;
        x.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / x.len() as f64
    };
    let reference = variance(&sample(0.1));
    for k in [2f64, 3.] {
        assert_relative_eq!(variance(&sample(0.1 * k)), k * k * reference, max_relative = 1e-9);
    }
}

#[test]
fn shack_hartmann_end_to_end() {
    let n_mode = 3;
    let n_subaperture = 8;
    let mut interaction = vec![0.; 2 * n_subaperture * n_mode];
    interaction[1] = 1.;
    interaction[n_subaperture * n_mode + 2] = 1.;
    let unit = 1e-3;
    let config = Config::new(ModalBasis::new(n_mode, 4.))
        .source(Source::new("ngs", SourceKind::Ngs).sees(["ncpa"]))
        .disturbance(Disturbance::zernike("ncpa", vec![0., 100., 0.]).seen_by(["ngs"]))
        .sensor(
            Sensor::shwfs(
                "sh",
                Lenslets::Explicit {
                    n_subaperture,
                    interaction,
                },
            )
            .sees(["ngs", "ncpa"]),
        )
        .output(Output::rms("sh", "ngs").unit(unit))
        .output(Output::new(OutputKind::MeasurementVector, "sh", "ngs").name("slopes"));
    let result = run_simulation(&config, 0).unwrap();
    assert_abs_diff_eq!(
        scalar(&result, "sh@ngs"),
        100. / 16f64.sqrt() * unit,
        epsilon = 1e-12
    );
    let slopes = result.get("slopes").unwrap().value.as_vector().unwrap();
    assert_eq!(slopes.len(), 16);
    assert_abs_diff_eq!(slopes[0], 100., epsilon = 1e-12);
    assert_abs_diff_eq!(slopes[1..].iter().map(|s| s.abs()).sum::<f64>(), 0., epsilon = 1e-12);
}

#[test]
fn outputs_keep_configured_order() {
    let config = common_path(2)
        .output(Output::rms("pd", "cal0").name("first again"))
        .output(Output::rms("pd", "cal0"));
    let result = run_simulation(&config, 0).unwrap();
    let names: Vec<_> = result.outputs.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, ["pd@cal0", "pd@cal1", "pd@sky", "first again", "pd@cal0"]);
}

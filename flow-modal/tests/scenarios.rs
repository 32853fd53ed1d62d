//! End-to-end properties of the DMD, resolvent and SPOD stages.

use std::f64::consts::{FRAC_PI_4, PI};

use approx::assert_abs_diff_eq;
use faer::Mat;
use flow_modal::*;
use ndarray::{Array3, Axis};

/// Trajectory of x_{k+1} = 0.9·R(π/4) x_k from x₀ = (1, 0.5).
fn rotation_scaling(n_time: usize) -> Mat<f64> {
    let (s, c) = FRAC_PI_4.sin_cos();
    let mut x = Mat::<f64>::zeros(2, n_time);
    x[(0, 0)] = 1.0;
    x[(1, 0)] = 0.5;
    for k in 1..n_time {
        let (a, b) = (x[(0, k - 1)], x[(1, k - 1)]);
        x[(0, k)] = 0.9 * (c * a - s * b);
        x[(1, k)] = 0.9 * (s * a + c * b);
    }
    x
}

/// Two neutral oscillators seen through four states.
fn two_oscillators(n_time: usize, dt: f64) -> Mat<f64> {
    let mut x = Mat::<f64>::zeros(4, n_time);
    for k in 0..n_time {
        let t = k as f64 * dt;
        x[(0, k)] = (1.3 * t).cos() + 0.2 * (3.1 * t).sin();
        x[(1, k)] = (1.3 * t).sin();
        x[(2, k)] = 0.4 * (3.1 * t).cos();
        x[(3, k)] = 0.4 * (3.1 * t).sin() - 0.1 * (1.3 * t).cos();
    }
    x
}

/// Synthetic wake: mean flow plus travelling waves at 1 Hz and 2 Hz,
/// sampled over four whole periods of the slower wave.
fn synthetic_wake() -> FlowSnapshots {
    let (nx, ny, nt) = (6, 5, 200);
    let dt = 0.02;
    let wave = |amp: f64, f: f64, kx: f64, i: usize, j: usize, t: usize| {
        let phase = kx * i as f64 - 2.0 * PI * f * t as f64 * dt;
        amp * phase.cos() * (PI * (j as f64 + 0.5) / ny as f64).sin()
    };
    let u = Array3::from_shape_fn((nx, ny, nt), |(i, j, t)| {
        1.0 + wave(1.0, 1.0, 0.8, i, j, t) + wave(0.3, 2.0, 1.7, i, j, t)
    });
    let v = Array3::from_shape_fn((nx, ny, nt), |(i, j, t)| {
        wave(0.6, 1.0, 0.8, i + 1, j, t) - wave(0.2, 2.0, 1.7, i, j, t)
    });
    FlowSnapshots::new(vec![("u", u), ("v", v)]).unwrap()
}

#[test]
fn recovers_rotation_scaling_spectrum() {
    let x = rotation_scaling(200);
    let config = DmdConfig {
        rank: 2,
        dt: 1.0,
        tol: 0.0,
        ..Default::default()
    };
    let result = dmd(&x, &config).unwrap();
    assert_eq!(result.n_modes(), 2);

    for rho in &result.discrete_eigenvalues {
        assert_abs_diff_eq!(rho.norm(), 0.9, epsilon = 1e-3);
        assert_abs_diff_eq!(rho.arg().abs(), FRAC_PI_4, epsilon = 1e-3);
    }
    for lam in &result.eigenvalues {
        assert_abs_diff_eq!(lam.re, 0.9_f64.ln(), epsilon = 1e-3);
    }

    // ψᵢ bᵢ is the projection of x₀ onto each eigendirection:
    // x₀ = c₊(1, −i) + c₋(1, i) with c₊ = (1 + 0.5i)/2.
    let plus = (0..2)
        .find(|&j| result.discrete_eigenvalues[j].im > 0.0)
        .unwrap();
    let comp0 = result.modes[(0, plus)] * result.amplitudes[plus];
    let comp1 = result.modes[(1, plus)] * result.amplitudes[plus];
    assert_abs_diff_eq!(comp0.re, 0.5, epsilon = 1e-3);
    assert_abs_diff_eq!(comp0.im, 0.25, epsilon = 1e-3);
    assert_abs_diff_eq!(comp1.re, 0.25, epsilon = 1e-3);
    assert_abs_diff_eq!(comp1.im, -0.5, epsilon = 1e-3);
}

#[test]
fn full_rank_reconstruction_is_exact() {
    let x = two_oscillators(120, 0.05);
    let config = DmdConfig {
        rank: 4,
        dt: 0.05,
        tol: 0.0,
        ..Default::default()
    };
    let result = dmd(&x, &config).unwrap();
    let err = dmd_error(&result, &x).unwrap();
    assert!(err.relative_error < 1e-8, "relative error {}", err.relative_error);
}

#[test]
fn modes_are_biorthogonal_under_weight() {
    let x = two_oscillators(120, 0.05);
    let w = vec![1.0, 3.0, 0.5, 2.0];
    let config = DmdConfig {
        rank: 4,
        dt: 0.05,
        tol: 0.0,
        weight: StateWeight::Diagonal(w.clone()),
        ..Default::default()
    };
    let result = dmd(&x, &config).unwrap();
    for i in 0..4 {
        for j in 0..4 {
            let mut p = c64::new(0.0, 0.0);
            for (s, ws) in w.iter().enumerate() {
                p += result.adjoint_modes[(s, i)].conj() * result.modes[(s, j)] * *ws;
            }
            let expected = if i == j { 1.0 } else { 0.0 };
            assert_abs_diff_eq!(p.re, expected, epsilon = 1e-8);
            assert_abs_diff_eq!(p.im, 0.0, epsilon = 1e-8);
        }
    }
}

#[test]
fn rank_is_clamped_to_data() {
    let x = two_oscillators(30, 0.1);
    let config = DmdConfig {
        rank: 40,
        dt: 0.1,
        ..Default::default()
    };
    let result = dmd(&x, &config).unwrap();
    assert_eq!(result.rank_requested, 40);
    assert_eq!(result.rank, 4);

    let strict = DmdConfig {
        strictness: Strictness::Strict,
        ..config
    };
    match dmd(&x, &strict) {
        Err(ModalError::RankUnavailable {
            requested,
            available,
        }) => {
            assert_eq!(requested, 40);
            assert_eq!(available, 4);
        }
        other => panic!("expected RankUnavailable, got {other:?}"),
    }
}

#[test]
fn amplitude_tolerance_bounds() {
    let x = two_oscillators(120, 0.05);
    let keep_all = DmdConfig {
        rank: 4,
        dt: 0.05,
        tol: 0.0,
        ..Default::default()
    };
    assert_eq!(dmd(&x, &keep_all).unwrap().n_modes(), 4);

    let keep_one = DmdConfig {
        tol: 1.0,
        ..keep_all
    };
    let result = dmd(&x, &keep_one).unwrap();
    assert_eq!(result.n_modes(), 1);
    assert_eq!(result.rank, 4);
    assert_eq!(result.modes.ncols(), 1);
}

#[test]
fn fbdmd_time_reversal_conjugates() {
    let dt = 0.05;
    let x = two_oscillators(150, dt);
    let n = x.ncols();
    let reversed = Mat::from_fn(4, n, |i, k| x[(i, n - 1 - k)]);
    let config = DmdConfig {
        rank: 4,
        dt,
        tol: 0.0,
        method: DmdMethod::ForwardBackward,
        ..Default::default()
    };
    let fwd = dmd(&x, &config).unwrap();
    let bwd = dmd(&reversed, &config).unwrap();

    for rho in &fwd.discrete_eigenvalues {
        assert_abs_diff_eq!(rho.norm(), 1.0, epsilon = 1e-8);
        // Reversed time runs each oscillator backwards: ρ → ρ⁻¹ = ρ̄.
        let closest = bwd
            .discrete_eigenvalues
            .iter()
            .map(|mu| (*mu - rho.conj()).norm())
            .fold(f64::INFINITY, f64::min);
        assert!(closest < 1e-8);
    }
    // Amplitudes differ, but the frequency content is identical.
    let mut f_fwd: Vec<f64> = fwd.eigenvalues.iter().map(|l| l.im).collect();
    let mut f_bwd: Vec<f64> = bwd.eigenvalues.iter().map(|l| -l.im).collect();
    f_fwd.sort_by(f64::total_cmp);
    f_bwd.sort_by(f64::total_cmp);
    for (a, b) in f_fwd.iter().zip(&f_bwd) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-8);
    }
}

#[test]
fn gain_grid_is_ordered() {
    let x = rotation_scaling(60);
    let result = dmd(
        &x,
        &DmdConfig {
            rank: 2,
            tol: 0.0,
            ..Default::default()
        },
    )
    .unwrap();
    let analyzer = ResolventAnalyzer::from_dmd(&result, &StateWeight::Identity).unwrap();
    let sweep = FrequencySweep {
        omega_min: 0.1,
        omega_max: 3.0,
        n_points: 40,
    };
    let gain = analyzer.sweep(&sweep).unwrap();
    assert_eq!(gain.omega, sweep.grid().unwrap());
    assert!(gain.omega.windows(2).all(|w| w[0] < w[1]));
    assert!(gain.is_complete());
    let sigma = gain.sigma_matrix().unwrap();
    assert_eq!((sigma.nrows(), sigma.ncols()), (40, 2));
    // |Im λ| = π/4: the gain peaks near ω = π/4.
    let (_, peak) = gain.peak().unwrap();
    assert!((peak - FRAC_PI_4).abs() < 0.1);
}

#[test]
fn wake_dmd_resolvent_pipeline() {
    let snaps = synthetic_wake();
    let config = AnalysisConfig {
        dmd: DmdConfig {
            rank: 4,
            dt: 0.02,
            ..Default::default()
        },
        sweep: FrequencySweep {
            omega_min: 1.0,
            omega_max: 15.0,
            n_points: 57,
        },
        ..Default::default()
    };
    let report = run_dmd_resolvent(&snaps, &config).unwrap();

    assert_eq!(report.means.len(), 2);
    assert_abs_diff_eq!(report.means[0][[2, 3]], 1.0, epsilon = 1e-10);
    assert_abs_diff_eq!(report.means[1][[2, 3]], 0.0, epsilon = 1e-10);

    assert_eq!(report.dmd.n_modes(), 4);
    let mut omegas: Vec<f64> = report.dmd.eigenvalues.iter().map(|l| l.im.abs()).collect();
    omegas.sort_by(f64::total_cmp);
    assert_abs_diff_eq!(omegas[0], 2.0 * PI, epsilon = 1e-6);
    assert_abs_diff_eq!(omegas[3], 4.0 * PI, epsilon = 1e-6);

    assert!(report.is_complete());
    let optimal = report.optimal.as_ref().unwrap();
    let (forcing, response) = optimal.fields(&report.layout).unwrap();
    assert_eq!(forcing.dim(), (2, 6, 5, 4));
    assert_eq!(response.dim(), (2, 6, 5, 4));

    let modes = report.layout.unflatten(&report.dmd.modes).unwrap();
    assert_eq!(modes.dim(), (2, 6, 5, 4));
}

#[test]
fn wake_spod_pipeline() {
    let snaps = synthetic_wake();
    let config = SpodConfig {
        dt: 0.02,
        ..Default::default()
    };
    let spectrum = run_spod(&snaps, &config, &WelchSpod).unwrap();
    // nt/4 = 50 samples per block, 25 overlapping: 7 blocks, 1 Hz bins.
    assert_eq!(spectrum.n_blocks, 7);
    assert_eq!(spectrum.n_freq(), 26);
    assert_abs_diff_eq!(spectrum.freq[1], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(spectrum.omega[2], 4.0 * PI, epsilon = 1e-12);

    let lead = spectrum.leading_energy();
    let peak = (0..lead.len())
        .max_by(|&a, &b| lead[a].total_cmp(&lead[b]))
        .unwrap();
    assert!(peak == 1 || peak == 2);
    assert!(lead[10] < 1e-3 * lead[peak]);
}

#[test]
fn wake_spod_mode_fields() {
    let snaps = synthetic_wake();
    let config = SpodConfig {
        dt: 0.02,
        save_modes: true,
        ..Default::default()
    };
    let spectrum = run_spod(&snaps, &config, &WelchSpod).unwrap();
    let layout = snaps.layout();
    let fields = spectrum.mode_fields(1, &layout).unwrap();
    assert_eq!(fields.dim(), (2, 6, 5, 7));
    // Leading mode at 1 Hz is a unit vector over both quantities.
    let norm: f64 = fields
        .index_axis(Axis(3), 0)
        .iter()
        .map(|z| z.norm_sqr())
        .sum();
    assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-10);
    assert!(spectrum.mode_fields(26, &layout).is_err());

    let plain = SpodConfig {
        dt: 0.02,
        ..Default::default()
    };
    let unsaved = run_spod(&snaps, &plain, &WelchSpod).unwrap();
    assert!(unsaved.mode_fields(1, &layout).is_err());
}

#[test]
fn pipeline_errors_carry_stage() {
    let u = Array3::<f64>::from_shape_fn((2, 2, 6), |(i, j, t)| (i + j + t) as f64);
    let snaps = FlowSnapshots::new(vec![("u", u)]).unwrap();
    let err = run_spod(&snaps, &SpodConfig::default(), &WelchSpod).unwrap_err();
    assert_eq!(err.stage, Stage::Spod);
    assert!(err.to_string().starts_with("SPOD failed"));

    let bad = AnalysisConfig {
        sweep: FrequencySweep {
            omega_min: 5.0,
            omega_max: 1.0,
            n_points: 10,
        },
        ..Default::default()
    };
    let err = run_dmd_resolvent(&snaps, &bad).unwrap_err();
    assert_eq!(err.stage, Stage::Validate);
}

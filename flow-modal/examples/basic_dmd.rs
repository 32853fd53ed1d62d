//! DMD, resolvent and SPOD analysis of a synthetic cylinder-like wake.
//!
//! Run with `RUST_LOG=debug` to see the stage log.

use std::f64::consts::PI;

use flow_modal::{
    mode_spectrum, run_dmd_resolvent, run_spod, AnalysisConfig, DmdConfig, FlowSnapshots,
    FrequencySweep, SpodConfig, WelchSpod,
};
use ndarray::Array3;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // Shedding at St-like 1 Hz with its first harmonic, convected downstream
    let (nx, ny, nt) = (40, 20, 400);
    let dt = 0.01;
    let wave = |amp: f64, f: f64, kx: f64, i: usize, j: usize, t: usize| {
        let y = (j as f64 - ny as f64 / 2.0) / 4.0;
        let phase = kx * i as f64 - 2.0 * PI * f * t as f64 * dt;
        amp * phase.cos() * (-y * y).exp()
    };
    let u = Array3::from_shape_fn((nx, ny, nt), |(i, j, t)| {
        1.0 + wave(0.2, 1.0, 0.3, i, j, t) + wave(0.05, 2.0, 0.6, i, j, t)
    });
    let v = Array3::from_shape_fn((nx, ny, nt), |(i, j, t)| {
        wave(0.3, 1.0, 0.3, i + 2, j, t)
    });
    let p = Array3::from_shape_fn((nx, ny, nt), |(i, j, t)| {
        -0.5 * wave(0.2, 1.0, 0.3, i, j, t)
    });
    let snaps = FlowSnapshots::new(vec![("u", u), ("v", v), ("p", p)])?;

    let config = AnalysisConfig {
        dmd: DmdConfig {
            rank: 8,
            dt,
            ..Default::default()
        },
        sweep: FrequencySweep {
            omega_min: 1.0,
            omega_max: 20.0,
            n_points: 400,
        },
        spod: SpodConfig {
            dt,
            ..Default::default()
        },
    };

    let report = run_dmd_resolvent(&snaps, &config)?;
    println!("DMD Decomposition");
    println!(
        "  Rank: {} (requested {}), kept {} modes",
        report.dmd.rank,
        report.dmd.rank_requested,
        report.dmd.n_modes()
    );
    println!("\nEigenvalue Spectrum:");
    for m in mode_spectrum(&report.dmd) {
        println!(
            "  Mode {}: λ = {:+.4}{:+.4}i, f = {:+.4} Hz, |b| = {:.3e}, {}",
            m.index, m.growth_rate, m.angular_frequency, m.frequency, m.amplitude, m.stability
        );
    }

    if let Some((k, omega)) = report.gain.peak() {
        let gain = report.gain.optimal_gain()[k].unwrap_or(f64::NAN);
        println!("\nResolvent peak: ω = {omega:.3}, σ₁² = {gain:.3e}");
    }
    if !report.is_complete() {
        println!("  ({} sweep points missing)", report.gain.missing().len());
    }

    let spectrum = run_spod(&snaps, &config.spod, &WelchSpod)?;
    println!("\nSPOD ({} blocks):", spectrum.n_blocks);
    for (k, e) in spectrum.leading_energy().iter().enumerate().take(6) {
        println!("  f = {:.2} Hz  L₁ = {:.4e}", spectrum.freq[k], e);
    }

    Ok(())
}

//! Numerical stiffness probe: eigenvalues of the Jacobian at one state.
//!
//! `analyzer` only looks at the text. This module looks at the actual vector
//! field, so callers can refine the estimate once parameters and a state are
//! known.

use crate::analyzer::Stiffness;
use crate::autodiff::{self, Dual};
use crate::traits::DynamicalSystem;
use anyhow::{bail, Context, Result};
use nalgebra::DMatrix;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Stiffness ratios at or above this are `Stiff`.
pub const STIFF_RATIO: f64 = 1e3;
/// Stiffness ratios at or above this are `ModeratelyStiff`.
pub const MODERATE_RATIO: f64 = 1e1;

/// Real parts below this magnitude count as purely oscillatory modes.
const NEGLIGIBLE_REAL_PART: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StiffnessReport {
    pub jacobian: Vec<f64>,
    pub eigenvalues: Vec<Complex64>,
    /// `max |Re λ| / min |Re λ|` over modes with a non-negligible real part.
    pub ratio: f64,
    pub stiffness: Stiffness,
}

pub fn classify_ratio(ratio: f64) -> Stiffness {
    if !ratio.is_finite() {
        Stiffness::Unknown
    } else if ratio >= STIFF_RATIO {
        Stiffness::Stiff
    } else if ratio >= MODERATE_RATIO {
        Stiffness::ModeratelyStiff
    } else {
        Stiffness::NonStiff
    }
}

pub fn probe<S>(system: &S, t: f64, state: &[f64]) -> Result<StiffnessReport>
where
    S: DynamicalSystem<Dual>,
{
    let dim = system.dimension();
    if dim == 0 {
        bail!("System has zero dimension.");
    }
    if state.len() != dim {
        bail!(
            "State dimension mismatch. Expected {}, got {}.",
            dim,
            state.len()
        );
    }

    let jacobian = autodiff::jacobian(system, t, state)
        .with_context(|| format!("Failed to evaluate the Jacobian at t = {t}."))?;
    if jacobian.iter().any(|v| !v.is_finite()) {
        bail!("Jacobian has non-finite entries at t = {t}.");
    }

    let matrix = DMatrix::from_row_slice(dim, dim, &jacobian);
    let eigenvalues: Vec<Complex64> = matrix.complex_eigenvalues().iter().copied().collect();
    let ratio = stiffness_ratio(&eigenvalues);
    let stiffness = classify_ratio(ratio);
    debug!(ratio, %stiffness, "stiffness probe");

    Ok(StiffnessReport {
        jacobian,
        eigenvalues,
        ratio,
        stiffness,
    })
}

fn stiffness_ratio(eigenvalues: &[Complex64]) -> f64 {
    let magnitudes = eigenvalues
        .iter()
        .map(|lambda| lambda.re.abs())
        .filter(|re| *re > NEGLIGIBLE_REAL_PART);
    let (min, max) = magnitudes.fold((f64::INFINITY, 0.0_f64), |(min, max), re| {
        (min.min(re), max.max(re))
    });
    if max == 0.0 {
        1.0
    } else {
        max / min
    }
}

//! Survival processes and the catch-equation mortality inversion.

use crate::abundance::StructuredAbundance;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// How natural mortality thins a structured abundance each year.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "rate")]
pub enum MortalitySchedule {
    /// A fixed proportion dies: survival is `1 - rate`.
    Proportional(f64),
    /// Instantaneous rate: survival is `e^(-rate)`.
    Instantaneous(f64),
}

impl MortalitySchedule {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Proportional(rate) => {
                if !(0.0..=1.0).contains(&rate) {
                    bail!("proportional mortality must be in [0, 1], but is {rate}");
                }
            }
            Self::Instantaneous(rate) => {
                if rate < 0.0 {
                    bail!("instantaneous mortality must be non-negative, but is {rate}");
                }
            }
        }
        Ok(())
    }

    pub fn survival(&self) -> f64 {
        match *self {
            Self::Proportional(rate) => 1.0 - rate,
            Self::Instantaneous(rate) => (-rate).exp(),
        }
    }

    /// Thin every bin of every subdivision by the survival fraction.
    pub fn apply(&self, abundance: &mut StructuredAbundance) {
        let survival = self.survival();
        for subdivision in 0..abundance.n_subdivisions() {
            for count in abundance.subdivision_mut(subdivision) {
                *count *= survival;
            }
        }
    }
}

/// Instantaneous fishing mortality from catches and vulnerable abundance.
///
/// The standard catch-equation inversion `-ln(1 - C/V)`. Returns 0 when
/// nothing was caught, infinity when the whole vulnerable stock was removed,
/// and NaN when the vulnerable abundance is zero or the inputs are not
/// finite (no observation yet).
pub fn fishing_mortality_rate(catches: f64, vulnerable: f64) -> f64 {
    if !catches.is_finite() || !vulnerable.is_finite() || vulnerable <= 0.0 {
        return f64::NAN;
    }
    let ratio = catches / vulnerable;
    if ratio == 0.0 {
        0.0
    } else if ratio >= 1.0 {
        f64::INFINITY
    } else {
        -(1.0 - ratio).ln()
    }
}

use crate::barrier::optimizer::SolverOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read or write settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse TOML settings: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize settings to TOML format: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Shape of the per-coordinate grids.
///
/// Each grid spans `observed ± half_width_sds · sd` where `sd` is the square
/// root of the matching diagonal entry of the inverse information. The number
/// of points is chosen so that a window of `± span_sds` standard errors of the
/// widest coordinate is resolved at `resolution`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    pub half_width_sds: f64,
    pub span_sds: f64,
    pub resolution: f64,
    pub min_points: usize,
    pub max_points: usize,
    /// Size of the finer support the log reference is interpolated onto
    /// before building the exponential family. Zero keeps the evaluation grid.
    pub family_points: usize,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            half_width_sds: 4.5,
            span_sds: 4.0,
            resolution: 0.1,
            min_points: 90,
            max_points: 10_000,
            family_points: 1000,
        }
    }
}

impl GridSettings {
    /// Number of grid points shared by all coordinates. Always even, so a
    /// grid centered on the observed value never contains it.
    pub fn num_points(&self, max_sd: f64) -> usize {
        let wanted = (2.0 * self.span_sds * max_sd / self.resolution).ceil();
        let mut count = if wanted.is_finite() && wanted > self.min_points as f64 {
            wanted as usize
        } else {
            self.min_points
        };
        if count > self.max_points {
            log::warn!(
                "Grid would need {} points per coordinate; capping at {}.",
                count,
                self.max_points
            );
            count = self.max_points;
        }
        if count % 2 == 1 {
            count = if count < self.max_points { count + 1 } else { count - 1 };
        }
        count
    }
}

/// Everything tunable about an inference run. Unknown sections are
/// rejected rather than silently ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceSettings {
    pub grid: GridSettings,
    /// Newton controls for the polyhedral barrier solved at every grid point.
    pub affine: SolverOptions,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            grid: GridSettings::default(),
            affine: SolverOptions::affine_default(),
        }
    }
}

impl InferenceSettings {
    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a TOML file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Saves the settings in a human-readable TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let grid = &self.grid;
        positive("grid.half_width_sds", grid.half_width_sds)?;
        positive("grid.span_sds", grid.span_sds)?;
        positive("grid.resolution", grid.resolution)?;
        if grid.min_points < 2 {
            return Err(SettingsError::Invalid {
                field: "grid.min_points",
                reason: format!("at least 2 points are needed, got {}", grid.min_points),
            });
        }
        if grid.max_points < grid.min_points {
            return Err(SettingsError::Invalid {
                field: "grid.max_points",
                reason: format!(
                    "{} is below grid.min_points ({})",
                    grid.max_points, grid.min_points
                ),
            });
        }
        if grid.family_points == 1 {
            return Err(SettingsError::Invalid {
                field: "grid.family_points",
                reason: "use 0 to keep the evaluation grid or at least 2 points".to_string(),
            });
        }
        check_solver(
            &self.affine,
            [
                "affine.max_iterations",
                "affine.tolerance",
                "affine.initial_step",
            ],
        )?;
        Ok(())
    }
}

fn check_solver(options: &SolverOptions, fields: [&'static str; 3]) -> Result<(), SettingsError> {
    if options.max_iterations == 0 {
        return Err(SettingsError::Invalid {
            field: fields[0],
            reason: "must be at least 1".to_string(),
        });
    }
    positive(fields[1], options.tolerance)?;
    positive(fields[2], options.initial_step)
}

fn positive(field: &'static str, value: f64) -> Result<(), SettingsError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(SettingsError::Invalid {
            field,
            reason: format!("must be a positive finite number, got {value}"),
        })
    }
}

//! Simulation parameters.
//!
//! One immutable [`SimConfig`] is handed to every stage of the pipeline.
//! Changing a value at runtime means building a new config and passing it to
//! [`SphSolver::reconfigure`](crate::sph::solver::SphSolver::reconfigure).

use glam::{UVec2, Vec2};

use crate::error::ConfigError;

/// Largest grid resolution accepted per axis. At this size the cell index
/// table (two `u32` per key) takes 128 MiB.
pub const MAX_GRID_AXIS: u32 = 4096;

/// How a cell coordinate is turned into a sort key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum KeyEncoding {
    /// Bit-interleaved coordinates; neighbouring cells land close together
    /// in the sorted order.
    #[default]
    Morton,
    /// `y * resolution.x + x`.
    RowMajor,
}

/// Time integration scheme used by [`SphSolver::step`](crate::sph::solver::SphSolver::step).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum IntegrationMethod {
    /// Classic 4-stage Runge-Kutta.
    #[default]
    Rk4,
    /// 2-stage midpoint method.
    Rk2,
    /// Kick-drift-kick velocity Verlet, 2 force evaluations.
    VelocityVerlet,
    /// Heun predictor-corrector, 2 force evaluations.
    PredictorCorrector,
}

impl IntegrationMethod {
    /// Force evaluations per step.
    pub fn stages(self) -> usize {
        match self {
            IntegrationMethod::Rk4 => 4,
            IntegrationMethod::Rk2
            | IntegrationMethod::VelocityVerlet
            | IntegrationMethod::PredictorCorrector => 2,
        }
    }
}

/// When the spatial structure is rebuilt inside a multi-stage step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum NeighborPolicy {
    /// Hash, sort and rebuild the cell table before every force evaluation.
    #[default]
    RebuildEachStage,
    /// Build once from the start-of-step positions and reuse the ordering
    /// for the later stages. Cheaper; neighbour lists go slightly stale.
    ReuseStepStructure,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SimConfig {
    /// Kernel support radius h.
    pub kernel_radius: f32,
    /// Grid cell edge. Must be at least `kernel_radius`.
    pub cell_size: f32,
    pub stiffness: f32,
    /// Stiffness of the short-range near-pressure term (0 disables it).
    pub near_stiffness: f32,
    pub rest_density: f32,
    pub particle_mass: f32,
    pub viscosity: f32,
    pub gravity: Vec2,
    pub time_step: f32,
    pub domain_min: Vec2,
    pub domain_max: Vec2,
    /// Particles beyond this count in one cell are left out of neighbour
    /// queries.
    pub max_particles_per_cell: u32,
    /// Collision radius used when clamping against the domain walls.
    pub particle_radius: f32,
    /// Fraction of normal velocity kept after a wall hit.
    pub boundary_restitution: f32,
    pub key_encoding: KeyEncoding,
    pub sort_block_size: usize,
    pub radix_digit_bits: u32,
    pub integration: IntegrationMethod,
    pub neighbor_policy: NeighborPolicy,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            kernel_radius: 0.02,
            cell_size: 0.02,
            stiffness: 200.0,
            near_stiffness: 50.0,
            rest_density: 1000.0,
            particle_mass: 0.1,
            viscosity: 0.2,
            gravity: Vec2::new(0.0, -9.81),
            time_step: 5e-5,
            domain_min: Vec2::new(-0.5, -0.5),
            domain_max: Vec2::new(0.5, 0.5),
            max_particles_per_cell: 200,
            particle_radius: 0.0025,
            boundary_restitution: 0.5,
            key_encoding: KeyEncoding::Morton,
            sort_block_size: 256,
            radix_digit_bits: 4,
            integration: IntegrationMethod::Rk4,
            neighbor_policy: NeighborPolicy::RebuildEachStage,
        }
    }
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { field, value })
    }
}

fn finite(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NonFinite { field })
    }
}

impl SimConfig {
    /// Config whose cell size tracks the kernel radius.
    pub fn with_kernel_radius(kernel_radius: f32) -> Self {
        Self {
            kernel_radius,
            cell_size: kernel_radius,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("kernel_radius", self.kernel_radius)?;
        positive("cell_size", self.cell_size)?;
        positive("time_step", self.time_step)?;
        positive("rest_density", self.rest_density)?;
        positive("particle_mass", self.particle_mass)?;

        if self.cell_size < self.kernel_radius {
            return Err(ConfigError::CellSmallerThanKernel {
                cell_size: self.cell_size,
                kernel_radius: self.kernel_radius,
            });
        }

        let extent = self.domain_max - self.domain_min;
        if !(extent.x > 0.0 && extent.y > 0.0) || !extent.is_finite() {
            return Err(ConfigError::EmptyDomain);
        }

        // walls inset by the radius must not cross each other
        let max_radius = 0.5 * extent.min_element();
        if !(self.particle_radius >= 0.0 && self.particle_radius < max_radius) {
            return Err(ConfigError::InvalidParticleRadius {
                radius: self.particle_radius,
                max: max_radius,
            });
        }
        if !(0.0..=1.0).contains(&self.boundary_restitution) {
            return Err(ConfigError::InvalidRestitution(self.boundary_restitution));
        }

        if !self.gravity.is_finite() {
            return Err(ConfigError::NonFinite { field: "gravity" });
        }
        finite("stiffness", self.stiffness)?;
        finite("near_stiffness", self.near_stiffness)?;
        finite("viscosity", self.viscosity)?;
        if self.viscosity < 0.0 {
            return Err(ConfigError::Negative {
                field: "viscosity",
                value: self.viscosity,
            });
        }

        let res = self.grid_resolution();
        if res.x > MAX_GRID_AXIS || res.y > MAX_GRID_AXIS {
            return Err(ConfigError::GridTooLarge {
                resolution: res.to_array(),
                max_axis: MAX_GRID_AXIS,
            });
        }

        if self.sort_block_size == 0 {
            return Err(ConfigError::InvalidSortBlockSize(self.sort_block_size));
        }
        if !(1..=8).contains(&self.radix_digit_bits) {
            return Err(ConfigError::InvalidDigitBits(self.radix_digit_bits));
        }
        if self.max_particles_per_cell == 0 {
            return Err(ConfigError::ZeroCellCapacity);
        }
        Ok(())
    }

    /// `ceil((domain_max - domain_min) / cell_size)`, at least one cell per axis.
    pub fn grid_resolution(&self) -> UVec2 {
        let cells = ((self.domain_max - self.domain_min) / self.cell_size).ceil();
        // saturating float->int cast keeps absurd domains detectable
        UVec2::new(cells.x.max(1.0) as u32, cells.y.max(1.0) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(SimConfig::default().validate(), Ok(()));
        assert_eq!(SimConfig::default().grid_resolution(), UVec2::new(50, 50));
    }

    #[test]
    fn rejects_non_positive_cell_size() {
        let cfg = SimConfig {
            cell_size: 0.0,
            ..SimConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NonPositive {
                field: "cell_size",
                ..
            })
        ));

        let cfg = SimConfig {
            cell_size: -1.0,
            ..SimConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_cell_smaller_than_kernel() {
        let cfg = SimConfig {
            kernel_radius: 0.04,
            cell_size: 0.02,
            ..SimConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::CellSmallerThanKernel { .. })
        ));
    }

    #[test]
    fn rejects_inverted_domain_and_huge_grid() {
        let cfg = SimConfig {
            domain_min: Vec2::new(1.0, 0.0),
            domain_max: Vec2::new(0.0, 1.0),
            ..SimConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyDomain));

        let cfg = SimConfig {
            domain_min: Vec2::splat(-1000.0),
            domain_max: Vec2::splat(1000.0),
            ..SimConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::GridTooLarge { .. })));
    }

    #[test]
    fn rejects_bad_sort_parameters() {
        let cfg = SimConfig {
            radix_digit_bits: 9,
            ..SimConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidDigitBits(9)));

        let cfg = SimConfig {
            sort_block_size: 0,
            ..SimConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidSortBlockSize(0)));
    }

    #[test]
    fn rejects_walls_that_leave_the_domain() {
        let unit = SimConfig {
            domain_min: Vec2::ZERO,
            domain_max: Vec2::ONE,
            ..SimConfig::default()
        };
        for radius in [-0.5, 0.5, 2.0, f32::NAN, f32::INFINITY] {
            let cfg = SimConfig {
                particle_radius: radius,
                ..unit.clone()
            };
            assert!(
                matches!(cfg.validate(), Err(ConfigError::InvalidParticleRadius { .. })),
                "radius {radius}"
            );
        }
        let cfg = SimConfig {
            particle_radius: 0.0,
            ..unit.clone()
        };
        assert_eq!(cfg.validate(), Ok(()));

        for restitution in [3.0, -0.1, f32::NAN] {
            let cfg = SimConfig {
                boundary_restitution: restitution,
                ..unit.clone()
            };
            assert!(matches!(
                cfg.validate(),
                Err(ConfigError::InvalidRestitution(_))
            ));
        }
    }

    #[test]
    fn rejects_non_finite_physics() {
        let cfg = SimConfig {
            gravity: Vec2::NAN,
            ..SimConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NonFinite { field: "gravity" })
        );

        let cfg = SimConfig {
            stiffness: f32::INFINITY,
            ..SimConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NonFinite { field: "stiffness" })
        );

        let cfg = SimConfig {
            near_stiffness: f32::NAN,
            ..SimConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::NonFinite {
                field: "near_stiffness"
            })
        );

        let cfg = SimConfig {
            viscosity: -0.2,
            ..SimConfig::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::Negative {
                field: "viscosity",
                value: -0.2
            })
        );
    }
}

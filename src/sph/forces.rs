//! Density and force passes.
//!
//! One evaluation is three barrier-separated passes over the particles:
//! gather into sorted order, density + pressure, forces. All per-particle
//! scratch lives in sorted order so that a cell's neighbours are contiguous;
//! only the final accelerations are gathered back into particle-id order.

use bevy::log::info_span;
use glam::Vec2;
use rayon::prelude::*;

use crate::config::SimConfig;
use crate::grid::neighbors::SpatialIndex;
use crate::sph::kernels::Kernels;

/// The physical constants the passes need, lifted out of [`SimConfig`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ForceParams {
    pub kernels: Kernels,
    pub mass: f32,
    pub stiffness: f32,
    pub near_stiffness: f32,
    pub rest_density: f32,
    pub viscosity: f32,
    pub gravity: Vec2,
}

impl ForceParams {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            kernels: Kernels::new(config.kernel_radius),
            mass: config.particle_mass,
            stiffness: config.stiffness,
            near_stiffness: config.near_stiffness,
            rest_density: config.rest_density,
            viscosity: config.viscosity,
            gravity: config.gravity,
        }
    }
}

/// Per-stage scalar fields, indexed by sorted slot.
#[derive(Default, Clone, Debug)]
pub struct FluidFields {
    pub positions: Vec<Vec2>,
    pub velocities: Vec<Vec2>,
    pub density: Vec<f32>,
    pub pressure: Vec<f32>,
    pub near_density: Vec<f32>,
    pub near_pressure: Vec<f32>,
    pub accel: Vec<Vec2>,
}

impl FluidFields {
    fn resize(&mut self, n: usize) {
        self.positions.resize(n, Vec2::ZERO);
        self.velocities.resize(n, Vec2::ZERO);
        self.density.resize(n, 0.0);
        self.pressure.resize(n, 0.0);
        self.near_density.resize(n, 0.0);
        self.near_pressure.resize(n, 0.0);
        self.accel.resize(n, Vec2::ZERO);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

pub struct ForceAccumulator {
    params: ForceParams,
    fields: FluidFields,
}

impl ForceAccumulator {
    pub fn new(params: ForceParams) -> Self {
        Self {
            params,
            fields: FluidFields::default(),
        }
    }

    pub fn set_params(&mut self, params: ForceParams) {
        self.params = params;
    }

    /// Fields of the most recent evaluation, in sorted order.
    pub fn fields(&self) -> &FluidFields {
        &self.fields
    }

    /// Accelerations of every particle at the given state, written to
    /// `accel` in particle-id order.
    ///
    /// `index` only needs to be sorted for *some* recent positions: with a
    /// stale index the neighbour lists are approximate but every pair the
    /// stencil visits is still evaluated at the current positions.
    pub fn evaluate(
        &mut self,
        index: &SpatialIndex,
        positions: &[Vec2],
        velocities: &[Vec2],
        accel: &mut [Vec2],
    ) {
        let n = positions.len();
        debug_assert_eq!(index.len(), n);
        self.fields.resize(n);

        self.gather(index, positions, velocities);
        self.density_pass(index);
        self.force_pass(index);

        let _span = info_span!("scatter_accel").entered();
        let sorted_accel = &self.fields.accel;
        accel
            .par_iter_mut()
            .enumerate()
            .for_each(|(id, a)| *a = sorted_accel[index.slot_of(id)]);
    }

    /// Density and pressure at the given state without the force pass.
    /// `accel` in [`fields`](Self::fields) keeps the previous evaluation's
    /// values.
    pub fn evaluate_density(
        &mut self,
        index: &SpatialIndex,
        positions: &[Vec2],
        velocities: &[Vec2],
    ) {
        debug_assert_eq!(index.len(), positions.len());
        self.fields.resize(positions.len());
        self.gather(index, positions, velocities);
        self.density_pass(index);
    }

    fn gather(&mut self, index: &SpatialIndex, positions: &[Vec2], velocities: &[Vec2]) {
        let _span = info_span!("gather_sorted").entered();
        self.fields
            .positions
            .par_iter_mut()
            .zip(self.fields.velocities.par_iter_mut())
            .enumerate()
            .for_each(|(slot, (p, v))| {
                let id = index.id_at(slot);
                *p = positions[id];
                *v = velocities[id];
            });
    }

    fn density_pass(&mut self, index: &SpatialIndex) {
        let _span = info_span!("density_pass").entered();
        let ForceParams {
            kernels,
            mass,
            stiffness,
            near_stiffness,
            rest_density,
            ..
        } = self.params;
        let positions = &self.fields.positions;
        let self_density = mass * kernels.density(0.0);

        self.fields
            .density
            .par_iter_mut()
            .zip(self.fields.near_density.par_iter_mut())
            .enumerate()
            .for_each(|(slot, (rho, near))| {
                let pos_i = positions[slot];
                let mut sum = 0.0;
                let mut near_sum = 0.0;
                index.for_each_candidate(pos_i, |other| {
                    if other == slot {
                        return;
                    }
                    let r2 = (pos_i - positions[other]).length_squared();
                    sum += kernels.density(r2);
                    near_sum += kernels.near_density(r2.sqrt());
                });
                // self term added explicitly: a particle past its cell's cap
                // is invisible to its own stencil walk
                *rho = self_density + mass * sum;
                *near = mass * near_sum;
            });

        let density = &self.fields.density;
        let near_density = &self.fields.near_density;
        self.fields
            .pressure
            .par_iter_mut()
            .zip(self.fields.near_pressure.par_iter_mut())
            .enumerate()
            .for_each(|(slot, (p, near_p))| {
                *p = stiffness * (density[slot] - rest_density);
                *near_p = near_stiffness * near_density[slot];
            });
    }

    fn force_pass(&mut self, index: &SpatialIndex) {
        let _span = info_span!("force_pass").entered();
        let ForceParams {
            kernels,
            mass,
            viscosity,
            gravity,
            ..
        } = self.params;
        let h = kernels.h;
        let FluidFields {
            positions,
            velocities,
            density,
            pressure,
            near_pressure,
            accel,
            ..
        } = &mut self.fields;
        let (positions, velocities) = (&*positions, &*velocities);
        let (density, pressure, near_pressure) = (&*density, &*pressure, &*near_pressure);

        accel.par_iter_mut().enumerate().for_each(|(slot, a)| {
            let pos_i = positions[slot];
            let vel_i = velocities[slot];
            let p_i = pressure[slot];
            let pn_i = near_pressure[slot];

            let mut force = Vec2::ZERO;
            index.for_each_candidate(pos_i, |other| {
                if other == slot {
                    return;
                }
                let vec = pos_i - positions[other];
                let r = vec.length();
                if r >= h {
                    return;
                }
                let inv_rho_j = 1.0 / density[other];

                // pressure and near-pressure, symmetrised
                force -= mass * (p_i + pressure[other]) * 0.5 * inv_rho_j
                    * kernels.pressure_gradient(vec, r);
                force -= mass * (pn_i + near_pressure[other]) * 0.5 * inv_rho_j
                    * kernels.near_pressure_gradient(vec, r);

                // viscosity
                force += viscosity * mass * (velocities[other] - vel_i) * inv_rho_j
                    * kernels.viscosity_laplacian(r);
            });

            *a = force / density[slot] + gravity;
        });
    }
}

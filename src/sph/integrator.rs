//! Fixed-step time integration.
//!
//! Every scheme is a short sequence of force evaluations at intermediate
//! states. Each evaluation is a full pipeline run (index rebuild unless the
//! policy says otherwise, density, forces) and the stage combinations are
//! parallel per particle. The new state is written into separate buffers
//! and swapped in at the end, so no pass ever reads what it is writing.

use bevy::log::info_span;
use glam::Vec2;
use rayon::prelude::*;

use crate::config::{IntegrationMethod, NeighborPolicy, SimConfig};
use crate::grid::neighbors::{IndexStats, SpatialIndex};
use crate::sph::forces::ForceAccumulator;
use crate::sph::state::ParticleState;

/// Domain walls the particles are clamped against after each step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Boundary {
    pub min: Vec2,
    pub max: Vec2,
    pub restitution: f32,
}

impl Boundary {
    pub fn from_config(config: &SimConfig) -> Self {
        Self {
            min: config.domain_min + Vec2::splat(config.particle_radius),
            max: config.domain_max - Vec2::splat(config.particle_radius),
            restitution: config.boundary_restitution,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepDiagnostics {
    /// Stats of the last index rebuild in the step.
    pub index: IndexStats,
    pub rebuilds: u32,
    pub evaluations: u32,
    pub wall_hits: usize,
}

#[derive(Default)]
struct StageBuffers {
    position_k: Vec<Vec2>,
    velocity_k: [Vec<Vec2>; 4],
    accel_k: [Vec<Vec2>; 4],
    next_positions: Vec<Vec2>,
    next_velocities: Vec<Vec2>,
}

impl StageBuffers {
    fn resize(&mut self, n: usize) {
        self.position_k.resize(n, Vec2::ZERO);
        for buf in self.velocity_k.iter_mut().chain(self.accel_k.iter_mut()) {
            buf.resize(n, Vec2::ZERO);
        }
        self.next_positions.resize(n, Vec2::ZERO);
        self.next_velocities.resize(n, Vec2::ZERO);
    }
}

pub struct Integrator {
    method: IntegrationMethod,
    policy: NeighborPolicy,
    dt: f32,
    boundary: Boundary,
    stages: StageBuffers,
}

/// `out[i] = base[i] + h * rate[i]`
fn advance(out: &mut [Vec2], base: &[Vec2], rate: &[Vec2], h: f32) {
    out.par_iter_mut()
        .zip(base.par_iter().zip(rate.par_iter()))
        .for_each(|(o, (&b, &r))| *o = b + h * r);
}

/// One force evaluation, rebuilding the index first when the policy asks
/// for it. The first stage rebuilds unless the caller's index is already
/// sorted for the start-of-step positions.
struct Evaluator<'a> {
    index: &'a mut SpatialIndex,
    forces: &'a mut ForceAccumulator,
    policy: NeighborPolicy,
    index_fresh: bool,
    diag: StepDiagnostics,
}

impl Evaluator<'_> {
    fn eval(&mut self, stage: usize, positions: &[Vec2], velocities: &[Vec2], accel: &mut [Vec2]) {
        let _span = info_span!("rk_stage", stage).entered();
        let rebuild = if stage == 0 {
            !self.index_fresh
        } else {
            self.policy == NeighborPolicy::RebuildEachStage
        };
        if rebuild {
            self.diag.index = self.index.rebuild(positions);
            self.diag.rebuilds += 1;
        }
        self.forces.evaluate(self.index, positions, velocities, accel);
        self.diag.evaluations += 1;
    }
}

impl Integrator {
    pub fn new(config: &SimConfig) -> Self {
        Self {
            method: config.integration,
            policy: config.neighbor_policy,
            dt: config.time_step,
            boundary: Boundary::from_config(config),
            stages: StageBuffers::default(),
        }
    }

    /// Advances `state` by one time step. Pass `index_fresh` when `index`
    /// was last rebuilt from `state.positions`.
    pub fn step(
        &mut self,
        state: &mut ParticleState,
        index: &mut SpatialIndex,
        forces: &mut ForceAccumulator,
        index_fresh: bool,
    ) -> StepDiagnostics {
        self.stages.resize(state.len());
        let mut eval = Evaluator {
            index,
            forces,
            policy: self.policy,
            index_fresh,
            diag: StepDiagnostics::default(),
        };

        match self.method {
            IntegrationMethod::Rk4 => self.rk4(state, &mut eval),
            IntegrationMethod::Rk2 => self.rk2(state, &mut eval),
            IntegrationMethod::VelocityVerlet => self.verlet(state, &mut eval),
            IntegrationMethod::PredictorCorrector => self.predictor_corrector(state, &mut eval),
        }

        std::mem::swap(&mut state.positions, &mut self.stages.next_positions);
        std::mem::swap(&mut state.velocities, &mut self.stages.next_velocities);

        let mut diag = eval.diag;
        diag.wall_hits = apply_boundaries(state, &self.boundary);
        diag
    }

    fn rk4(&mut self, state: &ParticleState, eval: &mut Evaluator<'_>) {
        let dt = self.dt;
        let (p, v) = (&state.positions, &state.velocities);
        let StageBuffers {
            position_k,
            velocity_k,
            accel_k,
            next_positions,
            next_velocities,
        } = &mut self.stages;
        let [vk1, vk2, vk3, vk4] = velocity_k;
        let [ak1, ak2, ak3, ak4] = accel_k;

        // k1 = f(p, v)
        vk1.copy_from_slice(v);
        eval.eval(0, p, vk1, ak1);

        // k2 at p + dt/2 v_k1, v + dt/2 a_k1
        advance(position_k, p, vk1, 0.5 * dt);
        advance(vk2, v, ak1, 0.5 * dt);
        eval.eval(1, position_k, vk2, ak2);

        // k3 at p + dt/2 v_k2, v + dt/2 a_k2
        advance(position_k, p, vk2, 0.5 * dt);
        advance(vk3, v, ak2, 0.5 * dt);
        eval.eval(2, position_k, vk3, ak3);

        // k4 at p + dt v_k3, v + dt a_k3
        advance(position_k, p, vk3, dt);
        advance(vk4, v, ak3, dt);
        eval.eval(3, position_k, vk4, ak4);

        let w = dt / 6.0;
        next_positions
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, out)| {
                *out = p[i] + w * (vk1[i] + 2.0 * vk2[i] + 2.0 * vk3[i] + vk4[i]);
            });
        next_velocities
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, out)| {
                *out = v[i] + w * (ak1[i] + 2.0 * ak2[i] + 2.0 * ak3[i] + ak4[i]);
            });
    }

    // midpoint
    fn rk2(&mut self, state: &ParticleState, eval: &mut Evaluator<'_>) {
        let dt = self.dt;
        let (p, v) = (&state.positions, &state.velocities);
        let StageBuffers {
            position_k,
            velocity_k,
            accel_k,
            next_positions,
            next_velocities,
        } = &mut self.stages;
        let [_, vmid, ..] = velocity_k;
        let [a1, a2, ..] = accel_k;

        eval.eval(0, p, v, a1);
        advance(position_k, p, v, 0.5 * dt);
        advance(vmid, v, a1, 0.5 * dt);
        eval.eval(1, position_k, vmid, a2);

        advance(next_positions, p, vmid, dt);
        advance(next_velocities, v, a2, dt);
    }

    fn verlet(&mut self, state: &ParticleState, eval: &mut Evaluator<'_>) {
        let dt = self.dt;
        let (p, v) = (&state.positions, &state.velocities);
        let StageBuffers {
            velocity_k,
            accel_k,
            next_positions,
            next_velocities,
            ..
        } = &mut self.stages;
        let [_, vhalf, ..] = velocity_k;
        let [a1, a2, ..] = accel_k;

        // kick, drift
        eval.eval(0, p, v, a1);
        advance(vhalf, v, a1, 0.5 * dt);
        advance(next_positions, p, vhalf, dt);

        // forces at the new positions with the half-step velocity, kick
        eval.eval(1, next_positions, vhalf, a2);
        advance(next_velocities, vhalf, a2, 0.5 * dt);
    }

    fn predictor_corrector(&mut self, state: &ParticleState, eval: &mut Evaluator<'_>) {
        let dt = self.dt;
        let (p, v) = (&state.positions, &state.velocities);
        let StageBuffers {
            position_k,
            velocity_k,
            accel_k,
            next_positions,
            next_velocities,
        } = &mut self.stages;
        let [_, vpred, ..] = velocity_k;
        let [a1, a2, ..] = accel_k;

        // predict
        eval.eval(0, p, v, a1);
        advance(position_k, p, v, dt);
        advance(vpred, v, a1, dt);
        eval.eval(1, position_k, vpred, a2);

        // correct with trapezoidal averages
        let half = 0.5 * dt;
        let (vpred, a1, a2) = (&*vpred, &*a1, &*a2);
        next_positions
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, out)| *out = p[i] + half * (v[i] + vpred[i]));
        next_velocities
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, out)| *out = v[i] + half * (a1[i] + a2[i]));
    }
}

/// Clamps particles into the boundary box, reflecting and damping the
/// velocity component that pointed out of it. Returns how many particles
/// touched a wall.
pub fn apply_boundaries(state: &mut ParticleState, boundary: &Boundary) -> usize {
    let bounce = boundary.restitution;
    state
        .positions
        .par_iter_mut()
        .zip(state.velocities.par_iter_mut())
        .map(|(p, v)| {
            let mut hit = false;
            for axis in 0..2 {
                if p[axis] < boundary.min[axis] {
                    p[axis] = boundary.min[axis];
                    if v[axis] < 0.0 {
                        v[axis] *= -bounce;
                    }
                    hit = true;
                } else if p[axis] > boundary.max[axis] {
                    p[axis] = boundary.max[axis];
                    if v[axis] > 0.0 {
                        v[axis] *= -bounce;
                    }
                    hit = true;
                }
            }
            usize::from(hit)
        })
        .sum()
}

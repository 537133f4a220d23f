use bevy::log::{error, info_span};
use bevy::prelude::*;

use crate::error::ConfigError;
use crate::render::ffi::{RenderParticle, ViewUniforms};
use crate::sph::solver::SphSolver;

// ==================== resources ======================================

/// Per-frame driving of the solver.
#[derive(Resource, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimulationControl {
    /// Solver steps per `Update`.
    pub substeps: u32,
    pub paused: bool,
}

impl Default for SimulationControl {
    fn default() -> Self {
        Self {
            substeps: 1,
            paused: false,
        }
    }
}

impl SimulationControl {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.substeps == 0 {
            return Err(ConfigError::ZeroSubsteps);
        }
        Ok(())
    }
}

/// Render records of the current frame, in sorted order. Refilled every
/// `Update` for whatever uploads particles to the GPU.
#[derive(Resource, Default, Debug)]
pub struct SortedParticleBuffer(pub Vec<RenderParticle>);

/// View uniforms matching [`SortedParticleBuffer`]: the solver domain mapped
/// onto clip space. The view size is the domain extent in world units.
#[derive(Resource, Debug)]
pub struct ParticleViewUniforms(pub ViewUniforms);

// =====================================================================

// ========================== systems ==================================

fn step_solver(control: Res<SimulationControl>, solver: Option<ResMut<SphSolver>>) {
    // the solver is inserted by the app once it has particles
    let Some(mut solver) = solver else {
        return;
    };
    if let Err(e) = control.validate() {
        if control.is_changed() {
            error!("simulation control rejected: {}", e);
        }
        return;
    }
    if control.paused {
        return;
    }

    let _span = info_span!("sph_frame", substeps = control.substeps).entered();
    for _ in 0..control.substeps {
        solver.step();
    }
}

fn publish_sorted_particles(
    mut commands: Commands,
    solver: Option<Res<SphSolver>>,
    mut buffer: ResMut<SortedParticleBuffer>,
) {
    let Some(solver) = solver else {
        return;
    };
    solver.render_view().write_render_particles(&mut buffer.0);

    let config = solver.config();
    let (min, max) = (config.domain_min, config.domain_max);
    let extent = max - min;
    commands.insert_resource(ParticleViewUniforms(ViewUniforms::orthographic(
        min.to_array(),
        max.to_array(),
        extent.x,
        extent.y,
    )));
}

// =====================================================================

// Plugin

/// Steps an [`SphSolver`] resource every frame and publishes its particles
/// as a [`SortedParticleBuffer`].
#[derive(Default)]
pub struct SphPlugin {
    pub control: SimulationControl,
}

impl Plugin for SphPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(self.control)
            .init_resource::<SortedParticleBuffer>()
            .add_systems(Update, (step_solver, publish_sorted_particles).chain());
    }
}

use bevy::log::{debug, info};
use bevy::prelude::Resource;
use glam::Vec2;

use crate::config::SimConfig;
use crate::error::{ConfigError, SimError};
use crate::grid::indexer::CellEntry;
use crate::grid::neighbors::{IndexStats, SpatialIndex};
use crate::render::ffi::RenderParticle;
use crate::sph::forces::{ForceAccumulator, ForceParams};
use crate::sph::integrator::{Integrator, StepDiagnostics};
use crate::sph::state::ParticleState;

/// The whole simulation: particle state plus the neighbour-search and force
/// machinery that advances it.
#[derive(Resource)]
pub struct SphSolver {
    config: SimConfig,
    state: ParticleState,
    index: SpatialIndex,
    forces: ForceAccumulator,
    integrator: Integrator,
    time: f64,
    steps: u64,
    diagnostics: StepDiagnostics,
}

impl SphSolver {
    pub fn new(config: SimConfig, state: ParticleState) -> Result<Self, SimError> {
        config.validate()?;
        if state.is_empty() {
            return Err(ConfigError::EmptyParticleSet.into());
        }

        let mut solver = Self {
            index: SpatialIndex::new(&config)?,
            forces: ForceAccumulator::new(ForceParams::from_config(&config)),
            integrator: Integrator::new(&config),
            config,
            state,
            time: 0.0,
            steps: 0,
            diagnostics: StepDiagnostics::default(),
        };
        solver.diagnostics.index = solver.prime();

        let res = solver.index.grid().resolution;
        info!(
            "sph solver: {} particles, {}x{} grid ({:?} keys), {:?}",
            solver.state.len(),
            res.x,
            res.y,
            solver.config.key_encoding,
            solver.config.integration
        );
        Ok(solver)
    }

    // sorts the current positions and evaluates the exported fields there;
    // afterwards the index is fresh for the next step's first stage
    fn prime(&mut self) -> IndexStats {
        let stats = self.index.rebuild(&self.state.positions);
        self.forces
            .evaluate_density(&self.index, &self.state.positions, &self.state.velocities);
        stats
    }

    /// Advances the simulation by one `time_step`.
    pub fn step(&mut self) -> StepDiagnostics {
        let mut diag = self
            .integrator
            .step(&mut self.state, &mut self.index, &mut self.forces, true);
        diag.index = self.prime();
        diag.rebuilds += 1;
        self.diagnostics = diag;
        self.time += f64::from(self.config.time_step);
        self.steps += 1;

        debug!(
            "step {}: {} rebuilds, {} escaped, {} overflowing cells, {} wall hits",
            self.steps,
            diag.rebuilds,
            diag.index.escaped,
            diag.index.overflowing_cells,
            diag.wall_hits
        );
        diag
    }

    pub fn state(&self) -> &ParticleState {
        &self.state
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Simulated time in seconds.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn step_count(&self) -> u64 {
        self.steps
    }

    pub fn last_diagnostics(&self) -> StepDiagnostics {
        self.diagnostics
    }

    /// Swaps in a new parameter set, keeping the particles. On error the
    /// solver is left untouched.
    pub fn reconfigure(&mut self, config: SimConfig) -> Result<(), SimError> {
        config.validate()?;
        self.index = SpatialIndex::new(&config)?;
        self.forces.set_params(ForceParams::from_config(&config));
        self.integrator = Integrator::new(&config);
        self.config = config;
        self.diagnostics.index = self.prime();
        info!("sph solver reconfigured: {:?}", self.config);
        Ok(())
    }

    /// Read-only view of the particles in the latest cell order.
    pub fn render_view(&self) -> RenderView<'_> {
        let fields = self.forces.fields();
        RenderView {
            entries: self.index.sorted_entries(),
            positions: &fields.positions,
            density: &fields.density,
            pressure: &fields.pressure,
        }
    }
}

/// Particles in sorted order, as a renderer consumes them. Positions,
/// densities and pressures all belong to the current state.
#[derive(Clone, Copy)]
pub struct RenderView<'a> {
    entries: &'a [CellEntry],
    pub positions: &'a [Vec2],
    pub density: &'a [f32],
    pub pressure: &'a [f32],
}

impl RenderView<'_> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sorted_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|e| e.id)
    }

    pub fn to_render_particles(&self) -> Vec<RenderParticle> {
        let mut out = Vec::with_capacity(self.len());
        self.write_render_particles(&mut out);
        out
    }

    /// Same as [`to_render_particles`](Self::to_render_particles), reusing
    /// `out`'s allocation.
    pub fn write_render_particles(&self, out: &mut Vec<RenderParticle>) {
        out.clear();
        out.extend(
            self.positions
                .iter()
                .zip(self.density)
                .zip(self.pressure)
                .map(|((p, &density), &pressure)| RenderParticle {
                    pos: p.to_array(),
                    density,
                    pressure,
                }),
        );
    }
}

pub mod config;
pub mod error;
pub mod plugin;

pub mod grid {
    pub mod cell_table;
    pub mod indexer;
    pub mod neighbors;
    pub mod prefix_sum;
    pub mod radix_sort;
}

pub mod sph {
    pub mod forces;
    pub mod integrator;
    pub mod kernels;
    pub mod solver;
    pub mod state;
}

pub mod render {
    pub mod ffi;
}

pub use config::{IntegrationMethod, KeyEncoding, NeighborPolicy, SimConfig};
pub use error::{ConfigError, SimError};
pub use plugin::{ParticleViewUniforms, SimulationControl, SortedParticleBuffer, SphPlugin};
pub use sph::solver::{RenderView, SphSolver};
pub use sph::state::ParticleState;

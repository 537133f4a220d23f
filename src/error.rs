/// Configuration problems caught before the pipeline runs.
///
/// Everything that can go wrong *during* a step (particles leaving the
/// domain, crowded cells, coincident particles) is absorbed by the pipeline
/// and only shows up in the diagnostics, never here.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    EmptyParticleSet,
    NonPositive { field: &'static str, value: f32 },
    NonFinite { field: &'static str },
    Negative { field: &'static str, value: f32 },
    InvalidParticleRadius { radius: f32, max: f32 },
    InvalidRestitution(f32),
    CellSmallerThanKernel { cell_size: f32, kernel_radius: f32 },
    EmptyDomain,
    GridTooLarge { resolution: [u32; 2], max_axis: u32 },
    InvalidSortBlockSize(usize),
    InvalidDigitBits(u32),
    ZeroCellCapacity,
    ZeroSubsteps,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EmptyParticleSet => write!(f, "particle set is empty"),
            ConfigError::NonPositive { field, value } => {
                write!(f, "`{}` must be positive and finite, got {}", field, value)
            }
            ConfigError::NonFinite { field } => write!(f, "`{}` must be finite", field),
            ConfigError::Negative { field, value } => {
                write!(f, "`{}` must not be negative, got {}", field, value)
            }
            ConfigError::InvalidParticleRadius { radius, max } => write!(
                f,
                "particle radius {} must be within [0, {}) so the walls stay inside the domain",
                radius, max
            ),
            ConfigError::InvalidRestitution(r) => {
                write!(f, "boundary restitution must be within [0, 1], got {}", r)
            }
            ConfigError::CellSmallerThanKernel {
                cell_size,
                kernel_radius,
            } => write!(
                f,
                "cell size {} is smaller than kernel radius {}; a 3x3 stencil would miss neighbours",
                cell_size, kernel_radius
            ),
            ConfigError::EmptyDomain => write!(f, "domain max must exceed domain min on both axes"),
            ConfigError::GridTooLarge {
                resolution,
                max_axis,
            } => write!(
                f,
                "grid resolution {}x{} exceeds {} cells per axis",
                resolution[0], resolution[1], max_axis
            ),
            ConfigError::InvalidSortBlockSize(size) => {
                write!(f, "sort block size must be non-zero, got {}", size)
            }
            ConfigError::InvalidDigitBits(bits) => {
                write!(f, "radix digit width must be within 1..=8 bits, got {}", bits)
            }
            ConfigError::ZeroCellCapacity => write!(f, "max_particles_per_cell must be non-zero"),
            ConfigError::ZeroSubsteps => write!(f, "substeps must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors returned when building or reconfiguring a solver.
#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    Config(ConfigError),
    LengthMismatch { positions: usize, velocities: usize },
}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimError::Config(e) => write!(f, "invalid configuration: {}", e),
            SimError::LengthMismatch {
                positions,
                velocities,
            } => write!(
                f,
                "particle buffers disagree: {} positions, {} velocities",
                positions, velocities
            ),
        }
    }
}

impl std::error::Error for SimError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimError::Config(e) => Some(e),
            SimError::LengthMismatch { .. } => None,
        }
    }
}

impl From<ConfigError> for SimError {
    fn from(e: ConfigError) -> Self {
        SimError::Config(e)
    }
}

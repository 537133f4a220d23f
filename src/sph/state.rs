use glam::Vec2;

use crate::error::SimError;

/// Positions and velocities, indexed by particle id. The only data that
/// survives from one step to the next.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParticleState {
    pub positions: Vec<Vec2>,
    pub velocities: Vec<Vec2>,
}

impl ParticleState {
    pub fn new(positions: Vec<Vec2>, velocities: Vec<Vec2>) -> Result<Self, SimError> {
        if positions.len() != velocities.len() {
            return Err(SimError::LengthMismatch {
                positions: positions.len(),
                velocities: velocities.len(),
            });
        }
        Ok(Self {
            positions,
            velocities,
        })
    }

    pub fn at_rest(positions: Vec<Vec2>) -> Self {
        let velocities = vec![Vec2::ZERO; positions.len()];
        Self {
            positions,
            velocities,
        }
    }

    /// `nx * ny` particles at rest on a square lattice, row by row from
    /// `origin`.
    pub fn block(origin: Vec2, nx: usize, ny: usize, spacing: f32) -> Self {
        let mut positions = Vec::with_capacity(nx * ny);
        for iy in 0..ny {
            for ix in 0..nx {
                let x = ix as f32 * spacing;
                let y = iy as f32 * spacing;
                positions.push(origin + Vec2::new(x, y));
            }
        }
        Self::at_rest(positions)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_is_row_major() {
        let state = ParticleState::block(Vec2::ZERO, 10, 5, 0.125);
        assert_eq!(state.len(), 50);
        assert_eq!(state.positions[0], Vec2::new(0.0, 0.0));
        assert_eq!(state.positions[1], Vec2::new(0.125, 0.0));
        assert_eq!(state.positions[10], Vec2::new(0.0, 0.125));
        assert!(state.velocities.iter().all(|v| *v == Vec2::ZERO));
    }

    #[test]
    fn mismatched_buffers_are_rejected() {
        let err = ParticleState::new(vec![Vec2::ZERO; 3], vec![Vec2::ZERO; 2]).unwrap_err();
        assert_eq!(
            err,
            SimError::LengthMismatch {
                positions: 3,
                velocities: 2
            }
        );
    }
}

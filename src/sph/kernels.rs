// 2D smoothing kernels, all with compact support of radius h
use std::f32::consts::PI;

use glam::Vec2;

/// Added to `r` before dividing by it so coincident particles never divide
/// by zero.
pub const STABILITY_EPSILON: f32 = 1e-8;

/// Kernel radius with its powers and normalisation constants, computed once
/// per configuration instead of once per pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Kernels {
    pub h: f32,
    h2: f32,
    density_norm: f32,
    spiky_grad_norm: f32,
    near_norm: f32,
    visc_lap_norm: f32,
}

impl Kernels {
    pub fn new(h: f32) -> Self {
        let h5 = h.powi(5);
        let h8 = h.powi(8);
        Self {
            h,
            h2: h * h,
            density_norm: 4.0 / (PI * h8),
            spiky_grad_norm: 30.0 / (PI * h5),
            near_norm: 10.0 / (PI * h5),
            visc_lap_norm: 20.0 / (PI * h5),
        }
    }

    /// Poly6-style density kernel on squared distance: `4/(π h⁸) (h² − r²)³`.
    #[inline]
    pub fn density(&self, r2: f32) -> f32 {
        if !(0.0..self.h2).contains(&r2) {
            return 0.0;
        }
        let d = self.h2 - r2;
        self.density_norm * d * d * d
    }

    /// Steeper kernel for the near density: `10/(π h⁵) (h − r)³`.
    #[inline]
    pub fn near_density(&self, r: f32) -> f32 {
        if r >= self.h {
            return 0.0;
        }
        let d = self.h - r;
        self.near_norm * d * d * d
    }

    /// Spiky gradient, `−30/(π h⁵) (h − r)² vec / r`. Points from the
    /// particle at the origin of `vec` towards the other one.
    #[inline]
    pub fn pressure_gradient(&self, vec: Vec2, r: f32) -> Vec2 {
        if r >= self.h {
            return Vec2::ZERO;
        }
        let d = self.h - r;
        -self.spiky_grad_norm * d * d * vec / (r + STABILITY_EPSILON)
    }

    /// `−10/(π h⁵) (h − r)³ vec / r`, short-range repulsion for the
    /// near-pressure term.
    #[inline]
    pub fn near_pressure_gradient(&self, vec: Vec2, r: f32) -> Vec2 {
        if r >= self.h {
            return Vec2::ZERO;
        }
        let d = self.h - r;
        -self.near_norm * d * d * d * vec / (r + STABILITY_EPSILON)
    }

    /// Viscosity Laplacian, `20/(π h⁵) (h − r)`.
    #[inline]
    pub fn viscosity_laplacian(&self, r: f32) -> f32 {
        if r >= self.h {
            return 0.0;
        }
        self.visc_lap_norm * (self.h - r)
    }
}

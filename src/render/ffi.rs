use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// One particle as the renderer reads it, in sorted order.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RenderParticle {
    // plain arrays, not glam, so the layout matches the shader side
    pub pos: [f32; 2],
    pub density: f32,
    pub pressure: f32,
}

/// View data for the particle draw pass.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ViewUniforms {
    pub view_width: f32,
    pub view_height: f32,
    pub _pad: [f32; 2],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

impl ViewUniforms {
    /// Identity view and an orthographic projection mapping the domain box
    /// `[min, max]` onto clip space.
    pub fn orthographic(min: [f32; 2], max: [f32; 2], view_width: f32, view_height: f32) -> Self {
        let proj = Mat4::orthographic_rh(min[0], max[0], min[1], max[1], -1.0, 1.0);
        Self {
            view_width,
            view_height,
            _pad: [0.0; 2],
            view: Mat4::IDENTITY.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Byte view of a particle slice, ready for a buffer upload.
pub fn particle_bytes(particles: &[RenderParticle]) -> &[u8] {
    bytemuck::cast_slice(particles)
}

//! Per-frame camera constants supplied by the host.

/// Row-major 4x4 matrix; points transform as column vectors (`v' = M v`).
pub type Mat4 = [[f32; 4]; 4];

pub const MAT4_IDENTITY: Mat4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Multiply `m * v`.
#[inline]
pub fn transform(m: &Mat4, v: [f32; 4]) -> [f32; 4] {
    let mut out = [0.0f32; 4];
    for (row, o) in m.iter().zip(out.iter_mut()) {
        *o = row[0] * v[0] + row[1] * v[1] + row[2] * v[2] + row[3] * v[3];
    }
    out
}

/// Camera/jitter transforms for one frame of one viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommonFrameConstants {
    /// Sub-pixel projection jitter of the current frame, in pixels.
    pub jitter_offset: [f32; 2],
    /// Current clip space to previous clip space.
    pub clip_to_prev_clip: Mat4,
    /// Previous clip space to current clip space.
    pub prev_clip_to_clip: Mat4,
}

impl Default for CommonFrameConstants {
    fn default() -> Self {
        Self {
            jitter_offset: [0.0, 0.0],
            clip_to_prev_clip: MAT4_IDENTITY,
            prev_clip_to_clip: MAT4_IDENTITY,
        }
    }
}

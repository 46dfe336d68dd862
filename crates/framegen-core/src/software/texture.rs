//! CPU texture storage.

use framegen_common::{Format, TextureDesc};

/// Texel storage. Float formats keep one `f32` per channel, unquantized.
#[derive(Debug, Clone, PartialEq)]
pub enum Texels {
    Float { channels: usize, data: Vec<f32> },
    Uint(Vec<u32>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoftwareTexture {
    pub desc: TextureDesc,
    pub texels: Texels,
}

impl SoftwareTexture {
    /// A zero-filled texture.
    pub fn new(desc: TextureDesc) -> Self {
        let count = desc.extent.area() as usize;
        let texels = if desc.format == Format::R32Uint {
            Texels::Uint(vec![0; count])
        } else {
            let channels = desc.format.channels() as usize;
            Texels::Float {
                channels,
                data: vec![0.0; count * channels],
            }
        };
        Self { desc, texels }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.desc.extent.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.desc.extent.height
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        let x = x.min(self.width().saturating_sub(1));
        let y = y.min(self.height().saturating_sub(1));
        y as usize * self.width() as usize + x as usize
    }

    /// Texel at `(x, y)`, clamped to the edge. Missing channels read as 0.
    pub fn load(&self, x: u32, y: u32) -> [f32; 4] {
        if self.desc.extent.is_empty() {
            return [0.0; 4];
        }
        let i = self.index(x, y);
        match &self.texels {
            Texels::Float { channels, data } => {
                let mut out = [0.0; 4];
                out[..*channels].copy_from_slice(&data[i * channels..(i + 1) * channels]);
                out
            }
            Texels::Uint(data) => [data[i] as f32, 0.0, 0.0, 0.0],
        }
    }

    pub fn load_uint(&self, x: u32, y: u32) -> u32 {
        if self.desc.extent.is_empty() {
            return 0;
        }
        let i = self.index(x, y);
        match &self.texels {
            Texels::Uint(data) => data[i],
            Texels::Float { channels, data } => data[i * channels] as u32,
        }
    }

    /// Load the texel covering output-space position `pos` of an output of
    /// size `dims`. Inputs tagged at a different resolution are rescaled.
    pub fn fetch(&self, pos: [f32; 2], dims: [u32; 2]) -> [f32; 4] {
        let sx = pos[0] * self.width() as f32 / dims[0].max(1) as f32;
        let sy = pos[1] * self.height() as f32 / dims[1].max(1) as f32;
        self.load(sx.max(0.0) as u32, sy.max(0.0) as u32)
    }

    pub fn store(&mut self, x: u32, y: u32, value: [f32; 4]) {
        if x >= self.width() || y >= self.height() {
            return;
        }
        let i = self.index(x, y);
        match &mut self.texels {
            Texels::Float { channels, data } => {
                data[i * *channels..(i + 1) * *channels].copy_from_slice(&value[..*channels]);
            }
            Texels::Uint(data) => data[i] = value[0].max(0.0) as u32,
        }
    }

    pub fn store_uint(&mut self, x: u32, y: u32, value: u32) {
        if x >= self.width() || y >= self.height() {
            return;
        }
        let i = self.index(x, y);
        match &mut self.texels {
            Texels::Uint(data) => data[i] = value,
            Texels::Float { channels, data } => data[i * *channels] = value as f32,
        }
    }

    /// Atomic-max equivalent for a packed split accumulator.
    pub fn max_uint(&mut self, index: usize, value: u32) {
        if let Texels::Uint(data) = &mut self.texels {
            if let Some(t) = data.get_mut(index) {
                *t = (*t).max(value);
            }
        }
    }

    /// Write `values` in row-major order.
    pub fn store_all(&mut self, values: &[[f32; 4]]) {
        let w = self.width().max(1);
        for (i, v) in values.iter().enumerate() {
            let i = i as u32;
            self.store(i % w, i / w, *v);
        }
    }

    pub fn fill(&mut self, value: [f32; 4]) {
        match &mut self.texels {
            Texels::Float { channels, data } => {
                for texel in data.chunks_exact_mut(*channels) {
                    texel.copy_from_slice(&value[..*channels]);
                }
            }
            Texels::Uint(data) => data.fill(value[0].max(0.0) as u32),
        }
    }

    pub fn clear(&mut self) {
        match &mut self.texels {
            Texels::Float { data, .. } => data.fill(0.0),
            Texels::Uint(data) => data.fill(0),
        }
    }

    /// Copy `src` of the same extent, converting between formats.
    pub fn copy_from(&mut self, src: &SoftwareTexture) {
        if self.desc.format == src.desc.format {
            self.texels = src.texels.clone();
            return;
        }
        for y in 0..self.height() {
            for x in 0..self.width() {
                match &src.texels {
                    Texels::Uint(_) => self.store_uint(x, y, src.load_uint(x, y)),
                    Texels::Float { .. } => self.store(x, y, src.load(x, y)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channels_follow_format() {
        let mut t = SoftwareTexture::new(TextureDesc::new(4, 4, Format::Rg32Float));
        t.store(1, 2, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(t.load(1, 2), [1.0, 2.0, 0.0, 0.0]);
        assert_eq!(t.load(0, 0), [0.0; 4]);
    }

    #[test]
    fn test_load_clamps_to_edge() {
        let mut t = SoftwareTexture::new(TextureDesc::new(2, 2, Format::R32Float));
        t.store(1, 1, [5.0, 0.0, 0.0, 0.0]);
        assert_eq!(t.load(9, 9)[0], 5.0);
    }

    #[test]
    fn test_fetch_rescales_lower_resolution_inputs() {
        let mut t = SoftwareTexture::new(TextureDesc::new(2, 2, Format::R32Float));
        t.store(1, 0, [7.0, 0.0, 0.0, 0.0]);
        // output pixel (3, 0) of a 4x4 output maps to texel (1, 0)
        assert_eq!(t.fetch([3.5, 0.5], [4, 4])[0], 7.0);
        assert_eq!(t.fetch([1.5, 0.5], [4, 4])[0], 0.0);
    }

    #[test]
    fn test_uint_max() {
        let mut t = SoftwareTexture::new(TextureDesc::new(2, 1, Format::R32Uint));
        t.max_uint(1, 10);
        t.max_uint(1, 4);
        assert_eq!(t.load_uint(1, 0), 10);
        t.clear();
        assert_eq!(t.load_uint(1, 0), 0);
    }

    #[test]
    fn test_copy_converts_formats() {
        let mut src = SoftwareTexture::new(TextureDesc::new(2, 2, Format::Rgba16Float));
        src.fill([0.5, 0.25, 0.125, 1.0]);
        let mut dst = SoftwareTexture::new(TextureDesc::new(2, 2, Format::Bgra8Unorm));
        dst.copy_from(&src);
        assert_eq!(dst.load(1, 1), [0.5, 0.25, 0.125, 1.0]);
    }
}

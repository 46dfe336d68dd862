//! CPU execution of the kernel catalogue.
//!
//! Each kernel mirrors its GLSL counterpart texel for texel; rows run in
//! parallel on the rayon pool. Scatter kernels gather their contributions in
//! parallel and apply the atomic max serially.

use framegen_common::constants::transform;
use rayon::prelude::*;

use crate::error::{FrameGenError, Result};
use crate::kernels::{
    depth_to_priority, is_hole, pack_split, priority_to_depth, unpack_split, ClearParams, Kernel,
    PushPullParams, ReprojectParams, ResolveParams, HOLE,
};

use super::texture::SoftwareTexture;

type Vec2 = [f32; 2];

fn read_params<P: bytemuck::Pod>(kernel: Kernel, bytes: &[u8]) -> Result<P> {
    bytemuck::try_pod_read_unaligned(bytes)
        .map_err(|e| FrameGenError::Backend(format!("bad {} parameters: {:?}", kernel, e)))
}

/// Evaluate `f` for every pixel of a `w`x`h` grid, row-major.
fn par_pixels<T, F>(w: u32, h: u32, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(u32, u32) -> T + Sync,
{
    let f = &f;
    (0..h)
        .into_par_iter()
        .flat_map_iter(move |y| (0..w).map(move |x| f(x, y)))
        .collect()
}

#[inline]
fn xy(t: [f32; 4]) -> Vec2 {
    [t[0], t[1]]
}

#[inline]
fn mv4(v: Vec2) -> [f32; 4] {
    [v[0], v[1], 0.0, 0.0]
}

#[inline]
fn on_screen(p: Vec2, dims: [u32; 2]) -> bool {
    p[0] >= 0.0 && p[1] >= 0.0 && p[0] < dims[0] as f32 && p[1] < dims[1] as f32
}

/// Flat index of the pixel containing `p`, if on screen.
#[inline]
fn pixel_index(p: Vec2, dims: [u32; 2]) -> Option<usize> {
    on_screen(p, dims).then(|| p[1] as usize * dims[0] as usize + p[0] as usize)
}

/// Clip-space position of pixel centre `c` at `depth`.
#[inline]
fn to_clip(c: Vec2, depth: f32, inv: Vec2) -> [f32; 4] {
    [c[0] * inv[0] * 2.0 - 1.0, 1.0 - c[1] * inv[1] * 2.0, depth, 1.0]
}

pub fn execute(
    kernel: Kernel,
    reads: &[&SoftwareTexture],
    writes: &mut [SoftwareTexture],
    params: &[u8],
) -> Result<()> {
    match kernel {
        Kernel::Clear => {
            let _: ClearParams = read_params(kernel, params)?;
            writes.iter_mut().for_each(SoftwareTexture::clear);
        }
        Kernel::Reproject => reproject(reads, writes, &read_params(kernel, params)?),
        Kernel::MergeHalf => merge_half(reads, writes, &read_params(kernel, params)?),
        Kernel::MergeFull => merge_full(reads, writes, &read_params(kernel, params)?),
        Kernel::FirstLeg => first_leg(reads, writes, &read_params(kernel, params)?),
        Kernel::Pull => pull(reads, writes, &read_params(kernel, params)?),
        Kernel::Push => push(reads, writes, &read_params(kernel, params)?),
        Kernel::LastStretch => last_stretch(reads, writes, &read_params(kernel, params)?),
        Kernel::Resolve => resolve(reads, writes, &read_params(kernel, params)?),
    }
    Ok(())
}

// ============================================================
// Reprojection
// ============================================================

struct Scatter {
    targets: [Option<usize>; 3],
    x: u32,
    y: u32,
}

/// reads: curr mvec, prev depth, curr depth. writes: full/tip/top x X/Y.
fn reproject(reads: &[&SoftwareTexture], writes: &mut [SoftwareTexture], p: &ReprojectParams) {
    let (mvec, prev_depth, curr_depth) = (reads[0], reads[1], reads[2]);
    let dims = p.dims;

    let scatters = par_pixels(dims[0], dims[1], |x, y| {
        let c = [x as f32 + 0.5, y as f32 + 0.5];
        let m = xy(mvec.fetch(c, dims));
        let depth = curr_depth.fetch(c, dims)[0];

        let prev = [c[0] + m[0], c[1] + m[1]];
        if !on_screen(prev, dims) {
            return None;
        }
        let pc = transform(&p.clip_to_prev_clip, to_clip(c, depth, p.viewport_inv));
        if pc[3] <= 0.0 {
            return None;
        }
        let expected = pc[2] / pc[3];
        if (prev_depth.fetch(prev, dims)[0] - expected).abs() > p.depth_tolerance {
            return None;
        }

        let d = p.tip_top_distance;
        let mid = [c[0] + 0.5 * m[0], c[1] + 0.5 * m[1]];
        let tip = [(mid[0] + 0.5 * d[0]).floor(), (mid[1] + 0.5 * d[1]).floor()];
        let top = [(mid[0] - 0.5 * d[0]).floor(), (mid[1] - 0.5 * d[1]).floor()];
        let priority = depth_to_priority(depth);
        Some(Scatter {
            targets: [
                pixel_index([prev[0].floor(), prev[1].floor()], dims),
                pixel_index(tip, dims),
                pixel_index(top, dims),
            ],
            x: pack_split(priority, m[0]),
            y: pack_split(priority, m[1]),
        })
    });

    for s in scatters.into_iter().flatten() {
        for (pair, target) in s.targets.iter().enumerate() {
            if let Some(i) = *target {
                writes[pair * 2].max_uint(i, s.x);
                writes[pair * 2 + 1].max_uint(i, s.y);
            }
        }
    }
}

/// Combine one X/Y accumulator pair. Mismatched priorities are a collision.
#[inline]
fn merge_pair(packed_x: u32, packed_y: u32, fallback: impl FnOnce() -> Vec2) -> (Option<u32>, Vec2) {
    let (px, vx) = unpack_split(packed_x);
    let (py, vy) = unpack_split(packed_y);
    if px == 0 && py == 0 {
        (None, HOLE)
    } else if px != py {
        (None, fallback())
    } else {
        (Some(px), [vx, vy])
    }
}

/// reads: tip X/Y, top X/Y, curr mvec. writes: half tip, half top.
fn merge_half(reads: &[&SoftwareTexture], writes: &mut [SoftwareTexture], p: &ReprojectParams) {
    let dims = p.dims;
    let merged = par_pixels(dims[0], dims[1], |x, y| {
        let c = [x as f32 + 0.5, y as f32 + 0.5];
        let fallback = || xy(reads[4].fetch(c, dims));
        let (_, tip) = merge_pair(reads[0].load_uint(x, y), reads[1].load_uint(x, y), fallback);
        let (_, top) = merge_pair(reads[2].load_uint(x, y), reads[3].load_uint(x, y), fallback);
        (mv4(tip), mv4(top))
    });
    let (tip, top): (Vec<_>, Vec<_>) = merged.into_iter().unzip();
    writes[0].store_all(&tip);
    writes[1].store_all(&top);
}

/// reads: full X/Y, curr mvec, prev depth. writes: full.
fn merge_full(reads: &[&SoftwareTexture], writes: &mut [SoftwareTexture], p: &ReprojectParams) {
    let dims = p.dims;
    // one priority step of depth quantization
    let tolerance = p.depth_tolerance + 1.0 / 65534.0;
    let merged = par_pixels(dims[0], dims[1], |x, y| {
        let c = [x as f32 + 0.5, y as f32 + 0.5];
        let (priority, v) = merge_pair(reads[0].load_uint(x, y), reads[1].load_uint(x, y), || {
            xy(reads[2].fetch(c, dims))
        });
        let Some(priority) = priority else {
            return mv4(v);
        };
        let prev_depth = reads[3].fetch(c, dims)[0];
        let cc = transform(&p.prev_clip_to_clip, to_clip(c, prev_depth, p.viewport_inv));
        if cc[3] <= 0.0 || (cc[2] / cc[3] - priority_to_depth(priority)).abs() > tolerance {
            return mv4(HOLE);
        }
        mv4(v)
    });
    writes[0].store_all(&merged);
}

// ============================================================
// Reliability pyramid
// ============================================================

/// reads: input (finer). writes: mv, rel (coarser).
fn first_leg(reads: &[&SoftwareTexture], writes: &mut [SoftwareTexture], p: &PushPullParams) {
    let input = reads[0];
    let [fw, fh] = p.finer;
    let out = par_pixels(p.coarser[0], p.coarser[1], |x, y| {
        let mut sum = [0.0f32; 2];
        let mut n = 0u32;
        for (fx, fy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let (fx, fy) = (2 * x + fx, 2 * y + fy);
            if fx >= fw || fy >= fh {
                continue;
            }
            let v = xy(input.load(fx, fy));
            if !is_hole(v) {
                sum[0] += v[0];
                sum[1] += v[1];
                n += 1;
            }
        }
        if n == 0 {
            ([0.0; 4], [0.0; 4])
        } else {
            let inv = 1.0 / n as f32;
            (mv4([sum[0] * inv, sum[1] * inv]), [1.0, 0.0, 0.0, 0.0])
        }
    });
    let (mv, rel): (Vec<_>, Vec<_>) = out.into_iter().unzip();
    writes[0].store_all(&mv);
    writes[1].store_all(&rel);
}

/// reads: mv, rel (finer). writes: mv, rel (coarser).
fn pull(reads: &[&SoftwareTexture], writes: &mut [SoftwareTexture], p: &PushPullParams) {
    let (mv, rel) = (reads[0], reads[1]);
    let [fw, fh] = p.finer;
    let out = par_pixels(p.coarser[0], p.coarser[1], |x, y| {
        let mut sum = [0.0f32; 2];
        let mut weight = 0.0f32;
        for (fx, fy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let (fx, fy) = (2 * x + fx, 2 * y + fy);
            if fx >= fw || fy >= fh {
                continue;
            }
            let r = rel.load(fx, fy)[0];
            let v = mv.load(fx, fy);
            sum[0] += r * v[0];
            sum[1] += r * v[1];
            weight += r;
        }
        if weight > 0.0 {
            (mv4([sum[0] / weight, sum[1] / weight]), [weight.min(1.0), 0.0, 0.0, 0.0])
        } else {
            ([0.0; 4], [0.0; 4])
        }
    });
    let (mv, rel): (Vec<_>, Vec<_>) = out.into_iter().unzip();
    writes[0].store_all(&mv);
    writes[1].store_all(&rel);
}

/// Reliability-weighted bilinear sample of a coarser level at fine texel `(x, y)`.
///
/// Falls back to plain bilinear when every neighbour is unreliable.
fn coarse_sample(mv: &SoftwareTexture, rel: &SoftwareTexture, x: u32, y: u32, coarser: [u32; 2]) -> Vec2 {
    let pos = [(x as f32 + 0.5) * 0.5 - 0.5, (y as f32 + 0.5) * 0.5 - 0.5];
    let base = [pos[0].floor(), pos[1].floor()];
    let f = [pos[0] - base[0], pos[1] - base[1]];
    let max = [coarser[0].saturating_sub(1) as i64, coarser[1].saturating_sub(1) as i64];

    let mut weighted = [0.0f32; 2];
    let mut weight = 0.0f32;
    let mut plain = [0.0f32; 2];
    for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
        let tx = (base[0] as i64 + dx).clamp(0, max[0]) as u32;
        let ty = (base[1] as i64 + dy).clamp(0, max[1]) as u32;
        let b = (if dx == 0 { 1.0 - f[0] } else { f[0] }) * (if dy == 0 { 1.0 - f[1] } else { f[1] });
        let v = mv.load(tx, ty);
        let w = b * rel.load(tx, ty)[0];
        weighted[0] += w * v[0];
        weighted[1] += w * v[1];
        weight += w;
        plain[0] += b * v[0];
        plain[1] += b * v[1];
    }
    if weight > 1.0e-6 {
        [weighted[0] / weight, weighted[1] / weight]
    } else {
        plain
    }
}

/// reads: mv (finer), mv (coarser), rel (finer), rel (coarser). writes: pushed (finer).
fn push(reads: &[&SoftwareTexture], writes: &mut [SoftwareTexture], p: &PushPullParams) {
    let (mv_f, mv_c, rel_f, rel_c) = (reads[0], reads[1], reads[2], reads[3]);
    let out = par_pixels(p.finer[0], p.finer[1], |x, y| {
        let coarse = coarse_sample(mv_c, rel_c, x, y, p.coarser);
        let r = rel_f.load(x, y)[0].clamp(0.0, 1.0);
        let v = mv_f.load(x, y);
        mv4([r * v[0] + (1.0 - r) * coarse[0], r * v[1] + (1.0 - r) * coarse[1]])
    });
    writes[0].store_all(&out);
}

/// reads: input, pushed lv1, rel lv1. writes: output.
fn last_stretch(reads: &[&SoftwareTexture], writes: &mut [SoftwareTexture], p: &PushPullParams) {
    let (input, pushed, rel) = (reads[0], reads[1], reads[2]);
    let out = par_pixels(p.finer[0], p.finer[1], |x, y| {
        let v = xy(input.load(x, y));
        if is_hole(v) {
            mv4(coarse_sample(pushed, rel, x, y, p.coarser))
        } else {
            mv4(v)
        }
    });
    writes[0].store_all(&out);
}

// ============================================================
// Resolve
// ============================================================

/// reads: prev colour, prev depth, curr colour, curr depth, curr mvec, full,
/// half tip, half top filtered, ui. writes: generated.
fn resolve(reads: &[&SoftwareTexture], writes: &mut [SoftwareTexture], p: &ResolveParams) {
    let [prev_color, prev_depth, curr_color, curr_depth, curr_mvec, full, half_tip, half_top, ui] =
        [reads[0], reads[1], reads[2], reads[3], reads[4], reads[5], reads[6], reads[7], reads[8]];
    let dims = p.dims;

    let out = par_pixels(dims[0], dims[1], |x, y| {
        let c = [x as f32 + 0.5, y as f32 + 0.5];
        let tip = xy(half_tip.load(x, y));
        let top = xy(half_top.load(x, y));
        let v = if !is_hole(tip) {
            tip
        } else if !is_hole(top) {
            top
        } else {
            xy(curr_mvec.fetch(c, dims))
        };

        let cs = [c[0] - 0.5 * v[0], c[1] - 0.5 * v[1]];
        let ps = [c[0] + 0.5 * v[0], c[1] + 0.5 * v[1]];
        let curr = curr_color.fetch(cs, dims);
        let prev = prev_color.fetch(ps, dims);

        let consistent = on_screen(ps, dims) && {
            let f = xy(full.load(ps[0] as u32, ps[1] as u32));
            !is_hole(f) && (f[0] - v[0]).abs() <= 1.0 && (f[1] - v[1]).abs() <= 1.0
        };
        let depth_agrees =
            (curr_depth.fetch(cs, dims)[0] - prev_depth.fetch(ps, dims)[0]).abs() <= p.depth_tolerance;

        let mut color = if consistent && depth_agrees {
            [
                0.5 * (curr[0] + prev[0]),
                0.5 * (curr[1] + prev[1]),
                0.5 * (curr[2] + prev[2]),
                0.5 * (curr[3] + prev[3]),
            ]
        } else {
            curr
        };

        if p.has_ui != 0 {
            let u = ui.fetch(c, dims);
            for i in 0..3 {
                color[i] = u[i] * u[3] + color[i] * (1.0 - u[3]);
            }
        }
        color
    });
    writes[0].store_all(&out);
}

//! Block-matching motion estimate between two luma patches.

use fungen_types::GrayFrame;

use super::roi::Roi;

const SEARCH: i32 = 6;
const MAX_BLOCK: u32 = 16;
const MIN_BLOCK: u32 = 4;
/// Blocks flatter than this carry no usable motion.
const MIN_BLOCK_CONTRAST: u32 = 8;

/// Owned copy of the pixels inside an ROI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Patch {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if width == 0 || height == 0 || data.len() < (width * height) as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    /// Copies `roi` out of `frame`, clipped to the frame. `None` when empty.
    pub fn extract(frame: &GrayFrame, roi: &Roi) -> Option<Self> {
        let x = roi.x.max(0) as u32;
        let y = roi.y.max(0) as u32;
        if x >= frame.width() || y >= frame.height() {
            return None;
        }
        let width = (roi.w.max(0) as u32).min(frame.width() - x);
        let height = (roi.h.max(0) as u32).min(frame.height() - y);
        if width == 0 || height == 0 {
            return None;
        }
        let mut data = Vec::with_capacity((width * height) as usize);
        for row in y..y + height {
            data.extend_from_slice(&frame.row(row)[x as usize..(x + width) as usize]);
        }
        Self::new(width, height, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn at(&self, x: u32, y: u32) -> u8 {
        self.data[(y * self.width + x) as usize]
    }
}

/// Displacement from the previous patch to the current one, in pixels.
///
/// `upper_dy` and `lower_dy` cover only the blocks in the top and bottom half
/// of the patch.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FlowEstimate {
    pub dx: f64,
    pub dy: f64,
    pub upper_dy: f64,
    pub lower_dy: f64,
    pub blocks: usize,
}

fn block_size(width: u32, height: u32) -> u32 {
    (width.min(height) / 4).clamp(MIN_BLOCK, MAX_BLOCK)
}

fn block_contrast(patch: &Patch, bx: u32, by: u32, block: u32) -> u32 {
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    for yy in (0..block).step_by(2) {
        for xx in (0..block).step_by(2) {
            let value = patch.at(bx + xx, by + yy);
            min = min.min(value);
            max = max.max(value);
        }
    }
    u32::from(max - min)
}

/// Compares the overlapping area of `prev` and `curr`. `None` when the
/// overlap is too small to hold a single block or every block is flat.
pub fn block_flow(prev: &Patch, curr: &Patch) -> Option<FlowEstimate> {
    let width = prev.width.min(curr.width);
    let height = prev.height.min(curr.height);
    let block = block_size(width, height);
    if width < block || height < block {
        return None;
    }
    let step = if block >= 8 { 2 } else { 1 };
    let half = height / 2;

    let mut dxs = Vec::new();
    let mut dys = Vec::new();
    let mut upper = Vec::new();
    let mut lower = Vec::new();

    for by in (0..=height - block).step_by(block as usize) {
        for bx in (0..=width - block).step_by(block as usize) {
            if block_contrast(prev, bx, by, block) < MIN_BLOCK_CONTRAST {
                continue;
            }
            let mut best_sad = u64::MAX;
            let mut best = (0i32, 0i32);
            for dy in -SEARCH..=SEARCH {
                for dx in -SEARCH..=SEARCH {
                    let tx = bx as i32 + dx;
                    let ty = by as i32 + dy;
                    if tx < 0 || ty < 0 || tx as u32 + block > width || ty as u32 + block > height {
                        continue;
                    }
                    let (tx, ty) = (tx as u32, ty as u32);
                    let mut sad = 0u64;
                    for yy in (0..block).step_by(step) {
                        for xx in (0..block).step_by(step) {
                            let a = i32::from(prev.at(bx + xx, by + yy));
                            let b = i32::from(curr.at(tx + xx, ty + yy));
                            sad += u64::from(a.abs_diff(b));
                        }
                    }
                    let closer = dx.abs() + dy.abs() < best.0.abs() + best.1.abs();
                    if sad < best_sad || (sad == best_sad && closer) {
                        best_sad = sad;
                        best = (dx, dy);
                    }
                }
            }
            let (dx, dy) = (f64::from(best.0), f64::from(best.1));
            dxs.push(dx);
            dys.push(dy);
            if by + block / 2 < half {
                upper.push(dy);
            } else {
                lower.push(dy);
            }
        }
    }

    if dxs.is_empty() {
        return None;
    }
    Some(FlowEstimate {
        dx: median(&mut dxs),
        dy: median(&mut dys),
        upper_dy: median(&mut upper),
        lower_dy: median(&mut lower),
        blocks: dxs.len(),
    })
}

/// Blocks near the patch edge cannot see their true match, so the median
/// is used instead of the mean.
fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn textured(width: u32, height: u32, shift_x: i64, shift_y: i64) -> Patch {
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height as i64 {
            for x in 0..width as i64 {
                let (sx, sy) = ((x - shift_x) as u64, (y - shift_y) as u64);
                let h = sx.wrapping_mul(0x9E37_79B9).wrapping_add(sy.wrapping_mul(0x85EB_CA6B));
                data.push(((h ^ (h >> 13)) & 0xFF) as u8);
            }
        }
        Patch::new(width, height, data).unwrap()
    }

    #[test]
    fn detects_uniform_translation() {
        let prev = textured(96, 96, 0, 0);
        let curr = textured(96, 96, 2, -3);
        let flow = block_flow(&prev, &curr).unwrap();
        assert!((flow.dx - 2.0).abs() < 0.5, "dx {}", flow.dx);
        assert!((flow.dy + 3.0).abs() < 0.5, "dy {}", flow.dy);
        assert!((flow.upper_dy - flow.lower_dy).abs() < 1.0);
    }

    #[test]
    fn still_content_has_zero_flow() {
        let prev = textured(48, 32, 0, 0);
        let flow = block_flow(&prev, &prev.clone()).unwrap();
        assert_eq!(flow.dx, 0.0);
        assert_eq!(flow.dy, 0.0);
    }

    #[test]
    fn flat_or_tiny_patches_yield_nothing() {
        let flat = Patch::new(32, 32, vec![128; 32 * 32]).unwrap();
        assert!(block_flow(&flat, &flat).is_none());
        let tiny = textured(3, 3, 0, 0);
        assert!(block_flow(&tiny, &tiny).is_none());
    }

    #[test]
    fn extract_clips_to_frame() {
        let frame = GrayFrame::from_owned(8, 4, 8, None, (0..32).collect()).unwrap();
        let patch = Patch::extract(&frame, &Roi::new(6, 2, 10, 10)).unwrap();
        assert_eq!((patch.width(), patch.height()), (2, 2));
        assert_eq!(patch.data, vec![22, 23, 30, 31]);
        assert!(Patch::extract(&frame, &Roi::new(9, 0, 2, 2)).is_none());
    }
}

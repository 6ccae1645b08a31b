use crate::field::{FieldStats, NoiseField};
use anyhow::Result;
use bytemuck::cast_slice;
use std::time::Duration;
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Transform};
use tracing::{debug, trace};
use vss_core::FrameContent;
use vss_timing::Timer;

const BACKGROUND: u8 = 127;
const FIXATION: u8 = 51;

#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    pub draw: Duration,
    pub copy: Duration,
    pub total: Duration,
    /// Set when a new noise field was synthesised this frame
    pub field: Option<FieldStats>,
    /// Nothing was drawn (no surface or mismatched buffer)
    pub skipped: bool,
}

impl FrameStats {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }
}

pub trait StimulusRenderer {
    fn draw_blank(&mut self);
    fn draw_fixation(&mut self);
    fn draw_noise(&mut self, seed: u32, contrast_pct: f64) -> Option<FieldStats>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FieldKey {
    seed: u32,
    contrast_bits: u64,
    width: u32,
    height: u32,
}

/// Draws 2IFC frames onto an off-screen canvas and copies them to the presented buffer
pub struct NoiseRenderer {
    width: u32,
    height: u32,
    block_px: u32,

    canvas: Option<Pixmap>,
    field: NoiseField,
    field_key: Option<FieldKey>,

    // Nearest-neighbour column lookup: display x -> field x
    column_map: Vec<u32>,
    column_map_field_width: u32,
    row_buffer: Vec<u32>,
    first_frame: bool,
}

impl NoiseRenderer {
    pub fn new(width: u32, height: u32, block_px: u32) -> Self {
        let mut renderer = NoiseRenderer {
            width: 0,
            height: 0,
            block_px: block_px.max(1),
            canvas: None,
            field: NoiseField::new(),
            field_key: None,
            column_map: Vec::new(),
            column_map_field_width: 0,
            row_buffer: Vec::new(),
            first_frame: true,
        };
        renderer.resize(width, height);
        renderer
    }

    pub fn resize(&mut self, new_width: u32, new_height: u32) {
        self.width = new_width;
        self.height = new_height;
        self.canvas = Pixmap::new(new_width, new_height);
        if let Some(canvas) = self.canvas.as_mut() {
            canvas.fill(gray(BACKGROUND));
        }
        self.field_key = None;
        self.column_map.clear();
        self.column_map_field_width = 0;
        self.row_buffer.clear();
        self.first_frame = true;
        debug!(width = new_width, height = new_height, "renderer resized");
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn has_surface(&self) -> bool {
        self.canvas.is_some()
    }

    /// Noise samples across and down the display
    pub fn field_dims(&self) -> (u32, u32) {
        (
            (self.width / self.block_px).max(1),
            (self.height / self.block_px).max(1),
        )
    }

    pub fn field(&self) -> &NoiseField {
        &self.field
    }

    pub fn canvas_data(&self) -> Option<&[u8]> {
        self.canvas.as_ref().map(|c| c.data())
    }

    /// Draw `content` and copy the result to `frame_buffer` (RGBA8, display-sized)
    pub fn render_frame<T: Timer<Timestamp = u64>>(
        &mut self,
        content: &FrameContent,
        frame_buffer: &mut [u8],
        timer: &mut T,
    ) -> Result<FrameStats> {
        let expected = self.width as usize * self.height as usize * 4;
        if self.canvas.is_none() || frame_buffer.len() != expected {
            trace!(
                have = frame_buffer.len(),
                expected,
                "no drawable surface, skipping frame"
            );
            return Ok(FrameStats::skipped());
        }

        let t_start = timer.now();
        let mut stats = FrameStats::default();

        if self.first_frame {
            self.first_frame = false;
            frame_buffer.fill(BACKGROUND);
            for px in frame_buffer.chunks_exact_mut(4) {
                px[3] = 255;
            }
        }

        let t_draw = timer.now();
        match *content {
            FrameContent::Blank => self.draw_blank(),
            FrameContent::Fixation => self.draw_fixation(),
            FrameContent::Noise { seed, contrast_pct } => {
                stats.field = self.draw_noise(seed, contrast_pct);
            }
        }
        stats.draw = timer.elapsed(t_draw);

        let t_copy = timer.now();
        if let Some(canvas) = self.canvas.as_ref() {
            frame_buffer.copy_from_slice(canvas.data());
        }
        stats.copy = timer.elapsed(t_copy);

        stats.total = timer.elapsed(t_start);
        timer.record_frame(stats.total);
        Ok(stats)
    }

    fn rebuild_column_map(&mut self, field_width: u32) {
        if self.column_map.len() == self.width as usize
            && self.column_map_field_width == field_width
        {
            return;
        }
        self.column_map = (0..self.width as u64)
            .map(|x| ((x * field_width as u64) / self.width.max(1) as u64) as u32)
            .collect();
        self.column_map_field_width = field_width;
        self.row_buffer = vec![0u32; self.width as usize];
    }

    fn blit_field(&mut self) {
        let Some(canvas) = self.canvas.as_mut() else {
            return;
        };
        let width = self.width as usize;
        let height = self.height as usize;
        let fw = self.field.width() as usize;
        let fh = self.field.height() as u64;
        let stride = width * 4;
        let data = canvas.data_mut();

        let mut current_src_row = usize::MAX;
        for y in 0..height {
            let src_row = ((y as u64 * fh) / height as u64) as usize;
            if src_row != current_src_row {
                let base = src_row * fw;
                for (dst, &sx) in self.row_buffer.iter_mut().zip(self.column_map.iter()) {
                    let l = self.field.luma(base + sx as usize);
                    *dst = u32::from_ne_bytes([l, l, l, 255]);
                }
                current_src_row = src_row;
            }
            let bytes: &[u8] = cast_slice(&self.row_buffer);
            data[y * stride..(y + 1) * stride].copy_from_slice(bytes);
        }
    }

    fn draw_fixation_dot(&mut self) {
        let Some(canvas) = self.canvas.as_mut() else {
            return;
        };
        let radius = (self.width as f32 * 0.008).clamp(4.0, 8.0);
        let Some(path) =
            PathBuilder::from_circle(self.width as f32 / 2.0, self.height as f32 / 2.0, radius)
        else {
            return;
        };
        let mut paint = Paint::default();
        paint.set_color(gray(FIXATION));
        paint.anti_alias = true;
        canvas.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
    }
}

impl StimulusRenderer for NoiseRenderer {
    fn draw_blank(&mut self) {
        if let Some(canvas) = self.canvas.as_mut() {
            canvas.fill(gray(BACKGROUND));
        }
    }

    fn draw_fixation(&mut self) {
        self.draw_blank();
        self.draw_fixation_dot();
    }

    fn draw_noise(&mut self, seed: u32, contrast_pct: f64) -> Option<FieldStats> {
        if self.canvas.is_none() {
            return None;
        }
        let (fw, fh) = self.field_dims();
        let key = FieldKey {
            seed,
            contrast_bits: contrast_pct.to_bits(),
            width: fw,
            height: fh,
        };

        // Between stimulus updates the same field is shown again; skip resynthesis
        let mut synthesized = None;
        if self.field_key != Some(key) {
            let stats = self.field.synthesize(seed, contrast_pct, fw, fh);
            trace!(seed, contrast_pct, sd = stats.std_dev, "noise field synthesized");
            self.field_key = Some(key);
            synthesized = Some(stats);
        }
        self.rebuild_column_map(fw);
        self.blit_field();
        self.draw_fixation_dot();
        synthesized
    }
}

fn gray(level: u8) -> Color {
    Color::from_rgba8(level, level, level, 255)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{target_std_dev, MID_GRAY};
    use approx::assert_relative_eq;
    use vss_timing::ManualTimer;

    fn pixel(buf: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * width + x) * 4) as usize;
        [buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]
    }

    #[test]
    fn blank_frame_is_uniform_gray() {
        let mut r = NoiseRenderer::new(64, 48, 2);
        let mut fb = vec![0u8; 64 * 48 * 4];
        let mut timer = ManualTimer::new();
        let stats = r.render_frame(&FrameContent::Blank, &mut fb, &mut timer).unwrap();
        assert!(!stats.skipped);
        assert!(fb.chunks_exact(4).all(|p| p == [127, 127, 127, 255]));
    }

    #[test]
    fn fixation_dot_is_drawn_at_centre() {
        let mut r = NoiseRenderer::new(100, 80, 2);
        let mut fb = vec![0u8; 100 * 80 * 4];
        let mut timer = ManualTimer::new();
        r.render_frame(&FrameContent::Fixation, &mut fb, &mut timer).unwrap();
        assert_eq!(pixel(&fb, 100, 50, 40), [51, 51, 51, 255]);
        assert_eq!(pixel(&fb, 100, 2, 2), [127, 127, 127, 255]);
    }

    #[test]
    fn noise_frame_uses_blocks_and_keeps_fixation() {
        let mut r = NoiseRenderer::new(200, 120, 2);
        let mut fb = vec![0u8; 200 * 120 * 4];
        let mut timer = ManualTimer::new();
        let content = FrameContent::Noise {
            seed: 12_446,
            contrast_pct: 40.0,
        };
        let stats = r.render_frame(&content, &mut fb, &mut timer).unwrap();
        let field = stats.field.expect("fresh field");
        assert_relative_eq!(field.std_dev, target_std_dev(40.0), max_relative = 1e-9);
        assert_relative_eq!(field.mean, MID_GRAY, epsilon = 1e-9);

        // 2x2 blocks share one sample
        assert_eq!(pixel(&fb, 200, 10, 10), pixel(&fb, 200, 11, 11));
        assert_eq!(pixel(&fb, 200, 10, 10), pixel(&fb, 200, 11, 10));
        // grayscale and opaque
        let p = pixel(&fb, 200, 31, 7);
        assert_eq!(p[0], p[1]);
        assert_eq!(p[1], p[2]);
        assert_eq!(p[3], 255);
        assert_eq!(pixel(&fb, 200, 100, 60), [51, 51, 51, 255]);
    }

    #[test]
    fn repeated_noise_frame_is_not_resynthesized() {
        let mut r = NoiseRenderer::new(40, 40, 2);
        let mut fb = vec![0u8; 40 * 40 * 4];
        let mut timer = ManualTimer::new();
        let content = FrameContent::Noise {
            seed: 3,
            contrast_pct: 10.0,
        };
        assert!(r.render_frame(&content, &mut fb, &mut timer).unwrap().field.is_some());
        assert!(r.render_frame(&content, &mut fb, &mut timer).unwrap().field.is_none());
        let next = FrameContent::Noise {
            seed: 32,
            contrast_pct: 10.0,
        };
        assert!(r.render_frame(&next, &mut fb, &mut timer).unwrap().field.is_some());
    }

    #[test]
    fn missing_surface_is_a_silent_no_op() {
        let mut r = NoiseRenderer::new(0, 0, 2);
        assert!(!r.has_surface());
        let mut fb = Vec::new();
        let mut timer = ManualTimer::new();
        let stats = r
            .render_frame(&FrameContent::Fixation, &mut fb, &mut timer)
            .unwrap();
        assert!(stats.skipped);
    }

    #[test]
    fn mismatched_buffer_is_skipped() {
        let mut r = NoiseRenderer::new(32, 32, 2);
        let mut fb = vec![0u8; 16];
        let mut timer = ManualTimer::new();
        let stats = r.render_frame(&FrameContent::Blank, &mut fb, &mut timer).unwrap();
        assert!(stats.skipped);
        assert!(fb.iter().all(|&b| b == 0));
    }

    #[test]
    fn resize_reallocates_field_and_clears() {
        let mut r = NoiseRenderer::new(40, 20, 2);
        let mut timer = ManualTimer::new();
        let mut fb = vec![0u8; 40 * 20 * 4];
        let content = FrameContent::Noise {
            seed: 9,
            contrast_pct: 20.0,
        };
        r.render_frame(&content, &mut fb, &mut timer).unwrap();
        assert_eq!((r.field().width(), r.field().height()), (20, 10));

        r.resize(60, 30);
        let mut fb = vec![0u8; 60 * 30 * 4];
        r.render_frame(&content, &mut fb, &mut timer).unwrap();
        assert_eq!((r.field().width(), r.field().height()), (30, 15));
        assert_eq!(r.field().values().len(), 30 * 15);
    }
}

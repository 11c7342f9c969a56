//! Raw depth preview: mirroring, tone mapping and pseudo-colouring.

use depthfuse_capture::DepthImage;
use image::{GrayImage, Luma, Rgb, RgbImage, imageops};

/// Depth (sensor units) mapped to full scale by [`tone_map`] by default.
pub const DEFAULT_MAX_DEPTH: f32 = 3000.0;

/// Mirror a depth image left to right.
pub fn mirror(depth: &mut DepthImage) {
    imageops::flip_horizontal_in_place(depth);
}

/// Linearly scale depth so `max_depth` maps to 255, saturating above it.
pub fn tone_map(depth: &DepthImage, max_depth: f32) -> GrayImage {
    let scale = if max_depth > 0.0 { 255.0 / max_depth } else { 0.0 };
    let (width, height) = depth.dimensions();

    GrayImage::from_fn(width, height, |x, y| {
        let value = f32::from(depth.get_pixel(x, y).0[0]) * scale;
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

// Parula, sampled at nine evenly spaced stops.
const PARULA: [[f32; 3]; 9] = [
    [53.0, 42.0, 135.0],
    [15.0, 92.0, 221.0],
    [18.0, 125.0, 216.0],
    [7.0, 156.0, 207.0],
    [21.0, 177.0, 180.0],
    [89.0, 189.0, 140.0],
    [165.0, 190.0, 107.0],
    [225.0, 185.0, 82.0],
    [249.0, 251.0, 14.0],
];

fn parula(level: u8) -> Rgb<u8> {
    let position = f32::from(level) / 255.0 * (PARULA.len() - 1) as f32;
    let lower = (position.floor() as usize).min(PARULA.len() - 2);
    let t = position - lower as f32;
    let (a, b) = (PARULA[lower], PARULA[lower + 1]);

    Rgb([
        (a[0] + (b[0] - a[0]) * t).round() as u8,
        (a[1] + (b[1] - a[1]) * t).round() as u8,
        (a[2] + (b[2] - a[2]) * t).round() as u8,
    ])
}

/// Render an 8-bit image through the parula colour map.
pub fn apply_color_map(gray: &GrayImage) -> RgbImage {
    let lut: Vec<Rgb<u8>> = (0..=255u8).map(parula).collect();
    let (width, height) = gray.dimensions();

    RgbImage::from_fn(width, height, |x, y| lut[gray.get_pixel(x, y).0[0] as usize])
}

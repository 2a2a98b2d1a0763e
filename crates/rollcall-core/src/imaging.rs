//! Grayscale crop/resize and tensor packing shared by the ONNX backends.

use crate::types::BoundingBox;
use ndarray::Array4;

/// Region of a frame cut out for a model, with the mapping back to frame
/// coordinates.
pub struct Crop {
    pub pixels: Vec<u8>,
    pub size: usize,
    /// Frame-space origin of the crop.
    pub origin: (f32, f32),
    /// Frame pixels per crop pixel along each axis.
    pub scale: (f32, f32),
}

impl Crop {
    /// Map a point given in normalized crop coordinates (0..1) to the frame.
    pub fn to_frame(&self, nx: f32, ny: f32) -> (f32, f32) {
        (
            self.origin.0 + nx * self.size as f32 * self.scale.0,
            self.origin.1 + ny * self.size as f32 * self.scale.1,
        )
    }
}

/// Bilinear resize of a grayscale image.
pub fn resize_bilinear(
    src: &[u8],
    width: usize,
    height: usize,
    new_w: usize,
    new_h: usize,
) -> Vec<u8> {
    let mut out = vec![0u8; new_w * new_h];
    if width == 0 || height == 0 || src.len() < width * height {
        return out;
    }

    let sx = width as f32 / new_w as f32;
    let sy = height as f32 / new_h as f32;

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * sy - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * sx - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * width + x0] as f32;
            let tr = src[y0 * width + x1] as f32;
            let bl = src[y1 * width + x0] as f32;
            let br = src[y1 * width + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            out[y * new_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

/// Cut `face` out of the frame and resize it to a `size` x `size` square.
///
/// Returns `None` when the box lies outside the frame.
pub fn crop_square(
    frame: &[u8],
    width: u32,
    height: u32,
    face: &BoundingBox,
    size: usize,
) -> Option<Crop> {
    let (x0, y0, x1, y1) = face.pixel_bounds(width, height)?;
    let w = width as usize;
    if frame.len() < w * height as usize {
        return None;
    }

    let crop_w = x1 - x0;
    let crop_h = y1 - y0;
    let mut region = Vec::with_capacity(crop_w * crop_h);
    for y in y0..y1 {
        region.extend_from_slice(&frame[y * w + x0..y * w + x1]);
    }

    Some(Crop {
        pixels: resize_bilinear(&region, crop_w, crop_h, size, size),
        size,
        origin: (x0 as f32, y0 as f32),
        scale: (crop_w as f32 / size as f32, crop_h as f32 / size as f32),
    })
}

/// Pack grayscale pixels into an NCHW tensor, replicating Y into `channels`.
pub fn to_nchw(
    pixels: &[u8],
    width: usize,
    height: usize,
    channels: usize,
    mean: f32,
    std: f32,
) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, channels, height, width));
    for y in 0..height {
        for x in 0..width {
            let pixel = pixels.get(y * width + x).copied().unwrap_or(0) as f32;
            let normalized = (pixel - mean) / std;
            for c in 0..channels {
                tensor[[0, c, y, x]] = normalized;
            }
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_uniform_stays_uniform() {
        let src = vec![128u8; 100 * 100];
        let out = resize_bilinear(&src, 100, 100, 37, 211);
        assert_eq!(out.len(), 37 * 211);
        assert!(out.iter().all(|&p| p == 128));
    }

    #[test]
    fn test_resize_short_buffer_is_blank() {
        let out = resize_bilinear(&[1, 2, 3], 10, 10, 4, 4);
        assert_eq!(out, vec![0u8; 16]);
    }

    #[test]
    fn test_crop_square_maps_back_to_frame() {
        let frame = vec![50u8; 200 * 100];
        let face = BoundingBox { x: 20.0, y: 10.0, width: 80.0, height: 40.0, confidence: 1.0 };
        let crop = crop_square(&frame, 200, 100, &face, 16).unwrap();
        assert_eq!(crop.pixels.len(), 16 * 16);
        assert_eq!(crop.to_frame(0.0, 0.0), (20.0, 10.0));
        let (x, y) = crop.to_frame(1.0, 1.0);
        assert!((x - 100.0).abs() < 1e-4);
        assert!((y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_crop_outside_frame() {
        let frame = vec![0u8; 10 * 10];
        let face = BoundingBox { x: 50.0, y: 50.0, width: 5.0, height: 5.0, confidence: 1.0 };
        assert!(crop_square(&frame, 10, 10, &face, 8).is_none());
    }

    #[test]
    fn test_to_nchw_channels_identical() {
        let pixels = vec![100u8; 4 * 3];
        let t = to_nchw(&pixels, 4, 3, 3, 127.5, 127.5);
        assert_eq!(t.shape(), &[1, 3, 3, 4]);
        let expected = (100.0 - 127.5) / 127.5;
        for c in 0..3 {
            assert!((t[[0, c, 2, 3]] - expected).abs() < 1e-6);
        }
    }
}

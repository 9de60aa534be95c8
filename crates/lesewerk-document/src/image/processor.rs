// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image processor — decode, area-averaging downscale, expanded-canvas rotation,
// clamped crop, grayscale, and PNG encoding. Operates on in-memory images using
// the `image` crate.

use image::{DynamicImage, ImageBuffer, ImageFormat, Pixel};
use lesewerk_core::error::{LesewerkError, Result};
use lesewerk_core::ImageSize;
use tracing::{debug, instrument};

/// Image processing helpers operating on a single in-memory image.
///
/// Each transforming method consumes `self` and returns a new
/// `ImageProcessor`, enabling method chaining.
///
/// ```ignore
/// let png = ImageProcessor::from_bytes(&bytes)?
///     .fit_within(1024, 1024)
///     .0
///     .rotate_expanded(2.5)
///     .to_png_bytes()?;
/// ```
pub struct ImageProcessor {
    /// The current working image.
    image: DynamicImage,
}

impl ImageProcessor {
    // -- Construction ---------------------------------------------------------

    /// Decode raw encoded bytes (PNG, JPEG, ...).
    ///
    /// # Errors
    ///
    /// Returns [`LesewerkError::Decode`] when the bytes are not a raster image.
    #[instrument(skip(data), fields(data_len = data.len()))]
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let img = image::load_from_memory(data)
            .map_err(|err| LesewerkError::Decode(format!("failed to decode image: {}", err)))?;
        debug!(
            width = img.width(),
            height = img.height(),
            "Image decoded from bytes"
        );
        Ok(Self { image: img })
    }

    /// Wrap an already-decoded `DynamicImage`.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        Self { image }
    }

    // -- Accessors ------------------------------------------------------------

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.image.width(), self.image.height())
    }

    /// Borrow the underlying `DynamicImage`.
    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }

    /// Consume the processor and return the underlying `DynamicImage`.
    pub fn into_dynamic(self) -> DynamicImage {
        self.image
    }

    // -- Transformations ------------------------------------------------------

    /// Downscale to fit within `max_width` x `max_height`, preserving aspect
    /// ratio, using area averaging. Never upscales.
    ///
    /// Returns the processor and whether the image was actually resized.
    #[instrument(skip(self))]
    pub fn fit_within(self, max_width: u32, max_height: u32) -> (Self, bool) {
        let (w, h) = (self.width(), self.height());
        if w <= max_width && h <= max_height {
            return (self, false);
        }

        let scale = (max_width as f64 / w as f64).min(max_height as f64 / h as f64);
        let new_w = ((w as f64 * scale).round() as u32).clamp(1, max_width);
        let new_h = ((h as f64 * scale).round() as u32).clamp(1, max_height);

        debug!(from_w = w, from_h = h, new_w, new_h, scale, "Area-resizing image");
        let resized = match &self.image {
            DynamicImage::ImageLuma8(buf) => DynamicImage::ImageLuma8(area_resample(buf, new_w, new_h)),
            DynamicImage::ImageRgb8(buf) => DynamicImage::ImageRgb8(area_resample(buf, new_w, new_h)),
            other => DynamicImage::ImageRgba8(area_resample(&other.to_rgba8(), new_w, new_h)),
        };
        (Self { image: resized }, true)
    }

    /// Rotate counter-clockwise by `degrees` about the image centre.
    ///
    /// The canvas grows to hold the whole rotated image and uncovered pixels
    /// replicate the nearest source border, so nothing is cropped and no
    /// artificial background is introduced.
    #[instrument(skip(self))]
    pub fn rotate_expanded(self, degrees: f64) -> Self {
        if degrees == 0.0 || self.width() == 0 || self.height() == 0 {
            return self;
        }
        let rotated = match &self.image {
            DynamicImage::ImageLuma8(buf) => {
                DynamicImage::ImageLuma8(rotate_with_replicated_border(buf, degrees))
            }
            DynamicImage::ImageRgb8(buf) => {
                DynamicImage::ImageRgb8(rotate_with_replicated_border(buf, degrees))
            }
            other => DynamicImage::ImageRgba8(rotate_with_replicated_border(&other.to_rgba8(), degrees)),
        };
        debug!(
            new_w = rotated.width(),
            new_h = rotated.height(),
            "Rotation applied"
        );
        Self { image: rotated }
    }

    /// Crop a rectangle clamped to the image bounds.
    ///
    /// Returns `None` when nothing of the rectangle lies inside the image.
    pub fn crop_clamped(&self, x: i64, y: i64, width: i64, height: i64) -> Option<DynamicImage> {
        let img_w = self.width() as i64;
        let img_h = self.height() as i64;

        let x0 = x.clamp(0, img_w);
        let y0 = y.clamp(0, img_h);
        let x1 = x.saturating_add(width).clamp(0, img_w);
        let y1 = y.saturating_add(height).clamp(0, img_h);

        if x1 - x0 <= 0 || y1 - y0 <= 0 {
            return None;
        }
        Some(self.image.crop_imm(
            x0 as u32,
            y0 as u32,
            (x1 - x0) as u32,
            (y1 - y0) as u32,
        ))
    }

    // -- Output ---------------------------------------------------------------

    /// Encode the current image as PNG bytes.
    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        encode_to_format(&self.image, ImageFormat::Png)
    }
}

/// Encode a `DynamicImage` into the specified format, returning the raw bytes.
pub fn encode_to_format(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);
    image
        .write_to(&mut cursor, format)
        .map_err(|err| LesewerkError::Decode(format!("image encoding failed: {}", err)))?;
    Ok(buffer)
}

// -- Area resampling ----------------------------------------------------------

/// For every destination index along one axis, the contributing source
/// indices and their weights (summing to 1).
fn area_spans(src_len: u32, dst_len: u32) -> Vec<Vec<(usize, f32)>> {
    let scale = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|i| {
            let start = i as f64 * scale;
            let end = ((i + 1) as f64 * scale).min(src_len as f64);
            let first = start.floor() as usize;
            let last = (end.ceil() as usize).min(src_len as usize);
            (first..last)
                .filter_map(|s| {
                    let overlap = end.min(s as f64 + 1.0) - start.max(s as f64);
                    (overlap > 0.0).then(|| (s, (overlap / (end - start)) as f32))
                })
                .collect()
        })
        .collect()
}

/// Separable area-averaging resample (equivalent to pixel-area interpolation
/// when shrinking).
fn area_resample<P>(src: &ImageBuffer<P, Vec<u8>>, new_w: u32, new_h: u32) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let (w, h) = src.dimensions();
    let channels = P::CHANNEL_COUNT as usize;
    let x_spans = area_spans(w, new_w);
    let y_spans = area_spans(h, new_h);
    let raw: &[u8] = src;

    // Horizontal pass: w x h -> new_w x h.
    let mut tmp = vec![0f32; new_w as usize * h as usize * channels];
    for y in 0..h as usize {
        for (ox, span) in x_spans.iter().enumerate() {
            let dst = (y * new_w as usize + ox) * channels;
            for &(sx, weight) in span {
                let s = (y * w as usize + sx) * channels;
                for c in 0..channels {
                    tmp[dst + c] += raw[s + c] as f32 * weight;
                }
            }
        }
    }

    // Vertical pass: new_w x h -> new_w x new_h.
    let mut out = ImageBuffer::<P, Vec<u8>>::new(new_w, new_h);
    let out_raw: &mut [u8] = &mut out;
    for (oy, span) in y_spans.iter().enumerate() {
        for ox in 0..new_w as usize {
            let dst = (oy * new_w as usize + ox) * channels;
            for c in 0..channels {
                let acc: f32 = span
                    .iter()
                    .map(|&(sy, weight)| tmp[(sy * new_w as usize + ox) * channels + c] * weight)
                    .sum();
                out_raw[dst + c] = acc.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

// -- Rotation -----------------------------------------------------------------

/// Rotate counter-clockwise (as displayed) by `degrees`, growing the canvas
/// and sampling bilinearly with border replication.
fn rotate_with_replicated_border<P>(src: &ImageBuffer<P, Vec<u8>>, degrees: f64) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let (w, h) = src.dimensions();
    if w == 0 || h == 0 {
        return src.clone();
    }
    let (sin, cos) = degrees.to_radians().sin_cos();
    let new_w = ((h as f64 * sin.abs() + w as f64 * cos.abs()).round() as u32).max(1);
    let new_h = ((h as f64 * cos.abs() + w as f64 * sin.abs()).round() as u32).max(1);

    let (cx_src, cy_src) = ((w as f64 - 1.0) / 2.0, (h as f64 - 1.0) / 2.0);
    let (cx_dst, cy_dst) = ((new_w as f64 - 1.0) / 2.0, (new_h as f64 - 1.0) / 2.0);

    let channels = P::CHANNEL_COUNT as usize;
    let max_x = (w - 1) as f64;
    let max_y = (h - 1) as f64;
    let mut out = ImageBuffer::<P, Vec<u8>>::new(new_w, new_h);

    for (x, y, px) in out.enumerate_pixels_mut() {
        // Inverse of the forward map x' = x cos + y sin, y' = -x sin + y cos.
        let dx = x as f64 - cx_dst;
        let dy = y as f64 - cy_dst;
        let sx = (dx * cos - dy * sin + cx_src).clamp(0.0, max_x);
        let sy = (dx * sin + dy * cos + cy_src).clamp(0.0, max_y);

        let x0 = sx.floor() as u32;
        let y0 = sy.floor() as u32;
        let x1 = (x0 + 1).min(w - 1);
        let y1 = (y0 + 1).min(h - 1);
        let fx = sx - x0 as f64;
        let fy = sy - y0 as f64;

        let p00 = src.get_pixel(x0, y0).channels();
        let p10 = src.get_pixel(x1, y0).channels();
        let p01 = src.get_pixel(x0, y1).channels();
        let p11 = src.get_pixel(x1, y1).channels();
        let dst = px.channels_mut();
        for c in 0..channels {
            let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
            let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
            dst[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn from_bytes_rejects_garbage() {
        let err = ImageProcessor::from_bytes(b"definitely not an image").err();
        assert!(matches!(err, Some(LesewerkError::Decode(_))));
    }

    #[test]
    fn png_round_trip_preserves_size() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(37, 21, Luma([90u8])));
        let bytes = ImageProcessor::from_dynamic(img).to_png_bytes().unwrap();
        let decoded = ImageProcessor::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.size(), ImageSize::new(37, 21));
    }

    #[test]
    fn fit_within_is_noop_inside_bounds() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(100, 80, Luma([7u8])));
        let (processor, resized) = ImageProcessor::from_dynamic(img).fit_within(100, 100);
        assert!(!resized);
        assert_eq!(processor.size(), ImageSize::new(100, 80));
    }

    #[test]
    fn fit_within_preserves_aspect_ratio() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(2000, 3000, Rgb([10, 20, 30])));
        let (processor, resized) = ImageProcessor::from_dynamic(img).fit_within(1024, 1024);
        assert!(resized);
        assert_eq!(processor.height(), 1024);
        assert_eq!(processor.width(), 683);
    }

    #[test]
    fn area_resample_averages_blocks() {
        // 4x1 image [0, 100, 200, 100] halved -> [50, 150].
        let mut img = GrayImage::new(4, 1);
        for (x, v) in [0u8, 100, 200, 100].into_iter().enumerate() {
            img.put_pixel(x as u32, 0, Luma([v]));
        }
        let out = area_resample(&img, 2, 1);
        assert_eq!(out.get_pixel(0, 0).0[0], 50);
        assert_eq!(out.get_pixel(1, 0).0[0], 150);
    }

    #[test]
    fn rotation_expands_canvas() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(100, 50, Luma([200u8])));
        let rotated = ImageProcessor::from_dynamic(img).rotate_expanded(90.0);
        assert_eq!(rotated.width(), 50);
        assert_eq!(rotated.height(), 100);
    }

    #[test]
    fn rotation_replicates_border_instead_of_filling() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(60, 40, Luma([123u8])));
        let rotated = ImageProcessor::from_dynamic(img).rotate_expanded(10.0);
        let gray = rotated.into_dynamic().to_luma8();
        assert!(gray.pixels().all(|p| p.0[0] == 123));
    }

    #[test]
    fn crop_clamped_handles_out_of_bounds() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(50, 50, Luma([0u8])));
        let processor = ImageProcessor::from_dynamic(img);
        let crop = processor.crop_clamped(-10, 40, 30, 30).unwrap();
        assert_eq!((crop.width(), crop.height()), (20, 10));
        assert!(processor.crop_clamped(60, 0, 10, 10).is_none());
        assert!(processor.crop_clamped(10, 10, 0, 5).is_none());
    }
}

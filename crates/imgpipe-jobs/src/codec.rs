//! [`ImageCodec`] backed by the `image` crate.

use bytes::Bytes;
use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, Rgba, RgbaImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imgpipe_core::codec::TransformStep;
use imgpipe_core::{CodecError, ImageCodec, ImageFormat, Transform, TransformOutput};
use std::io::Cursor;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Pure-Rust codec.
///
/// Positive angles rotate clockwise. Quarter turns are lossless; any other
/// angle grows the canvas to fit the turned image and leaves the uncovered
/// corners transparent. Output keeps the source format unless the transform
/// converts.
#[derive(Debug, Clone)]
pub struct ImageRsCodec {
    filter: FilterType,
}

impl Default for ImageRsCodec {
    fn default() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }
}

impl ImageRsCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    fn rotate(img: DynamicImage, degrees: f64) -> Result<DynamicImage, CodecError> {
        if !degrees.is_finite() {
            return Err(CodecError::invalid(format!(
                "rotation must be a finite angle, got {degrees}"
            )));
        }
        let normalized = degrees.rem_euclid(360.0);
        if normalized % 90.0 != 0.0 {
            return Ok(DynamicImage::ImageRgba8(rotate_free(&img.to_rgba8(), normalized)));
        }
        Ok(match normalized as u32 {
            90 => img.rotate90(),
            180 => img.rotate180(),
            270 => img.rotate270(),
            _ => img,
        })
    }

    fn encode(img: &DynamicImage, format: ImageFormat) -> Result<Bytes, CodecError> {
        // JPEG has no alpha channel; GIF and WebP encoders want RGBA
        let converted;
        let img = match format {
            ImageFormat::Jpeg => {
                converted = DynamicImage::ImageRgb8(img.to_rgb8());
                &converted
            }
            ImageFormat::Webp | ImageFormat::Gif => {
                converted = DynamicImage::ImageRgba8(img.to_rgba8());
                &converted
            }
            _ => img,
        };

        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, to_image_format(format))
            .map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(Bytes::from(out.into_inner()))
    }
}

/// Rotate onto a canvas sized to the bounding box of the turned image
fn rotate_free(src: &RgbaImage, degrees: f64) -> RgbaImage {
    let (w, h) = src.dimensions();
    let radians = degrees.to_radians();
    let (sin, cos) = (radians.sin().abs(), radians.cos().abs());
    let out_w = ((f64::from(w) * cos + f64::from(h) * sin).round() as u32).max(1);
    let out_h = ((f64::from(w) * sin + f64::from(h) * cos).round() as u32).max(1);

    // must hold both the source and the result before cropping
    let (canvas_w, canvas_h) = (out_w.max(w), out_h.max(h));
    let mut canvas = RgbaImage::from_pixel(canvas_w, canvas_h, TRANSPARENT);
    imageops::overlay(
        &mut canvas,
        src,
        i64::from((canvas_w - w) / 2),
        i64::from((canvas_h - h) / 2),
    );

    let turned = rotate_about_center(&canvas, radians as f32, Interpolation::Bilinear, TRANSPARENT);
    imageops::crop_imm(
        &turned,
        (canvas_w - out_w) / 2,
        (canvas_h - out_h) / 2,
        out_w,
        out_h,
    )
    .to_image()
}

fn to_image_format(format: ImageFormat) -> image::ImageFormat {
    match format {
        ImageFormat::Png => image::ImageFormat::Png,
        ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        ImageFormat::Webp => image::ImageFormat::WebP,
        ImageFormat::Gif => image::ImageFormat::Gif,
        ImageFormat::Bmp => image::ImageFormat::Bmp,
        ImageFormat::Tiff => image::ImageFormat::Tiff,
    }
}

fn from_image_format(format: image::ImageFormat) -> Option<ImageFormat> {
    match format {
        image::ImageFormat::Png => Some(ImageFormat::Png),
        image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
        image::ImageFormat::WebP => Some(ImageFormat::Webp),
        image::ImageFormat::Gif => Some(ImageFormat::Gif),
        image::ImageFormat::Bmp => Some(ImageFormat::Bmp),
        image::ImageFormat::Tiff => Some(ImageFormat::Tiff),
        _ => None,
    }
}

impl ImageCodec for ImageRsCodec {
    fn apply(&self, source: &[u8], transform: &Transform) -> Result<TransformOutput, CodecError> {
        let source_format = image::guess_format(source)
            .ok()
            .and_then(from_image_format)
            .unwrap_or(ImageFormat::Png);
        let mut img =
            image::load_from_memory(source).map_err(|e| CodecError::Decode(e.to_string()))?;
        let mut format = source_format;

        for step in transform.steps() {
            img = match step {
                TransformStep::Resize { width, height } => {
                    if *width == 0 || *height == 0 {
                        return Err(CodecError::invalid("dimensions must be greater than zero"));
                    }
                    img.resize_exact(*width, *height, self.filter)
                }
                TransformStep::Rotate { degrees } => Self::rotate(img, *degrees)?,
                TransformStep::Flip => img.flipv(),
                TransformStep::Mirror => img.fliph(),
                TransformStep::Convert(target) => {
                    format = *target;
                    img
                }
            };
        }

        let bytes = Self::encode(&img, format)?;
        let (width, height) = img.dimensions();
        Ok(TransformOutput {
            bytes,
            width,
            height,
            format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 10, 10, 255]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_resize_exact() {
        let out = ImageRsCodec::new()
            .apply(&png(4, 2), &Transform::new().resize(8, 6))
            .unwrap();
        assert_eq!((out.width, out.height), (8, 6));
        assert_eq!(out.format, ImageFormat::Png);
    }

    #[test]
    fn test_quarter_turn_swaps_dimensions() {
        let out = ImageRsCodec::new()
            .apply(&png(4, 2), &Transform::new().rotate(-90.0))
            .unwrap();
        assert_eq!((out.width, out.height), (2, 4));
    }

    #[test]
    fn test_free_rotation_grows_canvas() {
        let out = ImageRsCodec::new()
            .apply(&png(40, 20), &Transform::new().rotate(45.0))
            .unwrap();
        assert_eq!((out.width, out.height), (42, 42));

        let img = image::load_from_memory(&out.bytes).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(0, 0)[3], 0);
        assert_eq!(img.get_pixel(21, 21)[3], 255);
    }

    #[test]
    fn test_small_angle_keeps_roughly_the_same_box() {
        let out = ImageRsCodec::new()
            .apply(&png(100, 10), &Transform::new().rotate(-10.0))
            .unwrap();
        // 100 * cos(10) + 10 * sin(10), 100 * sin(10) + 10 * cos(10)
        assert_eq!((out.width, out.height), (100, 27));
    }

    #[test]
    fn test_non_finite_rotation_is_invalid() {
        let err = ImageRsCodec::new()
            .apply(&png(4, 2), &Transform::new().rotate(f64::NAN))
            .unwrap_err();
        assert!(err.is_permanent());
    }

    #[test]
    fn test_convert_to_jpeg() {
        let out = ImageRsCodec::new()
            .apply(&png(3, 3), &Transform::new().mirror().convert(ImageFormat::Jpeg))
            .unwrap();
        assert_eq!(out.format, ImageFormat::Jpeg);
        assert_eq!(&out.bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = ImageRsCodec::new()
            .apply(b"not an image", &Transform::new().flip())
            .unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
        assert!(!err.is_permanent());
    }
}

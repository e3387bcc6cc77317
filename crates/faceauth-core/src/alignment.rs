//! Face alignment to a canonical square crop.
//!
//! Detections carrying both eye landmarks are aligned with a 4-DOF similarity
//! transform: rotated so the eyes are level, scaled to a fixed inter-ocular
//! distance, and translated so the eye midpoint lands at a fixed position.
//! Detections without eyes fall back to a padded bounding-box crop.

use crate::types::{BoundingBox, FaceDetection, Point};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Side length of the canonical face expected by the embedding model.
pub const CANONICAL_SIZE: u32 = 112;

const DEFAULT_EYE_DISTANCE_FRACTION: f32 = 0.4;
const DEFAULT_EYE_LINE_FRACTION: f32 = 1.0 / 3.0;
const MIN_EYE_DISTANCE: f32 = 1e-3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignError {
    #[error("degenerate alignment geometry: {0}")]
    DegenerateGeometry(String),
    #[error("face crop is empty after clamping to the {width}x{height} image")]
    EmptyCrop { width: u32, height: u32 },
    #[error("invalid target size: {0}")]
    InvalidTargetSize(u32),
}

/// Padding policy for the bounding-box fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackCrop {
    /// 30% of the box width/height on each side.
    #[default]
    Standard,
    /// 20% on each side.
    Simple,
}

impl FallbackCrop {
    pub fn padding(self) -> f32 {
        match self {
            FallbackCrop::Standard => 0.3,
            FallbackCrop::Simple => 0.2,
        }
    }
}

/// Geometry policy for alignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    pub target_size: u32,
    /// Inter-ocular distance as a fraction of the output width.
    pub eye_distance_fraction: f32,
    /// Height of the eye line as a fraction of the output height.
    pub eye_line_fraction: f32,
    pub fallback: FallbackCrop,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            target_size: CANONICAL_SIZE,
            eye_distance_fraction: DEFAULT_EYE_DISTANCE_FRACTION,
            eye_line_fraction: DEFAULT_EYE_LINE_FRACTION,
            fallback: FallbackCrop::Standard,
        }
    }
}

/// A geometrically normalized square RGB face crop, ready for embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalFace {
    image: RgbImage,
}

impl CanonicalFace {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

/// How a detection is turned into a canonical face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlignmentStrategy {
    Eyes { left: Point, right: Point },
    BoundingBox { rect: BoundingBox, padding: f32 },
}

impl AlignmentStrategy {
    /// Eye-based alignment when both eyes are present, otherwise a padded crop.
    pub fn select(detection: &FaceDetection, fallback: FallbackCrop) -> Self {
        match detection.landmarks.eyes() {
            Some((left, right)) => AlignmentStrategy::Eyes { left, right },
            None => AlignmentStrategy::BoundingBox {
                rect: detection.bounding_box,
                padding: fallback.padding(),
            },
        }
    }
}

/// Similarity transform from source pixels to canonical output pixels:
/// `p' = s * R(-angle) * (p - center) + origin`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    cos: f32,
    sin: f32,
    scale: f32,
    center: Point,
    origin: Point,
}

impl SimilarityTransform {
    pub fn from_eyes(left: Point, right: Point, config: &AlignConfig) -> Result<Self, AlignError> {
        let dx = right.x - left.x;
        let dy = right.y - left.y;
        let distance = (dx * dx + dy * dy).sqrt();
        if !distance.is_finite() || distance < MIN_EYE_DISTANCE {
            return Err(AlignError::DegenerateGeometry(format!("inter-eye distance {distance}")));
        }

        let angle = dy.atan2(dx);
        let size = config.target_size as f32;

        // A zero or NaN scale would warp every capture to the same black crop.
        let scale = size * config.eye_distance_fraction / distance;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(AlignError::DegenerateGeometry(format!(
                "scale {scale} from eye distance fraction {}",
                config.eye_distance_fraction
            )));
        }
        let eye_line = config.eye_line_fraction;
        if !eye_line.is_finite() || eye_line <= 0.0 || eye_line >= 1.0 {
            return Err(AlignError::DegenerateGeometry(format!("eye line fraction {eye_line}")));
        }

        Ok(Self {
            cos: angle.cos(),
            sin: angle.sin(),
            scale,
            center: Point::new((left.x + right.x) / 2.0, (left.y + right.y) / 2.0),
            origin: Point::new(size / 2.0, size * config.eye_line_fraction),
        })
    }

    /// Rotation removed by the transform, in radians.
    pub fn angle(&self) -> f32 {
        self.sin.atan2(self.cos)
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Map a source point into output space.
    pub fn apply(&self, p: Point) -> Point {
        let x = p.x - self.center.x;
        let y = p.y - self.center.y;
        let rx = self.cos * x + self.sin * y;
        let ry = -self.sin * x + self.cos * y;
        Point::new(self.scale * rx + self.origin.x, self.scale * ry + self.origin.y)
    }

    /// Map an output point back into source space.
    pub fn invert(&self, p: Point) -> Point {
        let x = (p.x - self.origin.x) / self.scale;
        let y = (p.y - self.origin.y) / self.scale;
        let rx = self.cos * x - self.sin * y;
        let ry = self.sin * x + self.cos * y;
        Point::new(rx + self.center.x, ry + self.center.y)
    }
}

/// Resample `image` through `transform` into an `out_size`×`out_size` raster.
///
/// Uses bilinear interpolation. Out-of-bounds pixels are filled with black.
fn warp_similarity(image: &RgbImage, transform: &SimilarityTransform, out_size: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let sample = |x: i64, y: i64, c: usize| -> f32 {
        if x >= 0 && y >= 0 && x < width as i64 && y < height as i64 {
            image.get_pixel(x as u32, y as u32)[c] as f32
        } else {
            0.0
        }
    };

    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        let src = transform.invert(Point::new(ox as f32, oy as f32));
        let x0 = src.x.floor() as i64;
        let y0 = src.y.floor() as i64;
        let fx = src.x - x0 as f32;
        let fy = src.y - y0 as f32;

        let mut px = [0u8; 3];
        for (c, out) in px.iter_mut().enumerate() {
            let val = sample(x0, y0, c) * (1.0 - fx) * (1.0 - fy)
                + sample(x0 + 1, y0, c) * fx * (1.0 - fy)
                + sample(x0, y0 + 1, c) * (1.0 - fx) * fy
                + sample(x0 + 1, y0 + 1, c) * fx * fy;
            *out = val.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(px)
    })
}

/// Pixel bounds `(left, top, right, bottom)` of a padded box, clamped to the image.
fn crop_bounds(rect: &BoundingBox, padding: f32, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let pad_x = (rect.width * padding).trunc();
    let pad_y = (rect.height * padding).trunc();

    let clamp_x = |v: f32| v.clamp(0.0, width as f32) as u32;
    let clamp_y = |v: f32| v.clamp(0.0, height as f32) as u32;

    let left = clamp_x((rect.x - pad_x).floor());
    let top = clamp_y((rect.y - pad_y).floor());
    let right = clamp_x((rect.right() + pad_x).ceil());
    let bottom = clamp_y((rect.bottom() + pad_y).ceil());

    (right > left && bottom > top).then_some((left, top, right, bottom))
}

fn crop_and_resize(
    image: &RgbImage,
    rect: &BoundingBox,
    padding: f32,
    target_size: u32,
) -> Result<RgbImage, AlignError> {
    let (width, height) = image.dimensions();
    let (left, top, right, bottom) =
        crop_bounds(rect, padding, width, height).ok_or(AlignError::EmptyCrop { width, height })?;

    let crop = imageops::crop_imm(image, left, top, right - left, bottom - top).to_image();
    Ok(imageops::resize(&crop, target_size, target_size, FilterType::Triangle))
}

/// Apply an already selected strategy.
pub fn align_with(
    image: &RgbImage,
    strategy: AlignmentStrategy,
    config: &AlignConfig,
) -> Result<CanonicalFace, AlignError> {
    if config.target_size == 0 {
        return Err(AlignError::InvalidTargetSize(config.target_size));
    }

    let aligned = match strategy {
        AlignmentStrategy::Eyes { left, right } => {
            let transform = SimilarityTransform::from_eyes(left, right, config)?;
            tracing::debug!(
                angle_deg = transform.angle().to_degrees(),
                scale = transform.scale(),
                "aligning on eyes"
            );
            warp_similarity(image, &transform, config.target_size)
        }
        AlignmentStrategy::BoundingBox { rect, padding } => {
            tracing::debug!(?rect, padding, "aligning on bounding box");
            crop_and_resize(image, &rect, padding, config.target_size)?
        }
    };

    Ok(CanonicalFace::new(aligned))
}

/// Align a detected face into a canonical `target_size`×`target_size` crop.
pub fn align(image: &RgbImage, detection: &FaceDetection, config: &AlignConfig) -> Result<CanonicalFace, AlignError> {
    align_with(image, AlignmentStrategy::select(detection, config.fallback), config)
}

/// Crop-and-resize with the tighter 20% padding, ignoring landmarks.
pub fn simple_align(image: &RgbImage, rect: &BoundingBox, target_size: u32) -> Result<CanonicalFace, AlignError> {
    let config = AlignConfig {
        target_size,
        ..AlignConfig::default()
    };
    align_with(
        image,
        AlignmentStrategy::BoundingBox {
            rect: *rect,
            padding: FallbackCrop::Simple.padding(),
        },
        &config,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Landmarks;

    fn paint_patch(image: &mut RgbImage, at: Point, radius: i64) {
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let x = at.x.round() as i64 + dx;
                let y = at.y.round() as i64 + dy;
                if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
                    image.put_pixel(x as u32, y as u32, Rgb([255, 255, 255]));
                }
            }
        }
    }

    fn max_near(image: &RgbImage, at: Point) -> u8 {
        let mut best = 0;
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let x = (at.x.round() as i64 + dx) as u32;
                let y = (at.y.round() as i64 + dy) as u32;
                if x < image.width() && y < image.height() {
                    best = best.max(image.get_pixel(x, y)[0]);
                }
            }
        }
        best
    }

    fn eyes_detection(left: Point, right: Point) -> FaceDetection {
        FaceDetection::new(BoundingBox::new(left.x - 20.0, left.y - 20.0, 80.0, 100.0)).with_landmarks(Landmarks {
            left_eye: Some(left),
            right_eye: Some(right),
            ..Landmarks::default()
        })
    }

    #[test]
    fn test_transform_places_eyes() {
        let config = AlignConfig::default();
        let t = SimilarityTransform::from_eyes(Point::new(80.0, 60.0), Point::new(120.0, 80.0), &config).unwrap();

        let size = config.target_size as f32;
        let l = t.apply(Point::new(80.0, 60.0));
        let r = t.apply(Point::new(120.0, 80.0));

        assert!((l.y - r.y).abs() < 1e-3, "eyes not level: {l:?} {r:?}");
        assert!((l.y - size / 3.0).abs() < 1e-3);
        assert!((r.x - l.x - size * 0.4).abs() < 1e-3);
        assert!(((l.x + r.x) / 2.0 - size / 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_transform_inverse() {
        let t = SimilarityTransform::from_eyes(Point::new(10.0, 40.0), Point::new(50.0, 10.0), &AlignConfig::default())
            .unwrap();
        let p = Point::new(33.0, 71.0);
        let back = t.invert(t.apply(p));
        assert!((back.x - p.x).abs() < 1e-3 && (back.y - p.y).abs() < 1e-3);
    }

    #[test]
    fn test_eye_alignment_output_size() {
        let image = RgbImage::from_pixel(640, 480, Rgb([128, 128, 128]));
        let det = eyes_detection(Point::new(300.0, 200.0), Point::new(340.0, 202.0));
        let face = align(&image, &det, &AlignConfig::default()).unwrap();
        assert_eq!(face.dimensions(), (CANONICAL_SIZE, CANONICAL_SIZE));
    }

    #[test]
    fn test_rotated_eyes_become_level() {
        // Eyes 40px apart on a 30° tilt around (100, 100).
        let mut image = RgbImage::new(200, 200);
        let angle = 30f32.to_radians();
        let (dx, dy) = (20.0 * angle.cos(), 20.0 * angle.sin());
        let left = Point::new(100.0 - dx, 100.0 - dy);
        let right = Point::new(100.0 + dx, 100.0 + dy);
        paint_patch(&mut image, left, 2);
        paint_patch(&mut image, right, 2);

        let face = align(&image, &eyes_detection(left, right), &AlignConfig::default()).unwrap();
        let out = face.image();

        let size = CANONICAL_SIZE as f32;
        let eye_y = size / 3.0;
        let expected_left = Point::new(size / 2.0 - size * 0.2, eye_y);
        let expected_right = Point::new(size / 2.0 + size * 0.2, eye_y);

        assert!(max_near(out, expected_left) > 100, "left eye not at {expected_left:?}");
        assert!(max_near(out, expected_right) > 100, "right eye not at {expected_right:?}");
        // Nothing bright well above the eye line.
        assert_eq!(max_near(out, Point::new(size / 2.0, 5.0)), 0);
    }

    #[test]
    fn test_coincident_eyes_are_degenerate() {
        let image = RgbImage::new(64, 64);
        let det = eyes_detection(Point::new(30.0, 30.0), Point::new(30.0, 30.0));
        assert!(matches!(
            align(&image, &det, &AlignConfig::default()),
            Err(AlignError::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn test_bad_geometry_config_is_degenerate() {
        let mut image = RgbImage::from_pixel(200, 200, Rgb([128, 128, 128]));
        let (left, right) = (Point::new(80.0, 90.0), Point::new(120.0, 90.0));
        paint_patch(&mut image, left, 2);
        paint_patch(&mut image, right, 2);
        let det = eyes_detection(left, right);

        for fraction in [0.0, -0.4, f32::NAN, f32::INFINITY] {
            let config = AlignConfig {
                eye_distance_fraction: fraction,
                ..AlignConfig::default()
            };
            assert!(
                matches!(align(&image, &det, &config), Err(AlignError::DegenerateGeometry(_))),
                "eye_distance_fraction {fraction} accepted"
            );
        }

        for fraction in [0.0, -0.2, 1.0, f32::NAN] {
            let config = AlignConfig {
                eye_line_fraction: fraction,
                ..AlignConfig::default()
            };
            assert!(
                matches!(align(&image, &det, &config), Err(AlignError::DegenerateGeometry(_))),
                "eye_line_fraction {fraction} accepted"
            );
        }
    }

    #[test]
    fn test_strategy_selection() {
        let boxed = FaceDetection::new(BoundingBox::new(10.0, 10.0, 40.0, 40.0));
        assert_eq!(
            AlignmentStrategy::select(&boxed, FallbackCrop::Simple),
            AlignmentStrategy::BoundingBox {
                rect: boxed.bounding_box,
                padding: 0.2
            }
        );

        let eyed = eyes_detection(Point::new(20.0, 20.0), Point::new(40.0, 20.0));
        assert!(matches!(
            AlignmentStrategy::select(&eyed, FallbackCrop::Standard),
            AlignmentStrategy::Eyes { .. }
        ));
    }

    #[test]
    fn test_padding_policies() {
        let rect = BoundingBox::new(40.0, 40.0, 20.0, 20.0);
        assert_eq!(crop_bounds(&rect, FallbackCrop::Standard.padding(), 100, 100), Some((34, 34, 66, 66)));
        assert_eq!(crop_bounds(&rect, FallbackCrop::Simple.padding(), 100, 100), Some((36, 36, 64, 64)));
    }

    #[test]
    fn test_box_crop_clamps_to_edges() {
        let rect = BoundingBox::new(-10.0, 70.0, 50.0, 50.0);
        assert_eq!(crop_bounds(&rect, 0.3, 100, 100), Some((0, 55, 55, 100)));

        let image = RgbImage::from_pixel(100, 100, Rgb([10, 20, 30]));
        let face = align(&image, &FaceDetection::new(rect), &AlignConfig::default()).unwrap();
        assert_eq!(face.dimensions(), (112, 112));
        assert_eq!(face.image().get_pixel(56, 56), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_box_outside_image_is_error() {
        let image = RgbImage::new(100, 100);
        let rect = BoundingBox::new(300.0, 300.0, 20.0, 20.0);
        assert_eq!(
            align(&image, &FaceDetection::new(rect), &AlignConfig::default()),
            Err(AlignError::EmptyCrop { width: 100, height: 100 })
        );
    }

    #[test]
    fn test_simple_align_size() {
        let image = RgbImage::from_pixel(80, 60, Rgb([90, 90, 90]));
        let face = simple_align(&image, &BoundingBox::new(20.0, 10.0, 30.0, 30.0), 64).unwrap();
        assert_eq!(face.dimensions(), (64, 64));
    }

    #[test]
    fn test_zero_target_size() {
        let image = RgbImage::new(10, 10);
        let config = AlignConfig {
            target_size: 0,
            ..AlignConfig::default()
        };
        let det = FaceDetection::new(BoundingBox::new(0.0, 0.0, 5.0, 5.0));
        assert_eq!(align(&image, &det, &config), Err(AlignError::InvalidTargetSize(0)));
    }
}

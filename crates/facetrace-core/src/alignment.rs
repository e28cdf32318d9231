//! Face chip extraction via 4-DOF similarity transform.
//!
//! Maps the five detected landmarks onto the InsightFace reference layout,
//! scaled into a square chip of `size` pixels with `padding` extra margin on
//! every side (as a fraction of the canonical face square), and warps the
//! source with bilinear sampling.

use crate::model::ChipExtractor;
use crate::types::{ChipSpec, FaceChip, FaceLandmarks, Image, PixelLayout};
use thiserror::Error;

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

const REFERENCE_SIZE: f32 = 112.0;

#[derive(Error, Debug)]
pub enum AlignmentError {
    #[error("chip extraction expects an RGB buffer, got {0:?}")]
    UnsupportedLayout(PixelLayout),
    #[error("invalid chip spec: size {size}, padding {padding}")]
    InvalidSpec { size: u32, padding: f32 },
    #[error("landmarks are degenerate; no similarity transform exists")]
    DegenerateLandmarks,
}

/// Reference landmarks placed inside a padded chip of the given spec.
pub fn reference_landmarks(spec: ChipSpec) -> FaceLandmarks {
    let span = 1.0 + 2.0 * spec.padding;
    let size = spec.size as f32;
    REFERENCE_LANDMARKS_112.map(|(x, y)| {
        (
            (x / REFERENCE_SIZE + spec.padding) / span * size,
            (y / REFERENCE_SIZE + spec.padding) / span * size,
        )
    })
}

/// Estimate a 2×3 similarity transform (4-DOF: scale, rotation, translation)
/// from `src` landmarks to `dst` landmarks using least-squares.
///
/// Returns [a, -b, tx, b, a, ty] representing the matrix:
/// ```text
/// | a  -b  tx |
/// | b   a  ty |
/// ```
fn estimate_similarity_transform(src: &FaceLandmarks, dst: &FaceLandmarks) -> Option<[f32; 6]> {
    // Normal equations of the overdetermined system A * [a, b, tx, ty]^T = B
    // For each point pair (sx, sy) -> (dx, dy):
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [[0.0f32; 4]; 4];
    let mut atb = [0.0f32; 4];

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j][k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let [a, b, tx, ty] = solve_4x4(ata, atb)?;
    Some([a, -b, tx, b, a, ty])
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: [[f32; 4]; 4], atb: [f32; 4]) -> Option<[f32; 4]> {
    // Augmented matrix [A | b]
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        m[i][..4].copy_from_slice(&ata[i]);
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&r1, &r2| m[r1][col].abs().total_cmp(&m[r2][col].abs()))
            .unwrap_or(col);
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-6 {
            return None;
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    // Back substitution
    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    Some(x)
}

/// Warp an RGB image through the inverse of a similarity `matrix` into a
/// square `out_size` chip. Out-of-bounds samples are black.
fn warp_affine(image: &Image, matrix: &[f32; 6], out_size: u32) -> Option<Image> {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);

    // Invert the 2x2 part: M = [[a, -b], [b, a]], det = a^2 + b^2
    let det = a * a + b * b;
    if det.abs() < 1e-12 {
        return None;
    }
    let ia = a / det;
    let ib = b / det;

    let (w, h) = (image.width as i64, image.height as i64);
    let sample = |x: i64, y: i64| -> [f32; 3] {
        if x >= 0 && x < w && y >= 0 && y < h {
            image.rgb_at(x as u32, y as u32).map_or([0.0; 3], |p| p.map(f32::from))
        } else {
            [0.0; 3]
        }
    };

    let mut chip = Image::blank(out_size, out_size, PixelLayout::Rgb);
    let stride = chip.row_stride();

    for oy in 0..out_size as usize {
        for ox in 0..out_size as usize {
            // src = M_inv * (dst - t)
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;

            let x0 = sx.floor() as i64;
            let y0 = sy.floor() as i64;
            let fx = sx - x0 as f32;
            let fy = sy - y0 as f32;

            let tl = sample(x0, y0);
            let tr = sample(x0 + 1, y0);
            let bl = sample(x0, y0 + 1);
            let br = sample(x0 + 1, y0 + 1);

            let out = &mut chip.data[oy * stride + ox * 3..oy * stride + ox * 3 + 3];
            for c in 0..3 {
                let val = tl[c] * (1.0 - fx) * (1.0 - fy)
                    + tr[c] * fx * (1.0 - fy)
                    + bl[c] * (1.0 - fx) * fy
                    + br[c] * fx * fy;
                out[c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    Some(chip)
}

/// Aligns faces to the reference landmark layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlignedChipExtractor;

impl ChipExtractor for AlignedChipExtractor {
    fn extract(
        &self,
        image: &Image,
        landmarks: &FaceLandmarks,
        spec: ChipSpec,
    ) -> Result<FaceChip, AlignmentError> {
        if image.layout != PixelLayout::Rgb {
            return Err(AlignmentError::UnsupportedLayout(image.layout));
        }
        if spec.size == 0 || spec.padding.is_nan() || spec.padding < 0.0 {
            return Err(AlignmentError::InvalidSpec {
                size: spec.size,
                padding: spec.padding,
            });
        }

        let matrix = estimate_similarity_transform(landmarks, &reference_landmarks(spec))
            .ok_or(AlignmentError::DegenerateLandmarks)?;
        let chip = warp_affine(image, &matrix, spec.size).ok_or(AlignmentError::DegenerateLandmarks)?;

        Ok(FaceChip { image: chip, spec })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNPADDED_112: ChipSpec = ChipSpec { size: 112, padding: 0.0 };

    #[test]
    fn test_reference_landmarks_unpadded_112_are_canonical() {
        let pts = reference_landmarks(UNPADDED_112);
        for (a, b) in pts.iter().zip(REFERENCE_LANDMARKS_112.iter()) {
            assert!((a.0 - b.0).abs() < 1e-3 && (a.1 - b.1).abs() < 1e-3);
        }
    }

    #[test]
    fn test_padding_pulls_landmarks_toward_centre() {
        let padded = reference_landmarks(ChipSpec { size: 150, padding: 0.25 });
        // left eye: (38.2946 / 112 + 0.25) / 1.5 * 150
        let expected = (38.2946 / 112.0 + 0.25) / 1.5 * 150.0;
        assert!((padded[0].0 - expected).abs() < 1e-3);
    }

    #[test]
    fn test_identity_transform() {
        let pts = REFERENCE_LANDMARKS_112;
        let m = estimate_similarity_transform(&pts, &pts).unwrap();

        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-4, "a2 = {}", m[4]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn test_scaled_transform() {
        // Source landmarks at 2x scale → transform should have a ≈ 0.5
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS_112).unwrap();
        assert!((m[0] - 0.5).abs() < 0.05, "a = {}, expected ~0.5", m[0]);
    }

    #[test]
    fn test_degenerate_landmarks_rejected() {
        let img = Image::blank(64, 64, PixelLayout::Rgb);
        let collapsed = [(10.0, 10.0); 5];
        let err = AlignedChipExtractor
            .extract(&img, &collapsed, ChipSpec::default())
            .unwrap_err();
        assert!(matches!(err, AlignmentError::DegenerateLandmarks));
    }

    #[test]
    fn test_extract_output_size() {
        let img = Image::blank(640, 480, PixelLayout::Rgb);
        let chip = AlignedChipExtractor
            .extract(&img, &REFERENCE_LANDMARKS_112, ChipSpec::default())
            .unwrap();
        assert_eq!((chip.image.width, chip.image.height), (150, 150));
        assert_eq!(chip.image.data.len(), 150 * 150 * 3);
        assert_eq!(chip.spec, ChipSpec::default());
    }

    #[test]
    fn test_non_rgb_rejected() {
        let img = Image::blank(64, 64, PixelLayout::Bgr);
        let err = AlignedChipExtractor
            .extract(&img, &REFERENCE_LANDMARKS_112, ChipSpec::default())
            .unwrap_err();
        assert!(matches!(err, AlignmentError::UnsupportedLayout(PixelLayout::Bgr)));
    }

    #[test]
    fn test_landmark_roundtrip() {
        // A bright patch at the source left eye should land near the reference left eye.
        let (w, h) = (200u32, 200u32);
        let mut img = Image::blank(w, h, PixelLayout::Rgb);

        let src_landmarks: FaceLandmarks = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        let (lx, ly) = (src_landmarks[0].0 as usize, src_landmarks[0].1 as usize);
        let stride = img.row_stride();
        for py in ly - 2..=ly + 2 {
            for px in lx - 2..=lx + 2 {
                img.data[py * stride + px * 3..py * stride + px * 3 + 3].fill(255);
            }
        }

        let chip = AlignedChipExtractor
            .extract(&img, &src_landmarks, UNPADDED_112)
            .unwrap();

        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as u32;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as u32;

        let mut max_val = 0u8;
        for y in ref_y - 1..=ref_y + 1 {
            for x in ref_x - 1..=ref_x + 1 {
                if let Some([r, _, _]) = chip.image.rgb_at(x, y) {
                    max_val = max_val.max(r);
                }
            }
        }
        assert!(max_val > 100, "expected bright patch near ({ref_x}, {ref_y}), max={max_val}");
    }
}

use serde::{Deserialize, Serialize};

/// Channel order of a packed 8-bit pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelLayout {
    Rgb,
    Bgr,
    Rgba,
    Bgra,
    Gray,
}

impl PixelLayout {
    /// Bytes per pixel.
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgb | PixelLayout::Bgr => 3,
            PixelLayout::Rgba | PixelLayout::Bgra => 4,
            PixelLayout::Gray => 1,
        }
    }

    /// Read one pixel in this layout as `[r, g, b]`.
    pub fn read_rgb(self, px: &[u8]) -> [u8; 3] {
        match self {
            PixelLayout::Rgb | PixelLayout::Rgba => [px[0], px[1], px[2]],
            PixelLayout::Bgr | PixelLayout::Bgra => [px[2], px[1], px[0]],
            PixelLayout::Gray => [px[0], px[0], px[0]],
        }
    }

    /// Write an `[r, g, b]` triple into one pixel of this layout.
    ///
    /// Alpha is set opaque; gray uses BT.601 luma.
    pub fn write_rgb(self, rgb: [u8; 3], out: &mut [u8]) {
        let [r, g, b] = rgb;
        match self {
            PixelLayout::Rgb => out[..3].copy_from_slice(&[r, g, b]),
            PixelLayout::Bgr => out[..3].copy_from_slice(&[b, g, r]),
            PixelLayout::Rgba => out[..4].copy_from_slice(&[r, g, b, 255]),
            PixelLayout::Bgra => out[..4].copy_from_slice(&[b, g, r, 255]),
            PixelLayout::Gray => {
                let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
                out[0] = y.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// A decoded image: tightly packed rows, no padding between them.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
}

impl Image {
    /// Zero-filled image of the given size and layout.
    pub fn blank(width: u32, height: u32, layout: PixelLayout) -> Self {
        Self {
            data: vec![0u8; width as usize * height as usize * layout.channels()],
            width,
            height,
            layout,
        }
    }

    /// Bytes in one row.
    pub fn row_stride(&self) -> usize {
        self.width as usize * self.layout.channels()
    }

    /// Buffer length implied by the dimensions and layout.
    pub fn expected_len(&self) -> usize {
        self.row_stride() * self.height as usize
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Pixel `(x, y)` as `[r, g, b]`, or `None` when out of bounds.
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let c = self.layout.channels();
        let start = y as usize * self.row_stride() + x as usize * c;
        self.data.get(start..start + c).map(|px| self.layout.read_rgb(px))
    }

    /// Copy out the rectangle `(x, y, width, height)`, clamped to the image.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Image {
        let x = x.min(self.width);
        let y = y.min(self.height);
        let width = width.min(self.width - x);
        let height = height.min(self.height - y);

        let c = self.layout.channels();
        let stride = self.row_stride();
        let out_stride = width as usize * c;
        let mut data = Vec::with_capacity(out_stride * height as usize);
        for row in y..y + height {
            let start = row as usize * stride + x as usize * c;
            data.extend_from_slice(&self.data[start..start + out_stride]);
        }

        Image { data, width, height, layout: self.layout }
    }

    /// Wrap a decoded image in the closest native layout.
    pub fn from_dynamic(img: image::DynamicImage) -> Self {
        let (width, height) = (img.width(), img.height());
        match img {
            image::DynamicImage::ImageLuma8(buf) => Image {
                data: buf.into_raw(),
                width,
                height,
                layout: PixelLayout::Gray,
            },
            image::DynamicImage::ImageRgba8(buf) => Image {
                data: buf.into_raw(),
                width,
                height,
                layout: PixelLayout::Rgba,
            },
            other => Image {
                data: other.into_rgb8().into_raw(),
                width,
                height,
                layout: PixelLayout::Rgb,
            },
        }
    }

    /// View an RGB image as an `image::RgbImage`. Returns `None` for other layouts.
    pub fn into_rgb_buffer(self) -> Option<image::RgbImage> {
        if self.layout != PixelLayout::Rgb {
            return None;
        }
        image::RgbImage::from_raw(self.width, self.height, self.data)
    }

    pub fn from_rgb_buffer(buf: image::RgbImage) -> Self {
        let (width, height) = buf.dimensions();
        Image {
            data: buf.into_raw(),
            width,
            height,
            layout: PixelLayout::Rgb,
        }
    }
}

/// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type FaceLandmarks = [(f32, f32); 5];

/// A detected face in the coordinate space of the buffer it was detected in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub confidence: f32,
    pub landmarks: Option<FaceLandmarks>,
}

impl DetectionBox {
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// Shift by `(dx, dy)`, landmarks included.
    pub fn translated(&self, dx: f32, dy: f32) -> DetectionBox {
        DetectionBox {
            left: self.left + dx,
            top: self.top + dy,
            right: self.right + dx,
            bottom: self.bottom + dy,
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(x, y)| (x + dx, y + dy))),
        }
    }

    /// Multiply every coordinate by `factor`, landmarks included.
    pub fn scaled(&self, factor: f32) -> DetectionBox {
        self.scaled_xy(factor, factor)
    }

    /// Multiply x coordinates by `fx` and y coordinates by `fy`.
    pub fn scaled_xy(&self, fx: f32, fy: f32) -> DetectionBox {
        DetectionBox {
            left: self.left * fx,
            top: self.top * fy,
            right: self.right * fx,
            bottom: self.bottom * fy,
            confidence: self.confidence,
            landmarks: self.landmarks.map(|lms| lms.map(|(x, y)| (x * fx, y * fy))),
        }
    }
}

/// Output size and margin of an extracted face chip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChipSpec {
    /// Side length in pixels.
    pub size: u32,
    /// Margin around the canonical face, as a fraction of the face box.
    pub padding: f32,
}

impl Default for ChipSpec {
    fn default() -> Self {
        Self { size: 150, padding: 0.25 }
    }
}

/// A normalized square RGB crop of one aligned face.
#[derive(Debug, Clone)]
pub struct FaceChip {
    pub image: Image,
    pub spec: ChipSpec,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, model_version: None }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

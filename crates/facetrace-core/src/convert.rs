//! Threaded pixel layout conversion.
//!
//! Rows are dealt out strided across a small fixed pool: worker `k` owns rows
//! `k, k + n, k + 2n, ...`. Each worker receives its rows as disjoint mutable
//! slices of one preallocated target buffer, so the copy itself needs no
//! locking; the caller blocks on the pool until every worker has returned.

use crate::types::{Image, PixelLayout};
use rayon::prelude::*;
use thiserror::Error;

/// Upper bound on conversion workers regardless of core count.
const MAX_WORKERS: usize = 4;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("source buffer holds {actual} bytes, {width}x{height} {layout:?} needs {expected}")]
    BufferSize {
        width: u32,
        height: u32,
        layout: PixelLayout,
        expected: usize,
        actual: usize,
    },
    #[error("conversion of row {row} failed: {reason}")]
    Row { row: usize, reason: String },
    #[error("failed to build conversion pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Converts images into a fixed target layout on a dedicated thread pool.
pub struct PixelConverter {
    pool: rayon::ThreadPool,
    workers: usize,
    target: PixelLayout,
}

impl PixelConverter {
    /// Converter to RGB using `min(available cores, 4)` workers.
    pub fn new() -> Result<Self, ConvertError> {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::with_workers(cores.min(MAX_WORKERS))
    }

    /// Converter to RGB with an explicit worker count (at least 1).
    pub fn with_workers(workers: usize) -> Result<Self, ConvertError> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("facetrace-convert-{i}"))
            .build()?;
        tracing::debug!(workers, "pixel converter pool ready");
        Ok(Self {
            pool,
            workers,
            target: PixelLayout::Rgb,
        })
    }

    /// Change the output layout.
    pub fn with_target(mut self, target: PixelLayout) -> Self {
        self.target = target;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Convert `source` into the target layout, preserving its dimensions.
    pub fn convert(&self, source: &Image) -> Result<Image, ConvertError> {
        self.convert_traced(source).map(|(image, _)| image)
    }

    /// Like [`convert`](Self::convert), also returning which worker wrote each row.
    pub fn convert_traced(&self, source: &Image) -> Result<(Image, Vec<usize>), ConvertError> {
        let (from, to) = (source.layout, self.target);
        self.convert_rows_with(source, |src, out| convert_row(from, to, src, out))
    }

    /// Run `kernel` over every row. Any kernel error aborts the whole conversion.
    fn convert_rows_with<F>(
        &self,
        source: &Image,
        kernel: F,
    ) -> Result<(Image, Vec<usize>), ConvertError>
    where
        F: Fn(&[u8], &mut [u8]) -> Result<(), String> + Sync,
    {
        let expected = source.expected_len();
        if source.data.len() != expected {
            return Err(ConvertError::BufferSize {
                width: source.width,
                height: source.height,
                layout: source.layout,
                expected,
                actual: source.data.len(),
            });
        }

        let mut target = Image::blank(source.width, source.height, self.target);
        let height = source.height as usize;
        if source.width == 0 || height == 0 {
            return Ok((target, Vec::new()));
        }

        let in_stride = source.row_stride();
        let out_stride = target.row_stride();
        let jump = self.workers;

        let mut assignments: Vec<Vec<(usize, &mut [u8])>> = (0..jump).map(|_| Vec::new()).collect();
        for (row, out) in target.data.chunks_mut(out_stride).enumerate() {
            assignments[row % jump].push((row, out));
        }

        let src = &source.data;
        let kernel = &kernel;
        let written: Vec<(usize, Vec<usize>)> = self.pool.install(|| {
            assignments
                .into_par_iter()
                .enumerate()
                .map(|(worker, rows)| -> Result<(usize, Vec<usize>), ConvertError> {
                    let mut done = Vec::with_capacity(rows.len());
                    for (row, out) in rows {
                        let start = row * in_stride;
                        kernel(&src[start..start + in_stride], out)
                            .map_err(|reason| ConvertError::Row { row, reason })?;
                        done.push(row);
                    }
                    Ok((worker, done))
                })
                .collect::<Result<Vec<_>, ConvertError>>()
        })?;

        let mut owners = vec![usize::MAX; height];
        for (worker, rows) in written {
            for row in rows {
                debug_assert_eq!(owners[row], usize::MAX, "row {row} written twice");
                owners[row] = worker;
            }
        }

        Ok((target, owners))
    }
}

/// Reorder the channels of one row of pixels.
fn convert_row(from: PixelLayout, to: PixelLayout, src: &[u8], out: &mut [u8]) -> Result<(), String> {
    let (ci, co) = (from.channels(), to.channels());
    if src.len() / ci != out.len() / co {
        return Err(format!(
            "row holds {} source pixels but {} target pixels",
            src.len() / ci,
            out.len() / co
        ));
    }
    if from == to {
        out.copy_from_slice(src);
        return Ok(());
    }
    for (s, o) in src.chunks_exact(ci).zip(out.chunks_exact_mut(co)) {
        to.write_rgb(from.read_rgb(s), o);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bgr_gradient(width: u32, height: u32) -> Image {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                // B, G, R
                data.extend_from_slice(&[x as u8, y as u8, (x + y) as u8]);
            }
        }
        Image {
            data,
            width,
            height,
            layout: PixelLayout::Bgr,
        }
    }

    #[test]
    fn test_bgr_to_rgb_swaps_channels() {
        let conv = PixelConverter::with_workers(3).unwrap();
        let src = bgr_gradient(5, 7);
        let out = conv.convert(&src).unwrap();
        assert_eq!(out.layout, PixelLayout::Rgb);
        assert_eq!((out.width, out.height), (5, 7));
        assert_eq!(out.data.len(), 5 * 7 * 3);
        for y in 0..7u32 {
            for x in 0..5u32 {
                assert_eq!(out.rgb_at(x, y), Some([(x + y) as u8, y as u8, x as u8]));
            }
        }
    }

    #[test]
    fn test_every_row_written_by_exactly_one_worker() {
        let conv = PixelConverter::with_workers(4).unwrap();
        let src = bgr_gradient(3, 10);
        let (_, owners) = conv.convert_traced(&src).unwrap();
        assert_eq!(owners.len(), 10);
        for (row, &worker) in owners.iter().enumerate() {
            assert_eq!(worker, row % 4, "row {row} owned by {worker}");
        }
    }

    #[test]
    fn test_more_workers_than_rows() {
        let conv = PixelConverter::with_workers(4).unwrap();
        let src = bgr_gradient(6, 2);
        let (out, owners) = conv.convert_traced(&src).unwrap();
        assert_eq!(owners, vec![0, 1]);
        assert_eq!((out.width, out.height), (6, 2));
    }

    #[test]
    fn test_gray_and_rgba_sources() {
        let conv = PixelConverter::with_workers(2).unwrap();
        let gray = Image {
            data: vec![9, 200],
            width: 2,
            height: 1,
            layout: PixelLayout::Gray,
        };
        assert_eq!(conv.convert(&gray).unwrap().data, vec![9, 9, 9, 200, 200, 200]);

        let rgba = Image {
            data: vec![1, 2, 3, 255],
            width: 1,
            height: 1,
            layout: PixelLayout::Rgba,
        };
        assert_eq!(conv.convert(&rgba).unwrap().data, vec![1, 2, 3]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let conv = PixelConverter::with_workers(2).unwrap();
        let mut src = bgr_gradient(4, 4);
        src.data.truncate(10);
        let err = conv.convert(&src).unwrap_err();
        assert!(matches!(err, ConvertError::BufferSize { expected: 48, actual: 10, .. }));
    }

    #[test]
    fn test_worker_failure_aborts_conversion() {
        let conv = PixelConverter::with_workers(4).unwrap();
        let src = bgr_gradient(4, 8);
        let result = conv.convert_rows_with(&src, |row, out| {
            // green carries the row index
            if row[1] == 5 {
                return Err("simulated fault".into());
            }
            out.copy_from_slice(row);
            Ok(())
        });
        match result {
            Err(ConvertError::Row { row, reason }) => {
                assert_eq!(row, 5);
                assert_eq!(reason, "simulated fault");
            }
            other => panic!("expected row failure, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_image() {
        let conv = PixelConverter::with_workers(2).unwrap();
        let src = Image::blank(0, 0, PixelLayout::Bgr);
        let out = conv.convert(&src).unwrap();
        assert_eq!((out.width, out.height), (0, 0));
    }

    #[test]
    fn test_default_worker_bound() {
        let conv = PixelConverter::new().unwrap();
        assert!(conv.workers() >= 1 && conv.workers() <= MAX_WORKERS);
    }
}

//! Per-image face counts in processing order.
//!
//! Face chips (and later their embeddings) are stored as one flat sequence;
//! the index records how many consecutive entries each image contributed so
//! a flat face position can be attributed back to its image on demand.

use std::ops::Range;
use std::path::{Path, PathBuf};

/// One processed image and the number of faces extracted from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub identity: PathBuf,
    pub face_count: usize,
}

/// Append-only `(image, face count)` sequence with cached prefix sums.
#[derive(Debug, Clone, Default)]
pub struct CorpusIndex {
    entries: Vec<CorpusEntry>,
    /// `ends[i]` = faces contributed by entries `0..=i`.
    ends: Vec<usize>,
}

impl CorpusIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one processed image. Zero-face images are recorded too.
    pub fn push(&mut self, identity: impl Into<PathBuf>, face_count: usize) {
        let end = self.total_faces() + face_count;
        self.entries.push(CorpusEntry {
            identity: identity.into(),
            face_count,
        });
        self.ends.push(end);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }

    pub fn total_faces(&self) -> usize {
        self.ends.last().copied().unwrap_or(0)
    }

    /// Faces contributed by the first `k` images (clamped to the index length).
    pub fn prefix_faces(&self, k: usize) -> usize {
        match k.min(self.ends.len()) {
            0 => 0,
            k => self.ends[k - 1],
        }
    }

    /// Flat face positions belonging to entry `entry`.
    pub fn face_range(&self, entry: usize) -> Range<usize> {
        let end = self.prefix_faces(entry + 1);
        end - self.entries.get(entry).map_or(0, |e| e.face_count)..end
    }

    /// Position of the entry that contributed flat face `face`.
    pub fn locate_entry(&self, face: usize) -> Option<usize> {
        let pos = self.ends.partition_point(|&end| end <= face);
        (pos < self.entries.len()).then_some(pos)
    }

    /// The image that contributed flat face `face`.
    pub fn locate(&self, face: usize) -> Option<&CorpusEntry> {
        self.locate_entry(face).map(|i| &self.entries[i])
    }

    pub fn identity_of(&self, face: usize) -> Option<&Path> {
        self.locate(face).map(|e| e.identity.as_path())
    }

    /// Split into the first `k` entries and the rest, each with its own face numbering.
    pub fn split_at(&self, k: usize) -> (CorpusIndex, CorpusIndex) {
        let k = k.min(self.entries.len());
        let mut head = CorpusIndex::new();
        let mut tail = CorpusIndex::new();
        for (i, e) in self.entries.iter().enumerate() {
            let side = if i < k { &mut head } else { &mut tail };
            side.push(e.identity.clone(), e.face_count);
        }
        (head, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(counts: &[usize]) -> CorpusIndex {
        let mut idx = CorpusIndex::new();
        for (i, &c) in counts.iter().enumerate() {
            idx.push(format!("img{i}.jpg"), c);
        }
        idx
    }

    #[test]
    fn test_prefix_sum_matches_contributions() {
        let counts = [2, 0, 3, 1, 0, 4];
        let idx = index(&counts);
        for k in 0..=counts.len() {
            let expected: usize = counts[..k].iter().sum();
            assert_eq!(idx.prefix_faces(k), expected, "prefix of {k}");
        }
        assert_eq!(idx.total_faces(), 10);
        assert_eq!(idx.prefix_faces(100), 10);
    }

    #[test]
    fn test_locate_skips_zero_count_entries() {
        let idx = index(&[2, 0, 3]);
        let owners: Vec<_> = (0..5)
            .map(|f| idx.identity_of(f).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(owners, ["img0.jpg", "img0.jpg", "img2.jpg", "img2.jpg", "img2.jpg"]);
        assert!(idx.locate(5).is_none());
    }

    #[test]
    fn test_face_range() {
        let idx = index(&[2, 0, 3]);
        assert_eq!(idx.face_range(0), 0..2);
        assert_eq!(idx.face_range(1), 2..2);
        assert_eq!(idx.face_range(2), 2..5);
    }

    #[test]
    fn test_split_renumbers_each_side() {
        let idx = index(&[1, 2, 0, 4]);
        let (known, target) = idx.split_at(2);
        assert_eq!(known.len(), 2);
        assert_eq!(known.total_faces(), 3);
        assert_eq!(target.len(), 2);
        assert_eq!(target.total_faces(), 4);
        assert_eq!(target.identity_of(0), Some(Path::new("img3.jpg")));
    }

    #[test]
    fn test_empty_index() {
        let idx = CorpusIndex::new();
        assert!(idx.is_empty());
        assert_eq!(idx.total_faces(), 0);
        assert!(idx.locate(0).is_none());
        let (a, b) = idx.split_at(3);
        assert!(a.is_empty() && b.is_empty());
    }
}

//! Cross-corpus face matching.
//!
//! Every target face is compared against every known face by Euclidean
//! embedding distance. A pair closer than the threshold is a [`Match`]; both
//! sides are attributed to their source images through their corpus indices.

use crate::corpus::CorpusIndex;
use crate::types::Embedding;
use std::path::PathBuf;
use thiserror::Error;

/// Distance below which two faces are taken to be the same individual.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("{corpus} corpus has {embeddings} embeddings but its index lists {faces} faces")]
    Misaligned {
        corpus: &'static str,
        embeddings: usize,
        faces: usize,
    },
    #[error("{known} known images requested but the index only holds {available}")]
    KnownOutOfRange { known: usize, available: usize },
}

/// Embeddings of one corpus together with the index that attributes them.
#[derive(Debug, Clone, Copy)]
pub struct CorpusEmbeddings<'a> {
    pub index: &'a CorpusIndex,
    pub embeddings: &'a [Embedding],
}

impl<'a> CorpusEmbeddings<'a> {
    pub fn new(index: &'a CorpusIndex, embeddings: &'a [Embedding]) -> Self {
        Self { index, embeddings }
    }

    fn check(&self, corpus: &'static str) -> Result<(), MatchError> {
        if self.embeddings.len() != self.index.total_faces() {
            return Err(MatchError::Misaligned {
                corpus,
                embeddings: self.embeddings.len(),
                faces: self.index.total_faces(),
            });
        }
        Ok(())
    }
}

/// A target face within the threshold of a known face.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub known_image: PathBuf,
    pub target_image: PathBuf,
    pub distance: f32,
    /// Face position within the known corpus.
    pub known_face: usize,
    /// Face position within the target corpus.
    pub target_face: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MatchReport {
    /// Matches in target order, then known order.
    pub matches: Vec<Match>,
    /// Target images with at least one match, each listed once, in index order.
    pub images_with_matches: Vec<PathBuf>,
}

impl MatchReport {
    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }
}

/// Match every target face against every known face.
pub fn reconcile(
    known: CorpusEmbeddings<'_>,
    target: CorpusEmbeddings<'_>,
    threshold: f32,
) -> Result<MatchReport, MatchError> {
    known.check("known")?;
    target.check("target")?;

    let mut report = MatchReport::default();

    for (entry_pos, entry) in target.index.entries().iter().enumerate() {
        let mut image_matched = false;

        for target_face in target.index.face_range(entry_pos) {
            let candidate = &target.embeddings[target_face];

            for (known_face, reference) in known.embeddings.iter().enumerate() {
                let distance = candidate.euclidean_distance(reference);
                if distance >= threshold {
                    continue;
                }
                // Aligned indices guarantee every known face has an owner.
                let Some(source) = known.index.locate(known_face) else {
                    continue;
                };

                tracing::info!(
                    known = %source.identity.display(),
                    target = %entry.identity.display(),
                    distance,
                    "match"
                );
                report.matches.push(Match {
                    known_image: source.identity.clone(),
                    target_image: entry.identity.clone(),
                    distance,
                    known_face,
                    target_face,
                });
                image_matched = true;
            }
        }

        if image_matched {
            report.images_with_matches.push(entry.identity.clone());
        }
    }

    tracing::info!(
        matches = report.matches.len(),
        images = report.images_with_matches.len(),
        "reconciliation complete"
    );
    Ok(report)
}

/// Match over one flat embedding sequence whose first `known_images` index
/// entries (and their faces) form the known corpus.
pub fn reconcile_flat(
    embeddings: &[Embedding],
    index: &CorpusIndex,
    known_images: usize,
    threshold: f32,
) -> Result<MatchReport, MatchError> {
    if known_images > index.len() {
        return Err(MatchError::KnownOutOfRange {
            known: known_images,
            available: index.len(),
        });
    }
    CorpusEmbeddings::new(index, embeddings).check("combined")?;

    let known_faces = index.prefix_faces(known_images);
    let (known_index, target_index) = index.split_at(known_images);
    let (known_emb, target_emb) = embeddings.split_at(known_faces);

    reconcile(
        CorpusEmbeddings::new(&known_index, known_emb),
        CorpusEmbeddings::new(&target_index, target_emb),
        threshold,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_single_match_attributed_to_source_image() {
        let mut known = CorpusIndex::new();
        known.push("known_a.jpg", 1);
        let known_emb = vec![emb(&[0.0, 0.0])];

        let mut target = CorpusIndex::new();
        target.push("target_b.jpg", 1);
        target.push("target_c.jpg", 1);
        // distance(A, B) = 0.3, distance(A, C) = 1.2
        let target_emb = vec![emb(&[0.3, 0.0]), emb(&[0.0, 1.2])];

        let report = reconcile(
            CorpusEmbeddings::new(&known, &known_emb),
            CorpusEmbeddings::new(&target, &target_emb),
            DEFAULT_MATCH_THRESHOLD,
        )
        .unwrap();

        assert_eq!(report.matches.len(), 1);
        let m = &report.matches[0];
        assert_eq!(m.known_image, Path::new("known_a.jpg"));
        assert_eq!(m.target_image, Path::new("target_b.jpg"));
        assert!((m.distance - 0.3).abs() < 1e-6);
        assert!(report
            .matches
            .iter()
            .all(|m| m.target_image != Path::new("target_c.jpg")));
        assert_eq!(report.images_with_matches, vec![PathBuf::from("target_b.jpg")]);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let mut known = CorpusIndex::new();
        known.push("k.jpg", 1);
        let mut target = CorpusIndex::new();
        target.push("t.jpg", 1);
        let report = reconcile(
            CorpusEmbeddings::new(&known, &[emb(&[0.0])]),
            CorpusEmbeddings::new(&target, &[emb(&[0.6])]),
            0.6,
        )
        .unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn test_flat_layout_attributes_across_multi_face_images() {
        // known: k0 (2 faces), k1 (0 faces), k2 (1 face); target: t0 (0), t1 (2)
        let mut index = CorpusIndex::new();
        index.push("k0.jpg", 2);
        index.push("k1.jpg", 0);
        index.push("k2.jpg", 1);
        index.push("t0.jpg", 0);
        index.push("t1.jpg", 2);

        let embeddings = vec![
            emb(&[10.0, 0.0]), // k0 face 0
            emb(&[20.0, 0.0]), // k0 face 1
            emb(&[30.0, 0.0]), // k2
            emb(&[30.1, 0.0]), // t1 face 0 -> k2
            emb(&[10.2, 0.0]), // t1 face 1 -> k0
        ];

        let report = reconcile_flat(&embeddings, &index, 3, 0.6).unwrap();
        assert_eq!(report.matches.len(), 2);
        assert_eq!(report.matches[0].known_image, Path::new("k2.jpg"));
        assert_eq!(report.matches[0].known_face, 2);
        assert_eq!(report.matches[0].target_face, 0);
        assert_eq!(report.matches[1].known_image, Path::new("k0.jpg"));
        assert_eq!(report.matches[1].known_face, 0);
        assert!(report.matches.iter().all(|m| m.target_image == Path::new("t1.jpg")));
        // t1 listed once despite two matches
        assert_eq!(report.images_with_matches, vec![PathBuf::from("t1.jpg")]);
    }

    #[test]
    fn test_one_target_face_may_match_several_known_faces() {
        let mut known = CorpusIndex::new();
        known.push("a.jpg", 1);
        known.push("b.jpg", 1);
        let known_emb = vec![emb(&[0.0]), emb(&[0.1])];
        let mut target = CorpusIndex::new();
        target.push("t.jpg", 1);
        let report = reconcile(
            CorpusEmbeddings::new(&known, &known_emb),
            CorpusEmbeddings::new(&target, &[emb(&[0.05])]),
            0.6,
        )
        .unwrap();
        let sources: Vec<_> = report.matches.iter().map(|m| m.known_image.clone()).collect();
        assert_eq!(sources, vec![PathBuf::from("a.jpg"), PathBuf::from("b.jpg")]);
    }

    #[test]
    fn test_misaligned_embeddings_rejected() {
        let mut known = CorpusIndex::new();
        known.push("k.jpg", 2);
        let target = CorpusIndex::new();
        let err = reconcile(
            CorpusEmbeddings::new(&known, &[emb(&[0.0])]),
            CorpusEmbeddings::new(&target, &[]),
            0.6,
        )
        .unwrap_err();
        assert!(matches!(err, MatchError::Misaligned { corpus: "known", embeddings: 1, faces: 2 }));
    }

    #[test]
    fn test_known_count_out_of_range() {
        let mut index = CorpusIndex::new();
        index.push("k.jpg", 0);
        let err = reconcile_flat(&[], &index, 2, 0.6).unwrap_err();
        assert!(matches!(err, MatchError::KnownOutOfRange { known: 2, available: 1 }));
    }

    #[test]
    fn test_empty_target_yields_no_matches() {
        let mut known = CorpusIndex::new();
        known.push("k.jpg", 1);
        let report = reconcile(
            CorpusEmbeddings::new(&known, &[emb(&[0.0])]),
            CorpusEmbeddings::new(&CorpusIndex::new(), &[]),
            0.6,
        )
        .unwrap();
        assert!(report.is_empty());
        assert!(report.images_with_matches.is_empty());
    }
}

//! Group-photo reconciliation: decide Present/Absent for every roster person.

use crate::backend::{BackendError, FaceBackend};
use crate::extractor::SignatureExtractor;
use crate::photo::{ImageLoadError, PhotoSource};
use crate::types::{
    AttendanceStatus, DecisionMap, DistanceMetric, EnrolledPerson, FaceSignature, MatchPolicy,
    PersonId,
};
use thiserror::Error;

/// Default maximum distance for two signatures to count as the same person.
pub const DEFAULT_TOLERANCE: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
pub struct MatchConfig {
    /// Inclusive: `distance <= tolerance` is a match.
    pub tolerance: f32,
    pub metric: DistanceMetric,
    pub policy: MatchPolicy,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            metric: DistanceMetric::Euclidean,
            policy: MatchPolicy::Any,
        }
    }
}

impl MatchConfig {
    fn accepts(&self, distance: f32) -> bool {
        distance <= self.tolerance
    }
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("group photo unusable: {0}")]
    ImageLoad(#[from] ImageLoadError),
    #[error("face backend failed on group photo: {0}")]
    Backend(#[from] BackendError),
}

/// Outcome of one reconcile pass.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// One entry per roster person.
    pub decisions: DecisionMap,
    pub group_faces: usize,
    /// People with no usable reference signature. References are only read
    /// when the group photo has faces, so this is empty when `group_faces == 0`.
    pub unmatchable: Vec<PersonId>,
}

impl Reconciliation {
    pub fn present_count(&self) -> usize {
        self.decisions
            .values()
            .filter(|s| **s == AttendanceStatus::Present)
            .count()
    }
}

/// Enrolled signatures for one person, in roster order.
pub struct GalleryEntry {
    pub person: PersonId,
    pub signatures: Vec<FaceSignature>,
}

/// Matches a group photo against a roster using one [`FaceBackend`].
pub struct Reconciler<B> {
    extractor: SignatureExtractor<B>,
    config: MatchConfig,
}

impl<B: FaceBackend> Reconciler<B> {
    pub fn new(extractor: SignatureExtractor<B>, config: MatchConfig) -> Self {
        Self { extractor, config }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn into_extractor(self) -> SignatureExtractor<B> {
        self.extractor
    }

    /// Produce a decision for every person in `roster`.
    ///
    /// The roster is used as given; restricting it to one class is the caller's
    /// job. Fails only when the group photo itself cannot be processed.
    pub fn reconcile(
        &mut self,
        group: &PhotoSource,
        roster: &[EnrolledPerson],
    ) -> Result<Reconciliation, ReconcileError> {
        let image = group.load()?;
        let limit = self.extractor.config().max_faces_per_image;
        let group_faces: Vec<FaceSignature> = self
            .extractor
            .backend_mut()
            .detect_and_encode(&image, limit)?
            .into_iter()
            .map(|f| f.signature)
            .collect();

        tracing::info!(
            photo = %group.label(),
            faces = group_faces.len(),
            roster = roster.len(),
            "group photo analysed"
        );

        let mut unmatchable = Vec::new();
        let gallery: Vec<GalleryEntry> = if group_faces.is_empty() {
            // Nothing to match against; skip the reference work.
            Vec::new()
        } else {
            roster
                .iter()
                .map(|person| {
                    let signatures = self.extractor.extract_person(person).signatures;
                    if signatures.is_empty() {
                        unmatchable.push(person.id);
                    }
                    GalleryEntry {
                        person: person.id,
                        signatures,
                    }
                })
                .collect()
        };

        let mut decisions = absent_for(roster);
        decisions.extend(decide(&gallery, &group_faces, &self.config));

        let result = Reconciliation {
            decisions,
            group_faces: group_faces.len(),
            unmatchable,
        };
        tracing::info!(
            present = result.present_count(),
            absent = result.decisions.len() - result.present_count(),
            policy = ?self.config.policy,
            tolerance = self.config.tolerance,
            "reconciliation complete"
        );
        Ok(result)
    }
}

/// Every roster person marked Absent.
pub fn absent_for(roster: &[EnrolledPerson]) -> DecisionMap {
    roster
        .iter()
        .map(|p| (p.id, AttendanceStatus::Absent))
        .collect()
}

/// Present decisions for gallery people matched by at least one group face.
///
/// People with no signatures, or no qualifying face, are Absent.
pub fn decide(gallery: &[GalleryEntry], group: &[FaceSignature], config: &MatchConfig) -> DecisionMap {
    let mut decisions: DecisionMap = gallery
        .iter()
        .map(|e| (e.person, AttendanceStatus::Absent))
        .collect();

    match config.policy {
        MatchPolicy::Any => {
            for entry in gallery {
                let hit = entry.signatures.iter().any(|known| {
                    group
                        .iter()
                        .any(|face| config.accepts(known.distance(face, config.metric)))
                });
                if hit {
                    decisions.insert(entry.person, AttendanceStatus::Present);
                }
            }
        }
        MatchPolicy::Nearest => {
            for face in group {
                let mut best: Option<(PersonId, f32)> = None;
                for entry in gallery {
                    for known in &entry.signatures {
                        let d = known.distance(face, config.metric);
                        if best.map_or(true, |(_, bd)| d < bd) {
                            best = Some((entry.person, d));
                        }
                    }
                }
                if let Some((person, d)) = best {
                    if config.accepts(d) {
                        decisions.insert(person, AttendanceStatus::Present);
                    }
                }
            }
        }
    }

    decisions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ExtractorConfig;
    use crate::testing::{write_faces_photo, PixelBackend};
    use crate::types::ReferenceImages;
    use std::path::{Path, PathBuf};

    const RED: [u8; 3] = [255, 0, 0];
    const GREEN: [u8; 3] = [0, 255, 0];
    const BLUE: [u8; 3] = [0, 0, 255];

    fn sig(values: &[f32]) -> FaceSignature {
        FaceSignature::new(values.to_vec())
    }

    fn entry(person: PersonId, sigs: &[&[f32]]) -> GalleryEntry {
        GalleryEntry {
            person,
            signatures: sigs.iter().map(|s| sig(s)).collect(),
        }
    }

    fn person(id: PersonId, images: ReferenceImages) -> EnrolledPerson {
        EnrolledPerson {
            id,
            name: format!("person-{id}"),
            roll_no: format!("R{id:03}"),
            class_label: "CS101".into(),
            images,
        }
    }

    fn reconciler(config: MatchConfig) -> Reconciler<PixelBackend> {
        Reconciler::new(
            SignatureExtractor::new(PixelBackend::default(), ExtractorConfig::default()),
            config,
        )
    }

    fn photo(dir: &Path, name: &str, faces: &[[u8; 3]]) -> PathBuf {
        let path = dir.join(name);
        write_faces_photo(&path, faces);
        path
    }

    #[test]
    fn test_distance_equal_to_tolerance_matches() {
        let config = MatchConfig::default();
        let gallery = [entry(1, &[&[0.0, 0.0]])];
        let decisions = decide(&gallery, &[sig(&[0.5, 0.0])], &config);
        assert_eq!(decisions[&1], AttendanceStatus::Present);

        let decisions = decide(&gallery, &[sig(&[0.5, 0.01])], &config);
        assert_eq!(decisions[&1], AttendanceStatus::Absent);
    }

    #[test]
    fn test_any_policy_lets_one_face_credit_two_people() {
        let config = MatchConfig::default();
        let gallery = [entry(1, &[&[0.0, 0.0]]), entry(2, &[&[0.2, 0.0]])];
        let decisions = decide(&gallery, &[sig(&[0.1, 0.0])], &config);
        assert_eq!(decisions[&1], AttendanceStatus::Present);
        assert_eq!(decisions[&2], AttendanceStatus::Present);
    }

    #[test]
    fn test_nearest_policy_credits_closest_only() {
        let config = MatchConfig {
            policy: MatchPolicy::Nearest,
            ..MatchConfig::default()
        };
        let gallery = [entry(1, &[&[0.0, 0.0]]), entry(2, &[&[0.15, 0.0]])];
        let decisions = decide(&gallery, &[sig(&[0.1, 0.0])], &config);
        assert_eq!(decisions[&1], AttendanceStatus::Absent);
        assert_eq!(decisions[&2], AttendanceStatus::Present);
    }

    #[test]
    fn test_nearest_policy_tie_goes_to_earlier_entry() {
        let config = MatchConfig {
            policy: MatchPolicy::Nearest,
            ..MatchConfig::default()
        };
        let gallery = [entry(7, &[&[0.0, 0.0]]), entry(3, &[&[0.2, 0.0]])];
        let decisions = decide(&gallery, &[sig(&[0.1, 0.0])], &config);
        assert_eq!(decisions[&7], AttendanceStatus::Present);
        assert_eq!(decisions[&3], AttendanceStatus::Absent);
    }

    #[test]
    fn test_cosine_metric() {
        let config = MatchConfig {
            metric: DistanceMetric::Cosine,
            tolerance: 0.1,
            ..MatchConfig::default()
        };
        // Same direction, different magnitude: cosine distance 0.
        let gallery = [entry(1, &[&[1.0, 1.0]])];
        let decisions = decide(&gallery, &[sig(&[5.0, 5.0])], &config);
        assert_eq!(decisions[&1], AttendanceStatus::Present);
    }

    #[test]
    fn test_empty_signature_set_always_absent() {
        let gallery = [entry(1, &[])];
        let decisions = decide(&gallery, &[sig(&[0.0, 0.0])], &MatchConfig::default());
        assert_eq!(decisions[&1], AttendanceStatus::Absent);
    }

    #[test]
    fn test_reconcile_dense_over_roster() {
        let dir = tempfile::tempdir().unwrap();
        let alice_refs = vec![
            photo(dir.path(), "alice1.png", &[RED]),
            photo(dir.path(), "alice2.png", &[RED]),
        ];
        let group = photo(dir.path(), "group.png", &[BLUE, RED]);
        let roster = vec![
            person(1, ReferenceImages::Files(alice_refs)),
            person(2, ReferenceImages::None),
            person(3, ReferenceImages::Files(vec![photo(dir.path(), "carol.png", &[GREEN])])),
        ];

        let result = reconciler(MatchConfig::default())
            .reconcile(&PhotoSource::Path(group), &roster)
            .unwrap();
        assert_eq!(result.decisions.len(), 3);
        assert_eq!(result.decisions[&1], AttendanceStatus::Present);
        assert_eq!(result.decisions[&2], AttendanceStatus::Absent);
        assert_eq!(result.decisions[&3], AttendanceStatus::Absent);
        assert_eq!(result.group_faces, 2);
        assert_eq!(result.unmatchable, vec![2]);
    }

    #[test]
    fn test_person_absent_even_when_face_present_without_references() {
        let dir = tempfile::tempdir().unwrap();
        let blank_ref = photo(dir.path(), "blank.png", &[]);
        let group = photo(dir.path(), "group.png", &[RED]);
        let roster = vec![person(1, ReferenceImages::Files(vec![blank_ref]))];

        let result = reconciler(MatchConfig::default())
            .reconcile(&PhotoSource::Path(group), &roster)
            .unwrap();
        assert_eq!(result.decisions[&1], AttendanceStatus::Absent);
    }

    #[test]
    fn test_group_without_faces_all_absent() {
        let dir = tempfile::tempdir().unwrap();
        let group = photo(dir.path(), "empty.png", &[]);
        let roster: Vec<_> = (1..=5)
            .map(|id| person(id, ReferenceImages::Files(vec![photo(dir.path(), &format!("{id}.png"), &[RED])])))
            .collect();

        let mut r = reconciler(MatchConfig::default());
        let result = r.reconcile(&PhotoSource::Path(group), &roster).unwrap();
        assert_eq!(result.decisions.len(), 5);
        assert!(result.decisions.values().all(|s| *s == AttendanceStatus::Absent));
        assert!(result.unmatchable.is_empty());
        // Only the group photo went through the backend.
        assert_eq!(r.into_extractor().into_backend().calls, 1);
    }

    #[test]
    fn test_missing_group_photo_is_image_load_error() {
        let roster = vec![person(1, ReferenceImages::None)];
        let err = reconciler(MatchConfig::default())
            .reconcile(&PhotoSource::Path("/nonexistent/group.jpg".into()), &roster)
            .unwrap_err();
        match err {
            ReconcileError::ImageLoad(e) => assert_eq!(e.origin(), "/nonexistent/group.jpg"),
            other => panic!("expected ImageLoad, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_roster() {
        let dir = tempfile::tempdir().unwrap();
        let group = photo(dir.path(), "group.png", &[RED]);
        let result = reconciler(MatchConfig::default())
            .reconcile(&PhotoSource::Path(group), &[])
            .unwrap();
        assert!(result.decisions.is_empty());
    }
}

use super::FaceId;
use crate::landscape::Landscape;

/// Steps of the search for the distance at which the tile transition flips a face.
const TILE_TRANSITION_STEPS: u32 = 6;
/// Upper bound of that search.
const TILE_TRANSITION_MAX_DELTA: f32 = 8.0;

impl Landscape {
    /// The deepest level faces of a patch may be split to.
    fn max_split_level(&self, face: FaceId) -> u32 {
        let tile_limit_level = self.patches[self.faces[face].patch].tile_limit_level;
        tile_limit_level + self.globals.tile_max_subdivision
    }

    fn tile_limit_level(&self, face: FaceId) -> u32 {
        self.patches[self.faces[face].patch].tile_limit_level
    }

    /// Splits or merges every face below `face` to match the current refine center.
    pub(crate) fn face_refine_all(&mut self, face: FaceId) {
        self.update_error_metric(face);
        let ps = self.faces[face].error_metric * self.globals.oo_refine_threshold;

        if self.is_leaf(face) {
            if ps > 1.0 && self.faces[face].level < self.max_split_level(face) {
                self.split(face, true);
            }
        } else if ps < 1.0 && self.can_merge(face, true) {
            self.merge(face);
        }

        // The merge of a neighbor may have merged this face as well.
        if let Some((son_left, son_right)) = self.faces.get(face).and_then(|face| face.sons()) {
            self.face_refine_all(son_left);
            if self.faces.contains(son_right) {
                self.face_refine_all(son_right);
            }
        }
    }

    /// Splits a leaf if its error demands it. Otherwise reschedules it with the distance the
    /// refine center has to move at least before the split could become necessary.
    pub(crate) fn update_refine_split(&mut self, face: FaceId) {
        assert!(self.is_leaf(face), "Face {face} is tested for split, but is split.");

        self.update_error_metric(face);
        let ps = self.faces[face].error_metric * self.globals.oo_refine_threshold;
        let level = self.faces[face].level;

        if level >= self.max_split_level(face) {
            self.unschedule(face);
            return;
        }

        if ps > 1.0 {
            self.split(face, true);
            if !self.is_leaf(face) {
                return;
            }
        }

        let f = &self.faces[face];
        let globals = &self.globals;
        let dist_split_point = (f.split_point - globals.refine_center).length();
        let dist_normal = (f.size * globals.oo_refine_threshold).sqrt();
        let tile_limit_level = self.tile_limit_level(face);

        let delta = if level >= tile_limit_level {
            dist_split_point - dist_normal
        } else {
            let dist_min_face = self.min_face_distance(face);
            let normal_delta = dist_split_point - dist_normal;

            if dist_min_face > globals.tile_far {
                normal_delta.min(dist_min_face - globals.tile_far)
            } else if dist_min_face > globals.tile_near {
                let near_limit = globals.refine_threshold * self.compute_near_limit(face);
                let transition = search_tile_transition(|delta| {
                    self.compute_tile_em_for_update_refine(
                        face,
                        dist_split_point - delta,
                        dist_min_face - delta,
                        near_limit,
                    ) < 1.0
                });

                transition
                    .min(globals.tile_far - dist_min_face)
                    .min(dist_min_face - globals.tile_near)
            } else {
                0.0
            }
        };

        self.schedule_split(delta, face);
    }

    /// Merges the sons of a face if its error allows it. Otherwise reschedules it with the
    /// distance the refine center has to move at least before the merge could become possible.
    pub(crate) fn update_refine_merge(&mut self, face: FaceId) {
        assert!(!self.is_leaf(face), "Face {face} is tested for merge, but is a leaf.");

        self.update_error_metric(face);
        let ps = self.faces[face].error_metric * self.globals.oo_refine_threshold;

        if ps < 1.0 && self.can_merge(face, true) {
            self.merge(face);
            if self.is_leaf(face) {
                return;
            }
        }

        let f = &self.faces[face];
        let globals = &self.globals;
        let dist_split_point = (f.split_point - globals.refine_center).length();
        let dist_normal = (f.size * globals.oo_refine_threshold).sqrt();
        let level = f.level;
        let tile_limit_level = self.tile_limit_level(face);

        let delta = if level >= self.max_split_level(face) {
            0.0
        } else if level >= tile_limit_level {
            // Forced splits leave faces which want to merge at once.
            (dist_normal - dist_split_point).max(0.0)
        } else {
            let dist_min_face = self.min_face_distance(face);
            let normal_delta = (dist_normal - dist_split_point).max(0.0);

            if dist_min_face > globals.tile_far {
                normal_delta.min(dist_min_face - globals.tile_far)
            } else if dist_min_face > globals.tile_near {
                let near_limit = globals.refine_threshold * self.compute_near_limit(face);
                let transition = search_tile_transition(|delta| {
                    self.compute_tile_em_for_update_refine(
                        face,
                        dist_split_point + delta,
                        dist_min_face + delta,
                        near_limit,
                    ) > 1.0
                });

                transition
                    .min(globals.tile_far - dist_min_face)
                    .min(dist_min_face - globals.tile_near)
            } else {
                globals.tile_near - dist_min_face
            }
        };

        self.schedule_merge(delta + self.globals.merge_threshold, face);
    }
}

/// Bisects the largest delta in `[0, 8]` for which `unchanged` still holds.
///
/// Returns the lower end of the final interval, so the delta never overshoots the point
/// where the face flips.
fn search_tile_transition(unchanged: impl Fn(f32) -> bool) -> f32 {
    let (mut min, mut max) = (0.0, TILE_TRANSITION_MAX_DELTA);

    for _ in 0..TILE_TRANSITION_STEPS {
        let pivot = (min + max) * 0.5;
        if unchanged(pivot) {
            min = pivot;
        } else {
            max = pivot;
        }
    }

    min
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::{grid_zone, landscape_with};
    use bevy::prelude::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// Refines at `center` until no face is due any more.
    fn settle(landscape: &mut Landscape, center: Vec3) {
        for _ in 0..32 {
            landscape.refine(center);
        }
    }

    /// Leaves whose error demands a split, although they may still be split.
    fn leaves_needing_a_split(landscape: &mut Landscape) -> Vec<FaceId> {
        let leaves = landscape
            .patches
            .iter()
            .map(|(id, _)| id)
            .collect::<Vec<_>>()
            .into_iter()
            .flat_map(|patch| landscape.leaves(patch))
            .collect::<Vec<_>>();

        leaves
            .into_iter()
            .filter(|leaf| {
                if landscape.faces[*leaf].level >= landscape.max_split_level(*leaf) {
                    return false;
                }
                landscape.update_error_metric(*leaf);
                landscape.faces[*leaf].error_metric * landscape.globals.oo_refine_threshold > 1.0
            })
            .collect()
    }

    #[test]
    fn scheduled_faces_split_before_their_error_exceeds_the_threshold() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut landscape = landscape_with([grid_zone(0, 2, 2, 2, 2, Vec3::ZERO)]);

        let mut position = Vec3::new(4.0, 3.0, 4.0);
        landscape.refine_all(position);
        assert!(leaves_needing_a_split(&mut landscape).is_empty());

        for step in 0..300 {
            position += Vec3::new(
                rng.random_range(-2.0..2.0),
                rng.random_range(-0.5..0.5),
                rng.random_range(-2.0..2.0),
            );
            position = position.clamp(Vec3::new(-10.0, 0.2, -10.0), Vec3::new(18.0, 20.0, 18.0));
            landscape.refine(position);

            if step % 20 == 0 {
                settle(&mut landscape, position);
                let pending = leaves_needing_a_split(&mut landscape);
                assert!(pending.is_empty(), "Leaves {pending:?} were not split at {position}.");
                landscape.check_tessellation().unwrap();
            }
        }
    }

    #[test]
    fn tile_transition_search_stays_below_the_flip() {
        for flip in [0.3, 1.0, 2.5, 7.9] {
            let delta = search_tile_transition(|delta| delta < flip);
            assert!(delta <= flip);
            assert!(flip - delta <= TILE_TRANSITION_MAX_DELTA / 64.0 + f32::EPSILON);
        }

        assert_eq!(search_tile_transition(|_| false), 0.0);
        assert!(search_tile_transition(|_| true) > 7.8);
    }
}

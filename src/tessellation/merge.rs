use super::{FaceId, Side};
use crate::{landscape::Landscape, render::RenderEvent};
use bevy::utils::HashSet;

impl Landscape {
    /// Whether the sons of `face` can be merged, which requires the base neighbor (and
    /// the long edge neighbor of a rectangular face) to be mergeable as well.
    ///
    /// With `test_error_metric` faces whose error still demands the split are rejected.
    pub fn can_merge(&mut self, face: FaceId, test_error_metric: bool) -> bool {
        let mut visited = HashSet::default();
        self.can_merge_visit(face, test_error_metric, &mut visited)
    }

    fn can_merge_visit(
        &mut self,
        face: FaceId,
        test_error_metric: bool,
        visited: &mut HashSet<FaceId>,
    ) -> bool {
        if face == FaceId::CANT_MERGE {
            return false;
        }

        let (son_left, son_right) = self.sons(face);
        if !self.is_leaf(son_left) || !self.is_leaf(son_right) {
            return false;
        }

        if test_error_metric {
            self.update_error_metric(face);
            if self.faces[face].error_metric * self.globals.oo_refine_threshold >= 1.0 {
                return false;
            }
        }

        visited.insert(face);

        let f = &self.faces[face];
        let mut neighbors = vec![f.f_base];
        if self.is_rectangular(face) {
            neighbors.push(f.f_left);
        }

        let mergeable = neighbors.into_iter().flatten().all(|neighbor| {
            visited.contains(&neighbor)
                || self.can_merge_visit(neighbor, test_error_metric, visited)
        });

        visited.remove(&face);
        mergeable
    }

    /// Merges the sons of `face` and of its base neighbors. Returns false if the merge
    /// is not allowed.
    pub fn merge(&mut self, face: FaceId) -> bool {
        assert!(!self.is_leaf(face), "Tried merging the leaf face {face}.");

        if !self.can_merge(face, false) {
            return false;
        }

        self.do_merge(face);
        true
    }

    pub(crate) fn do_merge(&mut self, face: FaceId) {
        let (son_left, son_right) = self.sons(face);
        assert!(
            self.is_leaf(son_left) && self.is_leaf(son_right),
            "Tried merging face {face}, whose sons are split."
        );

        let f = self.faces[face].clone();
        let sl = self.faces[son_left].clone();
        let sr = self.faces[son_right].clone();
        let patch = f.patch;

        if !self.is_rectangular(face) {
            let base_split_or_none = f.f_base.map_or(true, |base| !self.is_leaf(base));

            if base_split_or_none {
                self.vertices.remove(sl.v_base);
            }
            if base_split_or_none
                || f.f_base.is_some_and(|base| self.faces[base].patch != patch)
            {
                self.delete_far_vertex(patch, sl.fv_base);
            }

            self.notify(RenderEvent::AppendFace { patch, face });
            self.notify(RenderEvent::RemoveFace {
                patch,
                face: son_left,
            });
            self.notify(RenderEvent::RemoveFace {
                patch,
                face: son_right,
            });

            let tile_limit_level = self.patches[patch].tile_limit_level;
            if sl.level == tile_limit_level {
                assert!(!self.same_tile(son_left, son_right));
                self.release_tile_material(son_left);
                self.release_tile_material(son_right);
            } else if sl.level > tile_limit_level {
                let shares_base_uv = f
                    .f_base
                    .is_some_and(|base| self.is_leaf(base) && self.same_tile(face, base));
                if !shares_base_uv {
                    self.delete_tile_uv(son_left, Side::Base);
                }
                self.delete_tile_faces(son_left);
                self.delete_tile_faces(son_right);
            }

            self.faces[face].f_left = sl.f_base;
            if let Some(left) = sl.f_base {
                self.change_neighbor(left, Some(son_left), Some(face));
            }
            self.faces[face].f_right = sr.f_base;
            if let Some(right) = sr.f_base {
                self.change_neighbor(right, Some(son_right), Some(face));
            }

            self.delete_face(son_left);
            self.delete_face(son_right);
            self.faces[face].son_left = None;
            self.faces[face].son_right = None;

            if let Some(base) = f.f_base.filter(|base| !self.is_leaf(*base)) {
                self.do_merge(base);
            }
        } else {
            debug_assert!(sl.level < self.patches[patch].tile_limit_level);

            if f.f_left.map_or(true, |left| !self.is_leaf(left)) {
                self.vertices.remove(sl.v_base);
            }
            self.delete_far_vertex(patch, sl.fv_base);

            self.notify(RenderEvent::AppendFace { patch, face });
            self.notify(RenderEvent::RemoveFace {
                patch,
                face: son_left,
            });
            self.notify(RenderEvent::RemoveFace {
                patch,
                face: son_right,
            });

            self.faces[face].f_right = sr.f_right;
            if let Some(right) = sr.f_right {
                self.change_neighbor(right, Some(son_right), Some(face));
            }

            self.delete_face(son_left);
            self.delete_face(son_right);
            self.faces[face].son_left = None;
            self.faces[face].son_right = None;

            let twin = f
                .f_base
                .unwrap_or_else(|| panic!("Rectangular face {face} has no twin."));
            if !self.is_leaf(twin) {
                self.do_merge(twin);
            }
            if let Some(left) = f.f_left.filter(|left| !self.is_leaf(*left)) {
                self.do_merge(left);
            }
        }

        self.schedule_split(0.0, face);
        if let Some(father) = f.father {
            let (left, right) = self.sons(father);
            if self.is_leaf(left) && self.is_leaf(right) {
                self.schedule_merge(0.0, father);
            }
        }
    }

    /// Merges everything below `face`, as far as the neighbors allow it.
    pub fn force_merge(&mut self, face: FaceId) {
        let mut visited = HashSet::default();
        self.force_merge_visit(face, &mut visited);
    }

    fn force_merge_visit(&mut self, face: FaceId, visited: &mut HashSet<FaceId>) {
        if face.is_sentinel() || self.faces[face].is_multiple_bind_face() {
            return;
        }

        if let Some(son_left) = self.faces[face].son_left {
            self.force_merge_visit(son_left, visited);
        }
        if let Some(son_right) = self.faces[face].son_right {
            self.force_merge_visit(son_right, visited);
        }

        if self.is_leaf(face) {
            return;
        }

        visited.insert(face);

        if let Some(base) = self.faces[face].f_base.filter(|base| !visited.contains(base)) {
            self.force_merge_visit(base, visited);
        }
        if self.is_rectangular(face) {
            if let Some(left) = self.faces[face].f_left.filter(|left| !visited.contains(left)) {
                self.force_merge_visit(left, visited);
            }
        }

        visited.remove(&face);

        if !self.is_leaf(face) {
            self.merge(face);
        }
    }

    /// Merges every face below the tile level of its patch.
    pub(crate) fn face_force_merge_at_tile_level(&mut self, face: FaceId) {
        let Some(son_left) = self.faces[face].son_left else {
            return;
        };

        let tile_limit_level = self.patches[self.faces[face].patch].tile_limit_level;

        if self.faces[face].level == tile_limit_level {
            self.force_merge(face);
        } else {
            self.face_force_merge_at_tile_level(son_left);
            if let Some(son_right) = self.faces.get(face).and_then(|f| f.son_right) {
                self.face_force_merge_at_tile_level(son_right);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::test_utils::{grid_zone, landscape_with};
    use bevy::prelude::*;

    #[test]
    fn split_sons_block_the_merge() {
        let mut landscape = landscape_with([grid_zone(0, 1, 1, 4, 4, Vec3::ZERO)]);
        let patch = landscape.patch_id(0, 0).unwrap();
        let root = landscape.patches[patch].roots()[0];

        landscape.split(root, true);
        let (son_left, _) = landscape.sons(root);
        landscape.split(son_left, true);

        assert!(!landscape.can_merge(root, false));
        assert!(!landscape.merge(root));
        assert!(landscape.can_merge(son_left, false));
        landscape.check_tessellation().unwrap();

        landscape.force_merge(root);
        assert!(landscape.is_leaf(root));
        assert_eq!(landscape.vertex_count(), 4);
        landscape.check_tessellation().unwrap();
    }

    #[test]
    fn close_faces_refuse_the_error_merge() {
        let mut landscape = landscape_with([grid_zone(0, 1, 1, 2, 2, Vec3::ZERO)]);
        let patch = landscape.patch_id(0, 0).unwrap();
        let root = landscape.patches[patch].roots()[0];

        landscape.refine_all(Vec3::new(2.0, 0.5, 2.0));
        assert!(!landscape.is_leaf(root));
        assert!(!landscape.can_merge(landscape.sons(root).0, true));
    }

    #[test]
    #[should_panic]
    fn merging_a_leaf_panics() {
        let mut landscape = landscape_with([grid_zone(0, 1, 1, 2, 2, Vec3::ZERO)]);
        let root = landscape.patches[landscape.patch_id(0, 0).unwrap()].roots()[0];
        landscape.merge(root);
    }

    #[test]
    fn tile_level_merge_keeps_the_coarse_faces() {
        let mut landscape = landscape_with([grid_zone(0, 1, 1, 2, 2, Vec3::ZERO)]);
        let patch = landscape.patch_id(0, 0).unwrap();
        let tile_limit_level = landscape.patches[patch].tile_limit_level;

        landscape.refine_all(Vec3::new(2.0, 0.1, 2.0));
        assert!(landscape
            .leaves(patch)
            .iter()
            .any(|leaf| landscape.faces[*leaf].level > tile_limit_level));

        landscape.force_merge_all_at_tile_level();
        let leaves = landscape.leaves(patch);
        assert_eq!(leaves.len(), 8);
        assert!(leaves
            .iter()
            .all(|leaf| landscape.faces[*leaf].level == tile_limit_level));
        landscape.check_tessellation().unwrap();
    }
}

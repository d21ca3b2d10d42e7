use super::{FaceId, Vertex, MAX_FACE_LEVEL};
use crate::{config::RefineGlobals, landscape::Landscape};

impl Vertex {
    /// Blends `pos` from `start_pos` to `end_pos` as the refine center approaches.
    ///
    /// The blend follows the same metric that decides the split of the faces sharing this
    /// vertex, so a vertex reaches its surface position when the faces are split further.
    pub(crate) fn compute_geom_pos(&mut self, globals: &RefineGlobals) {
        let sqr_dist = (self.start_pos - globals.refine_center).length_squared();

        if sqr_dist <= 0.0 {
            self.pos = self.end_pos;
            return;
        }

        let mut pgeom = self.max_face_size * globals.oo_refine_threshold / sqr_dist;

        if sqr_dist < globals.tile_far_sqr && pgeom < self.max_near_limit {
            let f = ((globals.tile_far_sqr - sqr_dist) * globals.oo_tile_delta_sqr)
                .clamp(0.0, 1.0)
                .powi(4);
            pgeom = self.max_near_limit * f + pgeom * (1.0 - f);
        }

        self.pos = if pgeom <= 1.0 {
            self.start_pos
        } else if pgeom >= 2.0 {
            self.end_pos
        } else {
            self.start_pos + (pgeom - 1.0) * (self.end_pos - self.start_pos)
        };
    }
}

impl Landscape {
    /// The factor by which the error of a face is raised while it is above the tile level.
    pub(crate) fn compute_near_limit(&self, face: FaceId) -> f32 {
        let face = &self.faces[face];
        assert!(
            face.level <= MAX_FACE_LEVEL,
            "Face level {} exceeds the maximum of {MAX_FACE_LEVEL}.",
            face.level
        );

        let tile_limit_level = self.patches[face.patch].tile_limit_level;
        (1u32 << tile_limit_level) as f32 / (1u32 << face.level) as f32
    }

    pub(crate) fn compute_split_point(&mut self, face: FaceId) {
        let f = &self.faces[face];
        let other = if self.is_rectangular(face) {
            f.v_base
        } else {
            f.v_right
        };

        let split_point = (self.vertices[f.v_left].end_pos + self.vertices[other].end_pos) * 0.5;
        self.faces[face].split_point = split_point;
    }

    /// Recomputes the error metric of a face once per refine date.
    pub(crate) fn update_error_metric(&mut self, face: FaceId) {
        let f = &self.faces[face];
        if f.error_metric_date >= self.globals.current_date {
            return;
        }

        let sqr_dist = (f.split_point - self.globals.refine_center)
            .length_squared()
            .max(f32::MIN_POSITIVE);
        let mut error_metric = f.size / sqr_dist;

        if f.level < self.patches[f.patch].tile_limit_level {
            error_metric = self.compute_tile_error_metric(face, error_metric);
        }

        let f = &mut self.faces[face];
        f.error_metric = error_metric;
        f.error_metric_date = self.globals.current_date;
    }

    /// Raises the error of faces above the tile level near the refine center, so that
    /// tiles are complete before their textures get close.
    fn compute_tile_error_metric(&self, face: FaceId, error_metric: f32) -> f32 {
        let globals = &self.globals;
        let sqr_dist = self.faces[face]
            .vertices()
            .iter()
            .map(|vertex| (self.vertices[*vertex].end_pos - globals.refine_center).length_squared())
            .fold(f32::MAX, f32::min);

        if sqr_dist >= globals.tile_far_sqr {
            return error_metric;
        }

        let near_limit = globals.refine_threshold * self.compute_near_limit(face);
        if error_metric >= near_limit {
            return error_metric;
        }

        if sqr_dist < globals.tile_near_sqr {
            near_limit
        } else {
            let f = ((globals.tile_far_sqr - sqr_dist) * globals.oo_tile_delta_sqr).powi(4);
            error_metric + (near_limit - error_metric) * f
        }
    }

    /// The scaled error metric of a face, if the split point and the closest vertex of the face
    /// were at the given distances.
    pub(crate) fn compute_tile_em_for_update_refine(
        &self,
        face: FaceId,
        dist_split_point: f32,
        dist_min_face: f32,
        near_limit: f32,
    ) -> f32 {
        let globals = &self.globals;
        let sqr_dist_split_point = (dist_split_point * dist_split_point).max(f32::MIN_POSITIVE);
        let mut ema = self.faces[face].size / sqr_dist_split_point;

        if dist_min_face < globals.tile_far && ema < near_limit {
            if dist_min_face < globals.tile_near {
                ema = near_limit;
            } else {
                let sqr_dist = dist_min_face * dist_min_face;
                let f = ((globals.tile_far_sqr - sqr_dist) * globals.oo_tile_delta_sqr).powi(4);
                ema += (near_limit - ema) * f;
            }
        }

        ema * globals.oo_refine_threshold
    }

    /// The closest distance from the refine center to the surface positions of the face.
    pub(crate) fn min_face_distance(&self, face: FaceId) -> f32 {
        self.faces[face]
            .vertices()
            .iter()
            .map(|vertex| (self.vertices[*vertex].end_pos - self.globals.refine_center).length_squared())
            .fold(f32::MAX, f32::min)
            .sqrt()
    }

    pub(crate) fn update_geomorph(&mut self) {
        let globals = self.globals;

        for (_, vertex) in self.vertices.iter_mut() {
            vertex.compute_geom_pos(&globals);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::LandscapeConfig;
    use bevy::prelude::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn vertex(max_face_size: f32, max_near_limit: f32) -> Vertex {
        Vertex {
            start_pos: Vec3::new(0.0, 0.0, 0.0),
            end_pos: Vec3::new(0.0, 4.0, 0.0),
            pos: Vec3::ZERO,
            max_face_size,
            max_near_limit,
            zone_refs: 0,
        }
    }

    #[test]
    fn geomorph_stays_between_start_and_end() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut globals = RefineGlobals::new(&LandscapeConfig::default());

        for _ in 0..1000 {
            let mut v = vertex(rng.random_range(0.0..50.0), rng.random_range(0.0..16.0));
            globals.refine_center = Vec3::new(
                rng.random_range(-200.0..200.0),
                rng.random_range(-200.0..200.0),
                rng.random_range(-200.0..200.0),
            );

            v.compute_geom_pos(&globals);

            assert!(v.pos.x == 0.0 && v.pos.z == 0.0);
            assert!((0.0..=4.0).contains(&v.pos.y), "{:?}", v.pos);
        }
    }

    #[test]
    fn geomorph_reaches_end_close_to_the_center() {
        let mut globals = RefineGlobals::new(&LandscapeConfig::default());
        let mut v = vertex(1.0, 0.0);

        globals.refine_center = Vec3::new(1.0, 0.0, 0.0);
        v.compute_geom_pos(&globals);
        assert_eq!(v.pos, v.end_pos);

        globals.refine_center = Vec3::new(1000.0, 0.0, 0.0);
        v.compute_geom_pos(&globals);
        assert_eq!(v.pos, v.start_pos);
    }

    #[test]
    fn near_limit_pulls_vertices_to_the_surface() {
        let mut globals = RefineGlobals::new(&LandscapeConfig::default());
        globals.refine_center = Vec3::new(10.0, 0.0, 0.0);

        let mut v = vertex(0.0, 4.0);
        v.compute_geom_pos(&globals);
        assert_eq!(v.pos, v.end_pos);
    }
}

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// The bicubic Bezier control net of a patch.
///
/// Corner `0` sits at `(s, t) = (0, 0)`, corner `1` at `(0, 1)`, corner `2` at `(1, 1)`
/// and corner `3` at `(1, 0)`. Tangents run counter clockwise around the border starting
/// at corner `0`, the four interior points start at `(1/3, 1/3)`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct BezierPatch {
    pub vertices: [Vec3; 4],
    pub tangents: [Vec3; 8],
    pub interiors: [Vec3; 4],
}

impl BezierPatch {
    /// A bilinear patch spanned by the four corners.
    pub fn flat(corners: [Vec3; 4]) -> Self {
        let [a, b, c, d] = corners;
        let bilinear = |s: f32, t: f32| {
            a * (1.0 - s) * (1.0 - t) + d * s * (1.0 - t) + b * (1.0 - s) * t + c * s * t
        };
        let third = 1.0 / 3.0;

        Self {
            vertices: corners,
            tangents: [
                bilinear(0.0, third),
                bilinear(0.0, 2.0 * third),
                bilinear(third, 1.0),
                bilinear(2.0 * third, 1.0),
                bilinear(1.0, 2.0 * third),
                bilinear(1.0, third),
                bilinear(2.0 * third, 0.0),
                bilinear(third, 0.0),
            ],
            interiors: [
                bilinear(third, third),
                bilinear(third, 2.0 * third),
                bilinear(2.0 * third, 2.0 * third),
                bilinear(2.0 * third, third),
            ],
        }
    }

    pub fn eval(&self, s: f32, t: f32) -> Vec3 {
        let [v0, v1, v2, v3] = self.vertices;
        let [t0, t1, t2, t3, t4, t5, t6, t7] = self.tangents;
        let [i0, i1, i2, i3] = self.interiors;

        let bs = bernstein(s);
        let bt = bernstein(t);

        let rows = [
            [v0, t7, t6, v3],
            [t0, i0, i3, t5],
            [t1, i1, i2, t4],
            [v1, t2, t3, v2],
        ];

        rows.iter()
            .zip(bt)
            .map(|(row, wt)| {
                row.iter()
                    .zip(bs)
                    .map(|(point, ws)| *point * ws)
                    .sum::<Vec3>()
                    * wt
            })
            .sum()
    }

    pub fn control_points(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.vertices
            .iter()
            .chain(&self.tangents)
            .chain(&self.interiors)
            .copied()
    }
}

fn bernstein(x: f32) -> [f32; 4] {
    let y = 1.0 - x;
    [y * y * y, 3.0 * x * y * y, 3.0 * x * x * y, x * x * x]
}

/// Evaluates the final surface position of a point in the parameter space of a patch.
///
/// Implementations may add displacement or noise on top of the control net.
pub trait SurfaceEvaluator: Send + Sync + 'static {
    fn compute_vertex(&self, patch: &BezierPatch, s: f32, t: f32) -> Vec3;
}

/// Evaluates the plain Bezier surface.
#[derive(Clone, Copy, Debug, Default)]
pub struct BezierSurface;

impl SurfaceEvaluator for BezierSurface {
    fn compute_vertex(&self, patch: &BezierPatch, s: f32, t: f32) -> Vec3 {
        patch.eval(s, t)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn corners() -> [Vec3; 4] {
        [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 4.0),
            Vec3::new(4.0, 2.0, 4.0),
            Vec3::new(4.0, 3.0, 0.0),
        ]
    }

    #[test]
    fn corners_are_interpolated() {
        let patch = BezierPatch::flat(corners());

        for (corner, (s, t)) in corners()
            .into_iter()
            .zip([(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)])
        {
            let p = patch.eval(s, t);
            assert_relative_eq!(p.x, corner.x, epsilon = 1e-5);
            assert_relative_eq!(p.y, corner.y, epsilon = 1e-5);
            assert_relative_eq!(p.z, corner.z, epsilon = 1e-5);
        }
    }

    #[test]
    fn flat_patch_is_bilinear() {
        let patch = BezierPatch::flat(corners());
        let p = patch.eval(0.25, 0.5);

        // s runs along x, t along z.
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(p.z, 2.0, epsilon = 1e-5);
        assert_relative_eq!(p.y, 0.25 * 0.5 * 3.0 + 0.5 * 0.75 + 0.25 * 0.5 * 2.0, epsilon = 1e-5);
    }
}

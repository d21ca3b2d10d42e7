use bevy::{
    math::Mat3A,
    prelude::*,
    render::primitives::{Aabb, HalfSpace},
};
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// A fixed point coordinate in the parameter space of a patch.
///
/// Both components map `0..=0x8000` onto `0.0..=1.0`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ParamCoord {
    pub s: u16,
    pub t: u16,
}

impl ParamCoord {
    pub const ONE: u16 = 0x8000;

    pub fn new(s: f32, t: f32) -> Self {
        let quantize = |x: f32| (x.clamp(0.0, 1.0) * Self::ONE as f32).round() as u16;

        Self {
            s: quantize(s),
            t: quantize(t),
        }
    }

    /// The exact midpoint of two coordinates.
    pub fn middle(a: Self, b: Self) -> Self {
        Self {
            s: ((a.s as u32 + b.s as u32) / 2) as u16,
            t: ((a.t as u32 + b.t as u32) / 2) as u16,
        }
    }

    pub fn s(self) -> f32 {
        self.s as f32 / Self::ONE as f32
    }

    pub fn t(self) -> f32 {
        self.t as f32 / Self::ONE as f32
    }

    pub fn uv(self) -> Vec2 {
        Vec2::new(self.s(), self.t())
    }
}

/// A position quantized to 16 bit integers relative to a zone wide scale and bias.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct PackedVector {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl PackedVector {
    pub fn pack(position: Vec3, bias: Vec3, scale: f32) -> Self {
        let relative = ((position - bias) / scale)
            .round()
            .clamp(Vec3::splat(i16::MIN as f32), Vec3::splat(i16::MAX as f32));

        Self {
            x: relative.x as i16,
            y: relative.y as i16,
            z: relative.z as i16,
        }
    }

    pub fn unpack(self, bias: Vec3, scale: f32) -> Vec3 {
        Vec3::new(self.x as f32, self.y as f32, self.z as f32) * scale + bias
    }
}

/// The visibility of a bounding volume with respect to a set of clip planes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClipResult {
    In,
    Side,
    #[default]
    Out,
}

/// Classifies an [`Aabb`] against planes whose positive side is the visible one.
pub(crate) fn clip_aabb(aabb: &Aabb, planes: &[HalfSpace]) -> ClipResult {
    let mut result = ClipResult::In;

    for half_space in planes {
        let relative_radius = aabb.relative_radius(&half_space.normal(), &Mat3A::IDENTITY);
        let distance = half_space.normal_d().dot(aabb.center.extend(1.0));

        if distance + relative_radius <= 0.0 {
            return ClipResult::Out;
        }
        if distance - relative_radius < 0.0 {
            result = ClipResult::Side;
        }
    }

    result
}

pub(crate) fn aabb_from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Aabb> {
    let (min, max) = points.into_iter().fold(
        (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
        |(min, max), point| (min.min(point), max.max(point)),
    );

    (min.cmple(max).all()).then(|| Aabb::from_min_max(min, max))
}

/// Builds the clip plane for which `normal` points towards the visible side.
pub fn half_space(normal: Vec3, point: Vec3) -> HalfSpace {
    let normal = normal.normalize();
    HalfSpace::new(normal.extend(-normal.dot(point)))
}

pub(crate) fn perp_dot(a: Vec2, b: Vec2) -> f32 {
    a.x * b.y - a.y * b.x
}

//! Flat zones for the unit tests.
//!
//! Grid zones lay out `nx` by `nz` patches along the x and z axes. Patch `(i, j)` has
//! the index `j * nx + i`, its `s` axis points along x and its `t` axis along z.
//! Base vertex `(a, b)` of the grid has the index `b * (nx + 1) + a`.

use crate::{
    config::LandscapeConfig,
    landscape::Landscape,
    patch::{TileColor, TileElement},
    surface::BezierPatch,
    zone::{BindEdge, BorderVertex, PatchInfo, SmoothFlags, Zone, ZoneDescriptor},
};
use bevy::prelude::*;

/// The side length of a tile in meters.
pub(crate) const TILE_SIZE: f32 = 2.0;

fn open_edge(zone_id: u16) -> BindEdge {
    BindEdge {
        zone_id,
        ..default()
    }
}

fn flat_patch(
    corners: [Vec3; 4],
    base_vertices: [u16; 4],
    order_s: u8,
    order_t: u8,
    bind_edges: [BindEdge; 4],
) -> PatchInfo {
    let (s, t) = (order_s as usize, order_t as usize);
    let size = corners[2] - corners[0];

    PatchInfo {
        patch: BezierPatch::flat(corners),
        order_s,
        order_t,
        error_size: (size.x * size.z).abs(),
        base_vertices,
        bind_edges,
        smooth: SmoothFlags::empty(),
        noise_rotation: 0,
        tiles: vec![TileElement::new(0); s * t],
        tile_colors: vec![TileColor::default(); (s + 1) * (t + 1)],
    }
}

pub(crate) fn grid_descriptor(
    zone_id: u16,
    nx: usize,
    nz: usize,
    order_s: u8,
    order_t: u8,
    origin: Vec3,
) -> ZoneDescriptor {
    let (width, depth) = (order_s as f32 * TILE_SIZE, order_t as f32 * TILE_SIZE);
    let vertex = |a: usize, b: usize| (b * (nx + 1) + a) as u16;
    let position = |a: usize, b: usize| origin + Vec3::new(a as f32 * width, 0.0, b as f32 * depth);
    let patch_index = |i: usize, j: usize| (j * nx + i) as u16;

    let mut patches = Vec::new();

    for j in 0..nz {
        for i in 0..nx {
            let corners = [(i, j), (i, j + 1), (i + 1, j + 1), (i + 1, j)];

            let bind_edges = [
                (i > 0).then(|| BindEdge::single(zone_id, patch_index(i - 1, j), 2)),
                (j + 1 < nz).then(|| BindEdge::single(zone_id, patch_index(i, j + 1), 3)),
                (i + 1 < nx).then(|| BindEdge::single(zone_id, patch_index(i + 1, j), 0)),
                (j > 0).then(|| BindEdge::single(zone_id, patch_index(i, j - 1), 1)),
            ]
            .map(|edge| edge.unwrap_or_else(|| open_edge(zone_id)));

            patches.push(flat_patch(
                corners.map(|(a, b)| position(a, b)),
                corners.map(|(a, b)| vertex(a, b)),
                order_s,
                order_t,
                bind_edges,
            ));
        }
    }

    ZoneDescriptor {
        zone_id,
        patches,
        border_vertices: Vec::new(),
        num_vertices: ((nx + 1) * (nz + 1)) as u32,
    }
}

pub(crate) fn grid_zone(
    zone_id: u16,
    nx: usize,
    nz: usize,
    order_s: u8,
    order_t: u8,
    origin: Vec3,
) -> Zone {
    Zone::build(&grid_descriptor(zone_id, nx, nz, order_s, order_t, origin))
}

/// Binds the right column of `left` to the left column of `right`, patch by patch along z.
pub(crate) fn connect_zones_x(left: &mut ZoneDescriptor, right: &mut ZoneDescriptor) {
    let open = |descriptor: &ZoneDescriptor, edge: usize| {
        descriptor
            .patches
            .iter()
            .enumerate()
            .filter(|(_, patch)| patch.bind_edges[edge].n_patchs == 0)
            .map(|(index, _)| index)
            .collect::<Vec<_>>()
    };
    let (left_column, right_column) = (open(left, 2), open(right, 0));
    assert_eq!(left_column.len(), right_column.len());

    for (l, r) in left_column.into_iter().zip(right_column) {
        left.patches[l].bind_edges[2] = BindEdge::single(right.zone_id, r as u16, 0);
        right.patches[r].bind_edges[0] = BindEdge::single(left.zone_id, l as u16, 2);

        let [_, _, left_c, left_d] = left.patches[l].base_vertices;
        let [right_a, right_b, _, _] = right.patches[r].base_vertices;

        for (ours, theirs) in [(left_d, right_a), (left_c, right_b)] {
            let border = BorderVertex {
                current_vertex: ours,
                neighbor_zone_id: right.zone_id,
                neighbor_vertex: theirs,
            };
            if !left.border_vertices.contains(&border) {
                left.border_vertices.push(border);
            }

            let border = BorderVertex {
                current_vertex: theirs,
                neighbor_zone_id: left.zone_id,
                neighbor_vertex: ours,
            };
            if !right.border_vertices.contains(&border) {
                right.border_vertices.push(border);
            }
        }
    }
}

/// A zone whose big 4x4 patch `0` shares its edge `2` with `fan` smaller patches.
///
/// The small patches `1..=fan` are stacked along z, patch `fan` touches the corner `2` of
/// the big patch.
pub(crate) fn fan_zone(zone_id: u16, fan: usize) -> Zone {
    assert!(fan == 2 || fan == 4);

    let size = 4.0 * TILE_SIZE;
    let step = size / fan as f32;
    let order = (step / TILE_SIZE) as u8;

    let edge_vertex = |m: usize| match m {
        0 => 3,
        m if m == fan => 2,
        m => (4 + m - 1) as u16,
    };
    let outer_vertex = |m: usize| (4 + fan - 1 + m) as u16;
    let edge_position = |m: usize| Vec3::new(size, 0.0, m as f32 * step);
    let outer_position = |m: usize| Vec3::new(size + step, 0.0, m as f32 * step);

    let mut next = [0; 4];
    for (slot, patch) in (1..=fan).rev().enumerate() {
        next[slot] = patch as u16;
    }

    let mut patches = vec![flat_patch(
        [
            Vec3::ZERO,
            Vec3::new(0.0, 0.0, size),
            Vec3::new(size, 0.0, size),
            Vec3::new(size, 0.0, 0.0),
        ],
        [0, 1, 2, 3],
        4,
        4,
        [
            open_edge(zone_id),
            open_edge(zone_id),
            BindEdge {
                n_patchs: fan as u8,
                zone_id,
                next,
                edge: [0; 4],
            },
            open_edge(zone_id),
        ],
    )];

    for k in 1..=fan {
        let (low, high) = (k - 1, k);

        patches.push(flat_patch(
            [
                edge_position(low),
                edge_position(high),
                outer_position(high),
                outer_position(low),
            ],
            [
                edge_vertex(low),
                edge_vertex(high),
                outer_vertex(high),
                outer_vertex(low),
            ],
            order,
            order,
            [
                BindEdge {
                    n_patchs: 5,
                    zone_id,
                    next: [0; 4],
                    edge: [2, 0, 0, 0],
                },
                if k < fan {
                    BindEdge::single(zone_id, k as u16 + 1, 3)
                } else {
                    open_edge(zone_id)
                },
                open_edge(zone_id),
                if k > 1 {
                    BindEdge::single(zone_id, k as u16 - 1, 1)
                } else {
                    open_edge(zone_id)
                },
            ],
        ));
    }

    Zone::build(&ZoneDescriptor {
        zone_id,
        patches,
        border_vertices: Vec::new(),
        num_vertices: (2 * fan + 4) as u32,
    })
}

pub(crate) fn landscape_with(zones: impl IntoIterator<Item = Zone>) -> Landscape {
    let mut landscape = Landscape::new(LandscapeConfig::default());

    for zone in zones {
        assert!(landscape.add_zone(zone));
    }

    landscape
}

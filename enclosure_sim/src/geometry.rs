// Room geometry: convex hull and minimum-area oriented box.
//
// Turns a candidate member list into the room's bounding volume:
//
// 1. Footprint corners. Each member contributes the four plan-view corners
//    of its width × depth rectangle, rotated by its pose. Members without an
//    explicit footprint use the per-kind defaults from `GeometryParams`.
// 2. Flatten to plan `(x, z)` and merge corners closer than `dedup_epsilon`.
// 3. Graham scan: pivot is the lowest-then-leftmost point, the rest sort by
//    polar angle (ties nearest first), and the sweep pops while the last
//    turn is not strictly left. Output is counter-clockwise.
// 4. Rotating calipers: for each hull edge, project the hull on the edge
//    direction and its perpendicular; the smallest extent product wins.
// 5. Extrude: height is the smallest member height (clamped to
//    `min_room_height`); the box floor sits at the average corner height.
//
// An axis-aligned box over the same corners is computed alongside for fast
// point rejection.
//
// Failures are explicit `GeometryError`s. Fewer than three usable points or
// a zero-area hull never produce a box. Two validity gates run first:
// members must sit at a consistent height, and none may stray too far from
// the group's plan centroid.
//
// All functions here are pure and allocation-light so candidate geometry can
// be evaluated in parallel (see `room.rs`).

use crate::config::GeometryParams;
use crate::instance::BuildingInstance;
use crate::types::{InstanceId, flatten};
use glam::{Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hull and box areas below this are treated as zero.
const AREA_EPSILON: f32 = 1e-5;

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// Axis-aligned box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

/// Box rotated about +Y. `angle` is the plan-view direction of the box's
/// local X axis, measured from world +X toward world +Z.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrientedBox {
    pub center: Vec3,
    pub angle: f32,
    /// Extent along local X (the calipers edge), Y (height), Z.
    pub size: Vec3,
}

impl OrientedBox {
    /// Rotation taking local axes to world axes.
    pub fn rotation(&self) -> Quat {
        Quat::from_rotation_y(-self.angle)
    }

    pub fn volume(&self) -> f32 {
        self.size.x * self.size.y * self.size.z
    }

    /// Point in the box's local frame.
    pub fn to_local(&self, point: Vec3) -> Vec3 {
        self.rotation().inverse() * (point - self.center)
    }

    pub fn contains(&self, point: Vec3) -> bool {
        let local = self.to_local(point).abs();
        let half = self.size * 0.5;
        local.cmple(half + Vec3::splat(1e-4)).all()
    }
}

/// Plan-view minimum-area rectangle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect2 {
    pub center: Vec2,
    pub angle: f32,
    /// Extent along the edge direction, then along its perpendicular.
    pub extent: Vec2,
}

impl Rect2 {
    pub fn area(&self) -> f32 {
        self.extent.x * self.extent.y
    }
}

/// Derived bounding volume of a room.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoomGeometry {
    pub obb: OrientedBox,
    pub aabb: Aabb,
    /// Plan-view hull, counter-clockwise.
    pub hull: Vec<Vec2>,
    pub floor_height: f32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum GeometryError {
    TooFewMembers { count: usize },
    TooFewPoints { count: usize },
    DegenerateHull,
    VerticalMisalignment { instance: InstanceId, deviation: f32, limit: f32 },
    MembersTooSpread { instance: InstanceId, distance: f32, limit: f32 },
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryError::TooFewMembers { count } => {
                write!(f, "{count} members cannot enclose a room")
            }
            GeometryError::TooFewPoints { count } => {
                write!(f, "only {count} distinct footprint points")
            }
            GeometryError::DegenerateHull => write!(f, "footprint hull has zero area"),
            GeometryError::VerticalMisalignment {
                instance,
                deviation,
                limit,
            } => write!(
                f,
                "{instance} is {deviation:.2} off the average height (limit {limit:.2})"
            ),
            GeometryError::MembersTooSpread {
                instance,
                distance,
                limit,
            } => write!(
                f,
                "{instance} is {distance:.2} from the group centroid (limit {limit:.2})"
            ),
        }
    }
}

impl std::error::Error for GeometryError {}

// ---------------------------------------------------------------------------
// Building blocks
// ---------------------------------------------------------------------------

/// World-space footprint corners of one member.
pub fn footprint_corners(instance: &BuildingInstance, params: &GeometryParams) -> [Vec3; 4] {
    let fp = instance.resolved_footprint(&params.footprints);
    let hw = fp.width * 0.5;
    let hd = fp.depth * 0.5;
    [
        Vec3::new(-hw, 0.0, -hd),
        Vec3::new(hw, 0.0, -hd),
        Vec3::new(hw, 0.0, hd),
        Vec3::new(-hw, 0.0, hd),
    ]
    .map(|local| instance.pose.transform_point(local))
}

/// Keep the first of any points closer than `epsilon` to an earlier one.
pub fn dedup_points(points: &[Vec2], epsilon: f32) -> Vec<Vec2> {
    let eps_sq = epsilon * epsilon;
    let mut out: Vec<Vec2> = Vec::with_capacity(points.len());
    for &p in points {
        if !out.iter().any(|q| q.distance_squared(p) < eps_sq) {
            out.push(p);
        }
    }
    out
}

/// z-component of `(a - o) × (b - o)`; positive for a left turn.
fn cross(o: Vec2, a: Vec2, b: Vec2) -> f32 {
    (a - o).perp_dot(b - o)
}

/// Graham scan. Returns the hull counter-clockwise starting at the
/// lowest-then-leftmost point. Collinear boundary points are dropped.
pub fn convex_hull(points: &[Vec2]) -> Vec<Vec2> {
    let Some(pivot_idx) = (0..points.len()).min_by(|&i, &j| {
        points[i]
            .y
            .total_cmp(&points[j].y)
            .then(points[i].x.total_cmp(&points[j].x))
    }) else {
        return Vec::new();
    };
    let pivot = points[pivot_idx];

    let mut rest: Vec<Vec2> = points
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != pivot_idx)
        .map(|(_, &p)| p)
        .collect();
    rest.sort_by(|a, b| {
        let da = *a - pivot;
        let db = *b - pivot;
        da.y.atan2(da.x)
            .total_cmp(&db.y.atan2(db.x))
            .then(da.length_squared().total_cmp(&db.length_squared()))
    });

    let mut hull: Vec<Vec2> = Vec::with_capacity(points.len());
    hull.push(pivot);
    for p in rest {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull
}

/// Absolute area of a simple polygon (shoelace).
pub fn polygon_area(polygon: &[Vec2]) -> f32 {
    if polygon.len() < 3 {
        return 0.0;
    }
    let twice: f32 = polygon
        .iter()
        .zip(polygon.iter().cycle().skip(1))
        .map(|(a, b)| a.perp_dot(*b))
        .sum();
    (twice * 0.5).abs()
}

/// Rotating calipers over a convex hull. `None` if every edge is
/// degenerate.
pub fn min_area_rect(hull: &[Vec2]) -> Option<Rect2> {
    let n = hull.len();
    let mut best: Option<Rect2> = None;
    for i in 0..n {
        let edge = hull[(i + 1) % n] - hull[i];
        let Some(axis) = edge.try_normalize() else {
            continue;
        };
        let perp = axis.perp();

        let (mut min_a, mut max_a) = (f32::INFINITY, f32::NEG_INFINITY);
        let (mut min_p, mut max_p) = (f32::INFINITY, f32::NEG_INFINITY);
        for &p in hull {
            let a = p.dot(axis);
            let q = p.dot(perp);
            min_a = min_a.min(a);
            max_a = max_a.max(a);
            min_p = min_p.min(q);
            max_p = max_p.max(q);
        }

        let rect = Rect2 {
            center: axis * ((min_a + max_a) * 0.5) + perp * ((min_p + max_p) * 0.5),
            angle: axis.y.atan2(axis.x),
            extent: Vec2::new(max_a - min_a, max_p - min_p),
        };
        // Earlier edges win near-ties.
        if best.is_none_or(|b| rect.area() < b.area() - AREA_EPSILON) {
            best = Some(rect);
        }
    }
    best
}

/// Plan-view center line of a member: its local X axis across the width of
/// its footprint.
pub fn center_line(instance: &BuildingInstance, params: &GeometryParams) -> (Vec2, Vec2) {
    let hw = instance.resolved_footprint(&params.footprints).width * 0.5;
    (
        flatten(instance.pose.transform_point(Vec3::new(-hw, 0.0, 0.0))),
        flatten(instance.pose.transform_point(Vec3::new(hw, 0.0, 0.0))),
    )
}

/// Closest pair of points between segments `p0-p1` and `q0-q1`. Parallel
/// segments resolve to the pair nearest `p0`.
pub fn closest_points_on_segments(p0: Vec2, p1: Vec2, q0: Vec2, q1: Vec2) -> (Vec2, Vec2) {
    const EPS: f32 = 1e-8;
    let d1 = p1 - p0;
    let d2 = q1 - q0;
    let r = p0 - q0;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    let (s, t) = if a <= EPS && e <= EPS {
        (0.0, 0.0)
    } else if a <= EPS {
        (0.0, (f / e).clamp(0.0, 1.0))
    } else {
        let c = d1.dot(r);
        if e <= EPS {
            ((-c / a).clamp(0.0, 1.0), 0.0)
        } else {
            let b = d1.dot(d2);
            let denom = a * e - b * b;
            let s = if denom > EPS {
                ((b * f - c * e) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let t = (b * s + f) / e;
            if t < 0.0 {
                ((-c / a).clamp(0.0, 1.0), 0.0)
            } else if t > 1.0 {
                (((b - c) / a).clamp(0.0, 1.0), 1.0)
            } else {
                (s, t)
            }
        }
    };
    (p0 + d1 * s, q0 + d2 * t)
}

// ---------------------------------------------------------------------------
// Full pipeline
// ---------------------------------------------------------------------------

fn check_alignment(
    members: &[&BuildingInstance],
    params: &GeometryParams,
) -> Result<(), GeometryError> {
    let count = members.len() as f32;
    let avg_y = members.iter().map(|m| m.position().y).sum::<f32>() / count;
    let centroid = members.iter().map(|m| flatten(m.position())).sum::<Vec2>() / count;

    for m in members {
        let deviation = (m.position().y - avg_y).abs();
        if deviation > params.max_vertical_deviation {
            return Err(GeometryError::VerticalMisalignment {
                instance: m.id,
                deviation,
                limit: params.max_vertical_deviation,
            });
        }
        let distance = flatten(m.position()).distance(centroid);
        if distance > params.max_member_spread {
            return Err(GeometryError::MembersTooSpread {
                instance: m.id,
                distance,
                limit: params.max_member_spread,
            });
        }
    }
    Ok(())
}

/// Bounding volume for a candidate room.
pub fn compute_room_geometry(
    members: &[&BuildingInstance],
    params: &GeometryParams,
) -> Result<RoomGeometry, GeometryError> {
    if members.len() < 3 {
        return Err(GeometryError::TooFewMembers {
            count: members.len(),
        });
    }
    check_alignment(members, params)?;

    let corners: Vec<Vec3> = members
        .iter()
        .flat_map(|m| footprint_corners(m, params))
        .collect();
    let floor_height = corners.iter().map(|c| c.y).sum::<f32>() / corners.len() as f32;

    let flat: Vec<Vec2> = corners.iter().map(|&c| flatten(c)).collect();
    let points = dedup_points(&flat, params.dedup_epsilon);
    if points.len() < 3 {
        return Err(GeometryError::TooFewPoints {
            count: points.len(),
        });
    }

    let hull = convex_hull(&points);
    if hull.len() < 3 {
        return Err(GeometryError::TooFewPoints { count: hull.len() });
    }
    if polygon_area(&hull) < AREA_EPSILON {
        return Err(GeometryError::DegenerateHull);
    }
    let rect = min_area_rect(&hull).ok_or(GeometryError::DegenerateHull)?;
    if rect.area() < AREA_EPSILON {
        return Err(GeometryError::DegenerateHull);
    }

    let height = members
        .iter()
        .map(|m| m.resolved_footprint(&params.footprints).height)
        .fold(f32::INFINITY, f32::min)
        .max(params.min_room_height);

    let obb = OrientedBox {
        center: Vec3::new(rect.center.x, floor_height + height * 0.5, rect.center.y),
        angle: rect.angle,
        size: Vec3::new(rect.extent.x, height, rect.extent.y),
    };

    let (min2, max2) = points.iter().fold(
        (Vec2::splat(f32::INFINITY), Vec2::splat(f32::NEG_INFINITY)),
        |(lo, hi), &p| (lo.min(p), hi.max(p)),
    );
    let aabb = Aabb {
        min: Vec3::new(min2.x, floor_height, min2.y),
        max: Vec3::new(max2.x, floor_height + height, max2.y),
    };

    Ok(RoomGeometry {
        obb,
        aabb,
        hull,
        floor_height,
    })
}

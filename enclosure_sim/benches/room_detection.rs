// Room detection throughput.
//
// Lays out an N×N grid of separate square rooms (four walls each, with
// corner snap points so placement auto-connects them) and measures the full
// placement-to-commit pipeline, plus the position-cache rebuild and lookups
// over the resulting rooms.
//
// Run with: cargo bench -p enclosure_sim --bench room_detection

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use enclosure_sim::command::{RoomAction, RoomCommand};
use enclosure_sim::config::RoomConfig;
use enclosure_sim::instance::{BuildingInstance, Footprint};
use enclosure_sim::sim::EnclosureSim;
use enclosure_sim::snap::SnapPoint;
use enclosure_sim::types::{InstanceId, Pose, SnapType, StructuralKind};
use glam::Vec3;
use std::f32::consts::FRAC_PI_2;

const SIDE: f32 = 4.0;
const SPACING: f32 = 8.0;

fn wall(id: u64, x: f32, z: f32, yaw: f32) -> BuildingInstance {
    let hw = SIDE * 0.5;
    BuildingInstance::new(
        InstanceId(id),
        Pose::from_yaw(Vec3::new(x, 0.0, z), yaw),
        StructuralKind::Wall,
    )
    .with_footprint(Footprint::new(SIDE, 3.0, 0.2))
    .with_snap_points(vec![
        SnapPoint::new(SnapType::Wall, Vec3::new(-hw, 0.0, 0.0)).with_radius(0.5),
        SnapPoint::new(SnapType::Wall, Vec3::new(hw, 0.0, 0.0)).with_radius(0.5),
    ])
}

fn grid_commands(n: usize) -> Vec<RoomCommand> {
    let h = SIDE * 0.5;
    let mut next_id = 1;
    let mut commands = Vec::with_capacity(n * n * 4);
    for gx in 0..n {
        for gz in 0..n {
            let cx = gx as f32 * SPACING;
            let cz = gz as f32 * SPACING;
            for (x, z, yaw) in [
                (cx, cz - h, 0.0),
                (cx + h, cz, FRAC_PI_2),
                (cx, cz + h, 0.0),
                (cx - h, cz, FRAC_PI_2),
            ] {
                commands.push(RoomCommand::new(
                    1,
                    RoomAction::InstancePlaced {
                        instance: wall(next_id, x, z, yaw),
                    },
                ));
                next_id += 1;
            }
        }
    }
    commands
}

fn bench_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("room_detection");
    group.sample_size(20);
    for n in [2usize, 5, 10] {
        let commands = grid_commands(n);
        group.bench_with_input(BenchmarkId::new("place_grid", n * n), &commands, |b, cmds| {
            b.iter(|| {
                let mut sim = EnclosureSim::new(RoomConfig::default());
                let result = sim.step(black_box(cmds), 2);
                black_box(result.events.len())
            })
        });
    }
    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let n = 10;
    let mut sim = EnclosureSim::new(RoomConfig::default());
    sim.step(&grid_commands(n), 2);

    c.bench_function("cache_rebuild_100_rooms", |b| {
        b.iter(|| sim.registry.force_cache_rebuild(black_box(2)))
    });

    let points: Vec<Vec3> = (0..n * n)
        .map(|i| Vec3::new((i % n) as f32 * SPACING + 0.5, 1.0, (i / n) as f32 * SPACING))
        .collect();
    c.bench_function("indoor_lookup_cached", |b| {
        b.iter(|| {
            points
                .iter()
                .filter(|&&p| sim.is_position_indoor(black_box(p)))
                .count()
        })
    });
    c.bench_function("indoor_lookup_exact", |b| {
        b.iter(|| {
            points
                .iter()
                .filter(|&&p| sim.room_containing(black_box(p)).is_some())
                .count()
        })
    });
}

criterion_group!(benches, bench_detection, bench_queries);
criterion_main!(benches);

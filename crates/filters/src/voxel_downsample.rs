use hashbrown::HashMap;
use lidarmap_core::{CloudBuilder, PointCloud, PointRecord};

type VoxelKey = (i64, i64, i64);

fn voxel_key(p: &PointRecord, voxel_size: f64) -> VoxelKey {
    (
        (p.x / voxel_size).floor() as i64,
        (p.y / voxel_size).floor() as i64,
        (p.z / voxel_size).floor() as i64,
    )
}

fn coordinate_order(a: &PointRecord, b: &PointRecord) -> std::cmp::Ordering {
    a.x.total_cmp(&b.x)
        .then(a.y.total_cmp(&b.y))
        .then(a.z.total_cmp(&b.z))
        .then(
            a.intensity
                .unwrap_or(f32::NAN)
                .total_cmp(&b.intensity.unwrap_or(f32::NAN)),
        )
        .then(a.ring.cmp(&b.ring))
}

/// Collapses each occupied voxel to the centroid of its points.
///
/// The result depends only on the set of input points, not their order:
/// voxels are emitted in key order and each voxel's sums run over its points
/// sorted by coordinate. Intensity is averaged over the points that have one;
/// a ring survives only when every point in the voxel agrees on it.
pub fn voxel_downsample(cloud: &PointCloud, voxel_size: f64) -> PointCloud {
    assert!(
        voxel_size.is_finite() && voxel_size > 0.0,
        "voxel_size must be > 0 and finite"
    );

    let mut bins: HashMap<VoxelKey, Vec<PointRecord>> = HashMap::new();
    for p in cloud.iter_records().filter(PointRecord::is_finite) {
        bins.entry(voxel_key(&p, voxel_size)).or_default().push(p);
    }

    let mut keys: Vec<VoxelKey> = bins.keys().copied().collect();
    keys.sort_unstable();

    let mut builder = CloudBuilder::with_capacity(keys.len());
    for key in keys {
        let Some(points) = bins.get_mut(&key) else {
            continue;
        };
        points.sort_by(coordinate_order);

        let n = points.len() as f64;
        let (mut sx, mut sy, mut sz) = (0.0, 0.0, 0.0);
        let (mut si, mut ni) = (0.0f64, 0usize);
        for p in points.iter() {
            sx += p.x;
            sy += p.y;
            sz += p.z;
            if let Some(i) = p.intensity {
                si += i as f64;
                ni += 1;
            }
        }

        let mut centroid = PointRecord::new(sx / n, sy / n, sz / n);
        centroid.intensity = (ni > 0).then(|| (si / ni as f64) as f32);
        let ring = points[0].ring;
        centroid.ring = ring.filter(|_| points.iter().all(|p| p.ring == ring));
        builder.push(centroid);
    }

    builder.frame_count = cloud.frame_count();
    builder.finish()
}

use lidarmap_core::PointCloud;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

/// Keeps the points whose coordinate on `axis` lies in `[min, max]`.
pub fn passthrough_filter(cloud: &PointCloud, axis: Axis, min: f64, max: f64) -> PointCloud {
    let values = match axis {
        Axis::X => cloud.x(),
        Axis::Y => cloud.y(),
        Axis::Z => cloud.z(),
    };

    let keep: Vec<usize> = values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite() && **v >= min && **v <= max)
        .map(|(i, _)| i)
        .collect();

    cloud.select(&keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample_cloud() -> PointCloud {
        PointCloud::from_xyz(
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![10.0, 20.0, 30.0, 40.0, 50.0],
            vec![100.0, 200.0, 300.0, 400.0, 500.0],
        )
    }

    #[test]
    fn passthrough_x_axis() {
        let result = passthrough_filter(&sample_cloud(), Axis::X, 2.0, 4.0);
        assert_eq!(result.x(), &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn passthrough_z_axis() {
        let result = passthrough_filter(&sample_cloud(), Axis::Z, 200.0, 400.0);
        assert_eq!(result.z(), &[200.0, 300.0, 400.0]);
    }

    #[test]
    fn passthrough_empty_cloud() {
        let result = passthrough_filter(&PointCloud::new(), Axis::X, 0.0, 10.0);
        assert!(result.is_empty());
    }

    #[test]
    fn passthrough_no_points_in_range() {
        let result = passthrough_filter(&sample_cloud(), Axis::Y, 100.0, 200.0);
        assert!(result.is_empty());
    }

    proptest! {
        #[test]
        fn passthrough_result_within_bounds(
            pts in prop::collection::vec(
                (-100.0f64..100.0, -100.0f64..100.0, -100.0f64..100.0),
                1..500
            ),
            min_val in -50.0f64..0.0,
            max_val in 0.0f64..50.0,
        ) {
            let cloud = PointCloud::from_xyz(
                pts.iter().map(|p| p.0).collect(),
                pts.iter().map(|p| p.1).collect(),
                pts.iter().map(|p| p.2).collect(),
            );
            let result = passthrough_filter(&cloud, Axis::Z, min_val, max_val);
            for &z in result.z() {
                prop_assert!(z >= min_val && z <= max_val);
            }
        }
    }
}

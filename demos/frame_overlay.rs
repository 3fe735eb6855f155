use lidarmap::pipeline::{frame_series, PipelineConfig};
use lidarmap::raster::{CombineMode, ConcatAxis};
use lidarmap::{CellGrid, Frame, PointRecord, Pose};

fn main() {
    // Three frames seeing the same box from different positions
    let frames: Vec<Frame> = (0..3)
        .map(|i| {
            let points = (0..100)
                .map(|j| {
                    let x = (j % 10) as f64 * 0.2;
                    let y = (j / 10) as f64 * 0.2;
                    PointRecord::new(x, y, if (4..7).contains(&(j % 10)) { 1.0 } else { 0.0 })
                })
                .collect();
            Frame::new(i as f64, points).with_pose(Pose::from_translation([i as f64, 0.0, 0.0]))
        })
        .collect();

    let mut config = PipelineConfig::default();
    config.raster.cell_size = 0.5;

    for mode in [
        CombineMode::Overlay,
        CombineMode::Blend {
            weights: Some(vec![1.0, 2.0, 4.0]),
        },
        CombineMode::SideBySide {
            axis: ConcatAxis::Horizontal,
        },
    ] {
        config.combine = mode;
        let series = frame_series(&frames, &config).expect("frame series");
        let composite = &series.composite;
        println!(
            "{:?}: {}x{} composite, {} cells with data, layers at {:?}",
            config.combine,
            composite.width,
            composite.height,
            composite.valid_count(),
            composite.layers.iter().map(|l| l.offset).collect::<Vec<_>>()
        );
    }
}

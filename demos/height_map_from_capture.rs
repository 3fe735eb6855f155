use lidarmap::io::{encode_capture, FormatDescriptor, PointLayout, RawPoint, ScanRecord};
use lidarmap::pipeline::{render_all, run, PipelineConfig};
use lidarmap::raster::Aggregation;
use lidarmap::{CellGrid, Pose};

fn main() {
    // A synthetic drive: 20 scans of a sloped floor, the sensor moving along x
    let records: Vec<ScanRecord> = (0..20)
        .map(|i| {
            let points = (0..400)
                .map(|j| {
                    let x = (j % 20) as f64 * 0.25;
                    let y = (j / 20) as f64 * 0.25 - 2.5;
                    RawPoint {
                        intensity: Some((j % 7) as f64),
                        ..RawPoint::xyz(x, y, 0.1 * (x + i as f64 * 0.5))
                    }
                })
                .collect();
            ScanRecord {
                offset: 0,
                timestamp: Some(i as f64 * 0.1),
                pose: Some(Pose::from_translation([i as f64 * 0.5, 0.0, 0.0])),
                points,
            }
        })
        .collect();
    let bytes = encode_capture(&records, &FormatDescriptor::new(PointLayout::xyzi_f32()))
        .expect("synthetic records fit the layout");
    println!("Capture: {} bytes, {} scans", bytes.len(), records.len());

    let mut config = PipelineConfig::default();
    config.raster.cell_size = 0.5;
    config.raster.aggregation = Aggregation::Max;
    config.accumulate.voxel_size = Some(0.1);

    let out = run(&bytes, &config).expect("pipeline run");
    println!("Frames: {}", out.capture.frames.len());
    println!(
        "Cloud: {} points ({} before downsampling)",
        out.map.cloud.len(),
        out.map.accumulation.points_before_downsample.unwrap_or(0)
    );

    let grid = &out.map.raster.grid;
    println!(
        "Height map: {}x{} cells, {} with data, range {:?}",
        grid.width(),
        grid.height(),
        grid.valid_count(),
        grid.value_range()
    );

    let dir = std::env::temp_dir().join("lidarmap_demo");
    std::fs::create_dir_all(&dir).expect("create output dir");
    for image in render_all(grid, &config.render).expect("render") {
        let path = dir.join(format!("height_map_{}.png", image.scale.colormap.name()));
        image.save(&path).expect("write image");
        println!("Wrote {}", path.display());
    }
}

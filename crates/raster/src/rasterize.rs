use hashbrown::HashMap;
use lidarmap_core::{Aabb, PointCloud, RasterGrid, ValidationError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Points per parallel work unit. Partial grids are merged in chunk order,
/// so the result never depends on thread scheduling.
const CHUNK: usize = 16 * 1024;

/// Default cap on `width * height`; 2^26 cells is 1 GiB of optional values.
pub const DEFAULT_MAX_CELLS: u64 = 1 << 26;

/// How the values of several points in one cell combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Max,
    Min,
    Mean,
    Count,
}

/// Which point channel is rasterized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterValue {
    #[default]
    Height,
    Intensity,
}

/// Explicit XY extent of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: [f64; 2],
    pub max: [f64; 2],
}

impl Bounds {
    pub fn new(min: [f64; 2], max: [f64; 2]) -> Result<Self, ValidationError> {
        for axis in 0..2 {
            let name = ["bounds.x", "bounds.y"][axis];
            for value in [min[axis], max[axis]] {
                if !value.is_finite() {
                    return Err(ValidationError::NonFinite { field: name, value });
                }
            }
            if max[axis] < min[axis] {
                return Err(ValidationError::OutOfRange {
                    field: name,
                    value: max[axis],
                    min: min[axis],
                    max: f64::INFINITY,
                });
            }
        }
        Ok(Self { min, max })
    }

    /// XY extent of the finite points of a cloud; `None` when there are none.
    pub fn of_cloud(cloud: &PointCloud) -> Option<Self> {
        cloud.aabb().as_ref().map(Self::from_aabb)
    }

    pub fn from_aabb(aabb: &Aabb) -> Self {
        Self {
            min: [aabb.min[0], aabb.min[1]],
            max: [aabb.max[0], aabb.max[1]],
        }
    }

    /// Smallest bound covering both.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min: [self.min[0].min(other.min[0]), self.min[1].min(other.min[1])],
            max: [self.max[0].max(other.max[0]), self.max[1].max(other.max[1])],
        }
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min[0] && x <= self.max[0] && y >= self.min[1] && y <= self.max[1]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterParams {
    pub cell_size: f64,
    pub aggregation: Aggregation,
    pub value: RasterValue,
    /// Overrides the cloud's own XY extent.
    pub bounds: Option<Bounds>,
    /// Largest grid, in cells, that `rasterize` will allocate.
    pub max_cells: u64,
}

impl Default for RasterParams {
    fn default() -> Self {
        Self {
            cell_size: 0.1,
            aggregation: Aggregation::Max,
            value: RasterValue::Height,
            bounds: None,
            max_cells: DEFAULT_MAX_CELLS,
        }
    }
}

impl RasterParams {
    pub fn new(cell_size: f64, aggregation: Aggregation) -> Self {
        Self {
            cell_size,
            aggregation,
            ..Self::default()
        }
    }

    pub fn with_value(mut self, value: RasterValue) -> Self {
        self.value = value;
        self
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_max_cells(mut self, max_cells: u64) -> Self {
        self.max_cells = max_cells;
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.cell_size.is_finite() || self.cell_size <= 0.0 {
            return Err(ValidationError::NonPositiveCellSize(self.cell_size));
        }
        if let Some(b) = &self.bounds {
            Bounds::new(b.min, b.max)?;
        }
        if self.max_cells == 0 {
            return Err(ValidationError::OutOfRange {
                field: "max_cells",
                value: 0.0,
                min: 1.0,
                max: f64::INFINITY,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RasterReport {
    pub points: usize,
    pub binned: usize,
    /// Points outside explicit bounds.
    pub out_of_bounds: usize,
    /// Points lacking the rasterized channel (intensity).
    pub missing_value: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rasterized {
    pub grid: RasterGrid,
    pub report: RasterReport,
}

/// Cells along one axis: enough for `floor(extent / cell_size)` to be a
/// valid index, so a point on the max bound gets its own cell. `None` when
/// the count does not fit a `u32`.
fn cells_for(extent: f64, cell_size: f64) -> Option<u64> {
    let n = (extent / cell_size).floor() + 1.0;
    if !n.is_finite() || n > u32::MAX as f64 {
        return None;
    }
    Some(n.max(1.0) as u64)
}

/// Checked grid dimensions for `bounds`.
fn grid_shape(bounds: &Bounds, params: &RasterParams) -> Result<(u32, u32), ValidationError> {
    let extent = [bounds.max[0] - bounds.min[0], bounds.max[1] - bounds.min[1]];
    let too_large = |width: u64, height: u64| ValidationError::GridTooLarge {
        width,
        height,
        limit: params.max_cells,
    };
    let (width, height) = match (
        cells_for(extent[0], params.cell_size),
        cells_for(extent[1], params.cell_size),
    ) {
        (Some(w), Some(h)) => (w, h),
        (w, h) => return Err(too_large(w.unwrap_or(u64::MAX), h.unwrap_or(u64::MAX))),
    };
    match width.checked_mul(height) {
        Some(n) if n <= params.max_cells && usize::try_from(n).is_ok() => Ok((width as u32, height as u32)),
        _ => Err(too_large(width, height)),
    }
}

#[derive(Debug, Clone, Copy)]
struct CellAcc {
    min: f64,
    max: f64,
    sum: f64,
    count: u64,
}

impl CellAcc {
    fn new(v: f64) -> Self {
        Self {
            min: v,
            max: v,
            sum: v,
            count: 1,
        }
    }

    fn add(&mut self, v: f64) {
        self.min = self.min.min(v);
        self.max = self.max.max(v);
        self.sum += v;
        self.count += 1;
    }

    fn merge(&mut self, other: &CellAcc) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
        self.sum += other.sum;
        self.count += other.count;
    }

    fn value(&self, aggregation: Aggregation) -> f64 {
        match aggregation {
            Aggregation::Max => self.max,
            Aggregation::Min => self.min,
            Aggregation::Mean => self.sum / self.count as f64,
            Aggregation::Count => self.count as f64,
        }
    }
}

#[derive(Default)]
struct Partial {
    cells: HashMap<usize, CellAcc>,
    binned: usize,
    out_of_bounds: usize,
    missing_value: usize,
}

struct Geometry {
    origin: [f64; 2],
    cell_size: f64,
    width: u32,
    height: u32,
    /// Explicit bounds clip; computed bounds cover every point.
    clip: Option<Bounds>,
}

impl Geometry {
    fn cell_index(&self, x: f64, y: f64) -> Option<usize> {
        if let Some(b) = &self.clip {
            if !b.contains(x, y) {
                return None;
            }
        }
        let col = ((x - self.origin[0]) / self.cell_size).floor();
        let row = ((y - self.origin[1]) / self.cell_size).floor();
        if col < 0.0 || row < 0.0 || col >= self.width as f64 || row >= self.height as f64 {
            return None;
        }
        Some(row as usize * self.width as usize + col as usize)
    }
}

fn rasterize_chunk(cloud: &PointCloud, range: std::ops::Range<usize>, value: RasterValue, geo: &Geometry) -> Partial {
    let mut partial = Partial::default();
    let (xs, ys, zs, is) = (cloud.x(), cloud.y(), cloud.z(), cloud.intensity());
    for i in range {
        let (x, y) = (xs[i], ys[i]);
        if !x.is_finite() || !y.is_finite() {
            continue;
        }
        let v = match value {
            RasterValue::Height => zs[i],
            RasterValue::Intensity => is[i] as f64,
        };
        if !v.is_finite() {
            partial.missing_value += 1;
            continue;
        }
        let Some(cell) = geo.cell_index(x, y) else {
            partial.out_of_bounds += 1;
            continue;
        };
        partial
            .cells
            .entry(cell)
            .and_modify(|acc| acc.add(v))
            .or_insert_with(|| CellAcc::new(v));
        partial.binned += 1;
    }
    partial
}

/// Projects a cloud onto an XY grid.
///
/// The grid origin is the bound's min corner and each dimension is
/// `floor(extent / cell_size) + 1` cells, so every point falls in cell
/// `floor((p - origin) / cell_size)` with no clamping. Grids larger than
/// `params.max_cells` are rejected before allocation. Cells without
/// points are no-data. Max, min and count are independent of point order;
/// mean divides a per-cell sum once at the end.
#[instrument(skip_all, fields(points = cloud.len(), cell_size = params.cell_size, aggregation = ?params.aggregation))]
pub fn rasterize(cloud: &PointCloud, params: &RasterParams) -> Result<Rasterized, ValidationError> {
    params.validate()?;

    let bounds = params.bounds.or_else(|| Bounds::of_cloud(cloud));
    let (origin, width, height) = match &bounds {
        Some(b) => {
            let (width, height) = grid_shape(b, params)?;
            (b.min, width, height)
        }
        None => ([0.0, 0.0], 1, 1),
    };
    let geo = Geometry {
        origin,
        cell_size: params.cell_size,
        width,
        height,
        clip: params.bounds,
    };

    let chunks: Vec<std::ops::Range<usize>> = (0..cloud.len())
        .step_by(CHUNK)
        .map(|start| start..(start + CHUNK).min(cloud.len()))
        .collect();
    let partials: Vec<Partial> = chunks
        .into_par_iter()
        .map(|range| rasterize_chunk(cloud, range, params.value, &geo))
        .collect();

    let mut merged: HashMap<usize, CellAcc> = HashMap::new();
    let mut report = RasterReport {
        points: cloud.len(),
        ..RasterReport::default()
    };
    for partial in partials {
        report.binned += partial.binned;
        report.out_of_bounds += partial.out_of_bounds;
        report.missing_value += partial.missing_value;
        for (cell, acc) in partial.cells {
            merged
                .entry(cell)
                .and_modify(|m| m.merge(&acc))
                .or_insert(acc);
        }
    }

    let mut cells = vec![None; width as usize * height as usize];
    for (cell, acc) in merged {
        let v = acc.value(params.aggregation);
        cells[cell] = v.is_finite().then_some(v);
    }
    let grid = RasterGrid::from_cells(origin, params.cell_size, width, height, cells)?;

    if report.out_of_bounds > 0 {
        warn!(skipped = report.out_of_bounds, "points outside raster bounds");
    }
    debug!(width, height, binned = report.binned, "rasterized cloud");
    Ok(Rasterized { grid, report })
}

/// Rasterizes several clouds onto one shared grid geometry.
///
/// Without explicit bounds the geometry covers the union of every cloud's
/// XY extent, so the resulting grids can be overlaid or blended directly.
#[instrument(skip_all, fields(clouds = clouds.len(), cell_size = params.cell_size))]
pub fn rasterize_series(clouds: &[PointCloud], params: &RasterParams) -> Result<Vec<Rasterized>, ValidationError> {
    let shared = params.bounds.or_else(|| {
        clouds
            .iter()
            .filter_map(Bounds::of_cloud)
            .reduce(|a, b| a.union(&b))
    });
    let params = match shared {
        Some(bounds) => params.with_bounds(bounds),
        None => *params,
    };
    clouds.iter().map(|cloud| rasterize(cloud, &params)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use lidarmap_core::{CellGrid, PointRecord};
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn cloud(pts: &[[f64; 3]]) -> PointCloud {
        PointCloud::from_xyz(
            pts.iter().map(|p| p[0]).collect(),
            pts.iter().map(|p| p[1]).collect(),
            pts.iter().map(|p| p[2]).collect(),
        )
    }

    #[test]
    fn empty_cloud_is_one_no_data_cell() {
        let out = rasterize(&PointCloud::new(), &RasterParams::new(1.0, Aggregation::Max)).unwrap();
        assert_eq!((out.grid.width(), out.grid.height()), (1, 1));
        assert_eq!(out.grid.valid_count(), 0);
    }

    #[test]
    fn single_point_count_is_one() {
        let out = rasterize(&cloud(&[[3.2, -1.5, 0.0]]), &RasterParams::new(0.5, Aggregation::Count)).unwrap();
        assert_eq!(out.grid.valid_count(), 1);
        assert_eq!(out.grid.cells().iter().flatten().copied().collect::<Vec<_>>(), vec![1.0]);
    }

    #[test]
    fn single_point_count_in_explicit_bounds() {
        let params = RasterParams::new(1.0, Aggregation::Count)
            .with_bounds(Bounds::new([0.0, 0.0], [4.0, 4.0]).unwrap());
        let out = rasterize(&cloud(&[[2.5, 1.5, 9.0]]), &params).unwrap();
        assert_eq!((out.grid.width(), out.grid.height()), (5, 5));
        assert_eq!(out.grid.cell(2, 1), Some(1.0));
        assert_eq!(out.grid.valid_count(), 1);
    }

    #[test]
    fn collinear_points_give_one_row() {
        let out = rasterize(
            &cloud(&[[0.0, 5.0, 1.0], [3.0, 5.0, 2.0]]),
            &RasterParams::new(1.0, Aggregation::Max),
        )
        .unwrap();
        assert_eq!((out.grid.width(), out.grid.height()), (4, 1));
        // x = 3.0 sits on the max edge and gets its own column.
        assert_eq!(out.grid.cell(3, 0), Some(2.0));
        assert_eq!(out.grid.cell(0, 0), Some(1.0));
        assert_eq!(out.grid.cell(2, 0), None);
    }

    #[test]
    fn integer_points_fill_one_cell_per_bucket() {
        let pts: Vec<[f64; 3]> = (0..3)
            .flat_map(|k| {
                let k = k as f64;
                [[k, 0.0, 1.0], [k, 1.0, 1.0], [k + 1.0, 0.0, 1.0], [k + 1.0, 1.0, 1.0]]
            })
            .collect();
        let buckets: std::collections::HashSet<(i64, i64)> =
            pts.iter().map(|p| (p[0].floor() as i64, p[1].floor() as i64)).collect();
        let out = rasterize(&cloud(&pts), &RasterParams::new(1.0, Aggregation::Count)).unwrap();
        assert_eq!((out.grid.width(), out.grid.height()), (4, 2));
        assert_eq!(out.grid.valid_count(), buckets.len());
        assert_eq!(out.grid.valid_count(), 8);
        assert_eq!(out.grid.cell(3, 1), Some(1.0));
        assert_eq!(out.grid.cell(1, 0), Some(2.0));
    }

    #[test]
    fn oversized_grid_is_rejected_before_allocating() {
        let wide = cloud(&[[0.0, 0.0, 0.0], [1e6, 1e6, 0.0]]);
        assert!(matches!(
            rasterize(&wide, &RasterParams::new(0.01, Aggregation::Max)),
            Err(ValidationError::GridTooLarge { .. })
        ));

        let strip = cloud(&[[0.0, 0.0, 0.0], [99.0, 0.0, 0.0]]);
        let params = RasterParams::new(1.0, Aggregation::Max).with_max_cells(99);
        assert!(matches!(
            rasterize(&strip, &params),
            Err(ValidationError::GridTooLarge { width: 100, height: 1, limit: 99 })
        ));
        assert_eq!(rasterize(&strip, &params.with_max_cells(100)).unwrap().grid.width(), 100);
    }

    #[test]
    fn axis_beyond_u32_is_rejected() {
        let far = cloud(&[[0.0, 0.0, 0.0], [1e12, 0.0, 0.0]]);
        let params = RasterParams::new(1e-3, Aggregation::Max).with_max_cells(u64::MAX);
        assert!(matches!(rasterize(&far, &params), Err(ValidationError::GridTooLarge { .. })));
    }

    #[test]
    fn aggregations() {
        let pts = [[0.1, 0.1, 1.0], [0.2, 0.2, 4.0], [0.3, 0.3, -2.0], [1.5, 0.5, 0.0]];
        let c = cloud(&pts);
        let get = |agg| {
            rasterize(&c, &RasterParams::new(1.0, agg))
                .unwrap()
                .grid
                .cell(0, 0)
        };
        assert_eq!(get(Aggregation::Max), Some(4.0));
        assert_eq!(get(Aggregation::Min), Some(-2.0));
        assert_eq!(get(Aggregation::Count), Some(3.0));
        assert_relative_eq!(get(Aggregation::Mean).unwrap(), 1.0);
    }

    #[test]
    fn zero_height_is_data_not_no_data() {
        let out = rasterize(
            &cloud(&[[0.0, 0.0, 0.0], [2.0, 0.0, 0.0]]),
            &RasterParams::new(1.0, Aggregation::Max),
        )
        .unwrap();
        assert_eq!(out.grid.cell(0, 0), Some(0.0));
        assert_eq!(out.grid.cell(1, 0), None);
    }

    #[test]
    fn explicit_bounds_skip_and_count_outside_points() {
        let params = RasterParams::new(1.0, Aggregation::Max)
            .with_bounds(Bounds::new([0.0, 0.0], [2.0, 2.0]).unwrap());
        let out = rasterize(&cloud(&[[1.0, 1.0, 1.0], [5.0, 1.0, 1.0], [-0.1, 0.0, 0.0]]), &params).unwrap();
        assert_eq!(out.report.out_of_bounds, 2);
        assert_eq!(out.report.binned, 1);
    }

    #[test]
    fn intensity_raster_skips_points_without_intensity() {
        let c = PointCloud::from_records(
            &[
                PointRecord::new(0.0, 0.0, 0.0).with_intensity(7.0),
                PointRecord::new(0.5, 0.5, 0.0),
            ],
            1,
        );
        let params = RasterParams::new(1.0, Aggregation::Max).with_value(RasterValue::Intensity);
        let out = rasterize(&c, &params).unwrap();
        assert_eq!(out.grid.cell(0, 0), Some(7.0));
        assert_eq!(out.report.missing_value, 1);
    }

    #[test]
    fn bad_cell_size_is_rejected() {
        for size in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(rasterize(&PointCloud::new(), &RasterParams::new(size, Aggregation::Max)).is_err());
        }
    }

    #[test]
    fn chunked_mean_matches_single_pass() {
        let mut rng = StdRng::seed_from_u64(3);
        let pts: Vec<[f64; 3]> = (0..3 * CHUNK + 17)
            .map(|_| [rng.gen_range(0.0..4.0), rng.gen_range(0.0..4.0), rng.gen_range(-1.0..1.0)])
            .collect();
        let out = rasterize(&cloud(&pts), &RasterParams::new(1.0, Aggregation::Mean)).unwrap();
        let (sum, n) = pts
            .iter()
            .filter(|p| p[0] < 1.0 && p[1] < 1.0)
            .fold((0.0, 0usize), |(s, n), p| (s + p[2], n + 1));
        assert_relative_eq!(out.grid.cell(0, 0).unwrap(), sum / n as f64, epsilon = 1e-9);
    }

    #[test]
    fn series_shares_geometry() {
        let a = cloud(&[[0.0, 0.0, 1.0], [1.0, 1.0, 1.0]]);
        let b = cloud(&[[3.0, 2.0, 5.0]]);
        let out = rasterize_series(&[a, PointCloud::new(), b], &RasterParams::new(1.0, Aggregation::Max)).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out[0].grid.same_geometry(&out[1].grid));
        assert!(out[0].grid.same_geometry(&out[2].grid));
        assert_eq!((out[2].grid.width(), out[2].grid.height()), (4, 3));
        assert_eq!(out[2].grid.cell(3, 2), Some(5.0));
        assert_eq!(out[1].grid.valid_count(), 0);
    }

    proptest! {
        #[test]
        fn max_raster_is_idempotent_and_order_free(
            pts in prop::collection::vec((-20.0f64..20.0, -20.0f64..20.0, -5.0f64..5.0), 0..400),
            cell in 0.25f64..3.0,
        ) {
            let pts: Vec<[f64; 3]> = pts.iter().map(|p| [p.0, p.1, p.2]).collect();
            let params = RasterParams::new(cell, Aggregation::Max);
            let a = rasterize(&cloud(&pts), &params).unwrap();
            let b = rasterize(&cloud(&pts), &params).unwrap();
            prop_assert_eq!(&a, &b);

            let mut reversed = pts.clone();
            reversed.reverse();
            let c = rasterize(&cloud(&reversed), &params).unwrap();
            prop_assert_eq!(&a.grid, &c.grid);
            prop_assert_eq!(a.report.binned, pts.len());
        }
    }
}

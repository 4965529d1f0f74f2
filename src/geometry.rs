use crate::error::{Result, ScanError};
use log::trace;

/// Fraction of the larger raw dimension added on every side of the box.
pub const BBOX_PADDING_RATIO: f64 = 0.2;

/// Points closer than this (in degrees) to an edge count as inside.
const ON_EDGE_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// Building footprint ring. The closing vertex may or may not be repeated.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Polygon {
    vertices: Vec<LonLat>,
}

impl Polygon {
    pub fn new(vertices: Vec<LonLat>) -> Self {
        Self { vertices }
    }

    pub fn from_pairs(pairs: &[[f64; 2]]) -> Self {
        Self::new(pairs.iter().map(|p| LonLat::new(p[0], p[1])).collect())
    }

    pub fn vertices(&self) -> &[LonLat] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Vertices without the explicit closing duplicate, if present.
    fn open_ring(&self) -> &[LonLat] {
        match (self.vertices.first(), self.vertices.last()) {
            (Some(first), Some(last)) if self.vertices.len() > 1 && first == last => {
                &self.vertices[..self.vertices.len() - 1]
            }
            _ => &self.vertices,
        }
    }

    /// Arithmetic mean of the vertices.
    ///
    /// This is an approximate building centre: it is not guarded against
    /// collinear rings and can fall outside a non-convex footprint.
    pub fn centroid(&self) -> Option<LonLat> {
        let ring = self.open_ring();
        if ring.is_empty() {
            return None;
        }
        let n = ring.len() as f64;
        let (lon_sum, lat_sum) = ring
            .iter()
            .fold((0.0, 0.0), |(lon, lat), v| (lon + v.lon, lat + v.lat));
        Some(LonLat::new(lon_sum / n, lat_sum / n))
    }

    pub fn contains(&self, point: LonLat) -> bool {
        point_in_polygon(point, &self.vertices)
    }
}

/// Padded, square imagery frame in EPSG:4326 degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Frame a polygon for an imagery request.
    ///
    /// The raw extent is padded on all sides by 20% of its larger dimension,
    /// then the shorter axis is widened symmetrically until the box is
    /// square. The box is never cropped.
    pub fn around(polygon: &Polygon) -> Result<Self> {
        let vertices = polygon.vertices();
        if vertices.len() < 3 {
            return Err(ScanError::Geometry(format!(
                "polygon has {} vertices (need at least 3)",
                vertices.len()
            )));
        }

        let raw = vertices.iter().fold(
            BoundingBox {
                min_lon: f64::INFINITY,
                min_lat: f64::INFINITY,
                max_lon: f64::NEG_INFINITY,
                max_lat: f64::NEG_INFINITY,
            },
            |b, v| BoundingBox {
                min_lon: b.min_lon.min(v.lon),
                min_lat: b.min_lat.min(v.lat),
                max_lon: b.max_lon.max(v.lon),
                max_lat: b.max_lat.max(v.lat),
            },
        );

        if !raw.width().is_finite() || !raw.height().is_finite() {
            return Err(ScanError::Geometry("polygon has non-finite coordinates".into()));
        }
        if raw.width() <= 0.0 && raw.height() <= 0.0 {
            return Err(ScanError::Geometry("polygon has zero extent".into()));
        }

        let padded = raw.padded(BBOX_PADDING_RATIO * raw.width().max(raw.height()));
        let squared = padded.squared();
        trace!("bbox raw={:?} squared={:?}", raw, squared);
        Ok(squared)
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    fn padded(&self, pad: f64) -> Self {
        Self {
            min_lon: self.min_lon - pad,
            min_lat: self.min_lat - pad,
            max_lon: self.max_lon + pad,
            max_lat: self.max_lat + pad,
        }
    }

    fn squared(&self) -> Self {
        let (width, height) = (self.width(), self.height());
        let half_diff = (width - height).abs() / 2.0;
        if width > height {
            Self {
                min_lat: self.min_lat - half_diff,
                max_lat: self.max_lat + half_diff,
                ..*self
            }
        } else {
            Self {
                min_lon: self.min_lon - half_diff,
                max_lon: self.max_lon + half_diff,
                ..*self
            }
        }
    }

    pub fn contains_point(&self, point: LonLat) -> bool {
        point.lon >= self.min_lon
            && point.lon <= self.max_lon
            && point.lat >= self.min_lat
            && point.lat <= self.max_lat
    }

    /// WMS 1.1.1 `BBOX` value: `minLon,minLat,maxLon,maxLat`.
    pub fn to_wms_param(&self) -> String {
        format!(
            "{},{},{},{}",
            self.min_lon, self.min_lat, self.max_lon, self.max_lat
        )
    }
}

fn on_segment(p: LonLat, a: LonLat, b: LonLat) -> bool {
    let (dx, dy) = (b.lon - a.lon, b.lat - a.lat);
    let length = dx.hypot(dy);
    if length == 0.0 {
        return (p.lon - a.lon).hypot(p.lat - a.lat) <= ON_EDGE_TOLERANCE;
    }
    let cross = dx * (p.lat - a.lat) - dy * (p.lon - a.lon);
    if cross.abs() / length > ON_EDGE_TOLERANCE {
        return false;
    }
    p.lon >= a.lon.min(b.lon) - ON_EDGE_TOLERANCE
        && p.lon <= a.lon.max(b.lon) + ON_EDGE_TOLERANCE
        && p.lat >= a.lat.min(b.lat) - ON_EDGE_TOLERANCE
        && p.lat <= a.lat.max(b.lat) + ON_EDGE_TOLERANCE
}

/// Even-odd ray casting towards +longitude. The ring is treated as closed.
///
/// Points on an edge or vertex (within 1e-12 degrees) are inside.
pub fn point_in_polygon(point: LonLat, ring: &[LonLat]) -> bool {
    if ring.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[j]);
        if on_segment(point, a, b) {
            return true;
        }
        if (a.lat > point.lat) != (b.lat > point.lat) {
            let x_intercept = (b.lon - a.lon) * (point.lat - a.lat) / (b.lat - a.lat) + a.lon;
            if point.lon < x_intercept {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_building() -> Polygon {
        Polygon::from_pairs(&[
            [20.4714069, 52.1233726],
            [20.4714099, 52.1233425],
            [20.4712722, 52.1233373],
            [20.4712824, 52.1232352],
        ])
    }

    fn square(cx: f64, cy: f64, half: f64) -> Vec<LonLat> {
        vec![
            LonLat::new(cx - half, cy - half),
            LonLat::new(cx + half, cy - half),
            LonLat::new(cx + half, cy + half),
            LonLat::new(cx - half, cy + half),
        ]
    }

    fn rotate(p: LonLat, angle: f64) -> LonLat {
        let (s, c) = angle.sin_cos();
        LonLat::new(p.lon * c - p.lat * s, p.lon * s + p.lat * c)
    }

    #[test]
    fn test_bbox_is_square() {
        let shapes = vec![
            sample_building(),
            Polygon::from_pairs(&[[0.0, 0.0], [10.0, 0.0], [10.0, 1.0]]),
            Polygon::from_pairs(&[[5.0, 5.0], [5.5, 5.0], [5.5, 9.0], [5.0, 9.0]]),
            Polygon::from_pairs(&[[-0.1, 0.0], [0.1, 0.0], [0.0, 0.0]]),
        ];
        for polygon in shapes {
            let bbox = BoundingBox::around(&polygon).unwrap();
            assert!((bbox.width() - bbox.height()).abs() < 1e-9, "{:?}", bbox);
        }
    }

    #[test]
    fn test_bbox_padding_and_containment() {
        let polygon = Polygon::from_pairs(&[[0.0, 0.0], [10.0, 0.0], [10.0, 4.0], [0.0, 4.0]]);
        let bbox = BoundingBox::around(&polygon).unwrap();
        // 10 wide → pad 2 each side on both axes, then latitude widened to 14.
        assert!((bbox.min_lon + 2.0).abs() < 1e-12);
        assert!((bbox.max_lon - 12.0).abs() < 1e-12);
        assert!((bbox.width() - 14.0).abs() < 1e-12);
        assert!((bbox.min_lat + 5.0).abs() < 1e-12);
        assert!((bbox.max_lat - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_bbox_strictly_contains_sample() {
        let polygon = sample_building();
        let bbox = BoundingBox::around(&polygon).unwrap();
        for v in polygon.vertices() {
            assert!(v.lon > bbox.min_lon && v.lon < bbox.max_lon);
            assert!(v.lat > bbox.min_lat && v.lat < bbox.max_lat);
        }
    }

    #[test]
    fn test_bbox_rejects_short_ring() {
        let polygon = Polygon::from_pairs(&[[0.0, 0.0], [1.0, 1.0]]);
        assert!(matches!(
            BoundingBox::around(&polygon),
            Err(ScanError::Geometry(_))
        ));
    }

    #[test]
    fn test_bbox_rejects_zero_extent() {
        let polygon = Polygon::from_pairs(&[[1.0, 1.0], [1.0, 1.0], [1.0, 1.0]]);
        assert!(BoundingBox::around(&polygon).is_err());
    }

    #[test]
    fn test_wms_param_order() {
        let bbox = BoundingBox {
            min_lon: 1.5,
            min_lat: 2.5,
            max_lon: 3.5,
            max_lat: 4.5,
        };
        assert_eq!(bbox.to_wms_param(), "1.5,2.5,3.5,4.5");
    }

    #[test]
    fn test_centroid_mean_of_vertices() {
        let polygon = Polygon::from_pairs(&[[0.0, 0.0], [4.0, 0.0], [4.0, 2.0], [0.0, 2.0]]);
        let c = polygon.centroid().unwrap();
        assert!((c.lon - 2.0).abs() < 1e-12);
        assert!((c.lat - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_centroid_ignores_closing_vertex() {
        let open = Polygon::from_pairs(&[[0.0, 0.0], [3.0, 0.0], [0.0, 3.0]]);
        let closed = Polygon::from_pairs(&[[0.0, 0.0], [3.0, 0.0], [0.0, 3.0], [0.0, 0.0]]);
        assert_eq!(open.centroid(), closed.centroid());
        assert!(Polygon::default().centroid().is_none());
    }

    #[test]
    fn test_point_in_convex_polygon() {
        let ring = square(0.0, 0.0, 1.0);
        assert!(point_in_polygon(LonLat::new(0.0, 0.0), &ring));
        assert!(point_in_polygon(LonLat::new(0.9, -0.9), &ring));
        assert!(!point_in_polygon(LonLat::new(1.1, 0.0), &ring));
        assert!(!point_in_polygon(LonLat::new(0.0, -1.5), &ring));
    }

    #[test]
    fn test_point_in_polygon_translation_rotation_invariant() {
        let ring = square(0.0, 0.0, 1.0);
        let inside = [LonLat::new(0.2, 0.3), LonLat::new(-0.8, 0.7)];
        let outside = [LonLat::new(1.2, 0.0), LonLat::new(-0.5, 1.4)];

        for &(dx, dy, angle) in &[(0.0, 0.0, 0.7), (20.47, 52.12, 0.0), (-3.0, 8.0, 2.1)] {
            let transform = |p: LonLat| {
                let r = rotate(p, angle);
                LonLat::new(r.lon + dx, r.lat + dy)
            };
            let moved: Vec<LonLat> = ring.iter().map(|&v| transform(v)).collect();
            for &p in &inside {
                assert!(point_in_polygon(transform(p), &moved));
            }
            for &p in &outside {
                assert!(!point_in_polygon(transform(p), &moved));
            }
        }
    }

    #[test]
    fn test_point_on_edge_counts_as_inside() {
        let ring = square(0.0, 0.0, 1.0);
        assert!(point_in_polygon(LonLat::new(1.0, 0.0), &ring));
        assert!(point_in_polygon(LonLat::new(-1.0, -1.0), &ring));
        assert!(point_in_polygon(LonLat::new(0.3, 1.0), &ring));
    }

    #[test]
    fn test_point_in_concave_polygon() {
        // U shape opening north
        let ring = vec![
            LonLat::new(0.0, 0.0),
            LonLat::new(3.0, 0.0),
            LonLat::new(3.0, 3.0),
            LonLat::new(2.0, 3.0),
            LonLat::new(2.0, 1.0),
            LonLat::new(1.0, 1.0),
            LonLat::new(1.0, 3.0),
            LonLat::new(0.0, 3.0),
        ];
        assert!(point_in_polygon(LonLat::new(0.5, 2.0), &ring));
        assert!(point_in_polygon(LonLat::new(2.5, 2.0), &ring));
        assert!(!point_in_polygon(LonLat::new(1.5, 2.0), &ring));
    }

    #[test]
    fn test_sample_centroid_inside() {
        let polygon = sample_building();
        assert!(polygon.contains(polygon.centroid().unwrap()));
    }
}

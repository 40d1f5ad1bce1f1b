use geo::{BooleanOps, BoundingRect, Intersects, MultiPolygon, Rect};
use rstar::{RTree, RTreeObject, AABB};
use tracing::debug;

// Share of the extent added on every side before clipping, so clipped edges
// fall outside the visible window.
const CLIP_MARGIN: f64 = 0.05;

struct FeatureIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for FeatureIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Spatial index over background geometry (neighbouring countries and
/// regions, lakes) used to keep only what a view can show.
pub struct BackgroundIndex {
    features: Vec<MultiPolygon<f64>>,
    tree: RTree<FeatureIndex>,
}

impl BackgroundIndex {
    /// Features without a bounding box (empty geometry) are dropped.
    pub fn new(geometries: Vec<MultiPolygon<f64>>) -> Self {
        let features: Vec<MultiPolygon<f64>> = geometries
            .into_iter()
            .filter(|g| g.bounding_rect().is_some())
            .collect();
        let entries = features
            .iter()
            .enumerate()
            .filter_map(|(index, geometry)| {
                let bbox = geometry.bounding_rect()?;
                Some(FeatureIndex {
                    index,
                    aabb: AABB::from_corners(
                        [bbox.min().x, bbox.min().y],
                        [bbox.max().x, bbox.max().y],
                    ),
                })
            })
            .collect();
        Self {
            features,
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Features overlapping `extent`, clipped to it (plus a small margin).
    /// Results keep their input order.
    pub fn visible(&self, extent: Rect<f64>) -> Vec<MultiPolygon<f64>> {
        let window = expand(extent, CLIP_MARGIN);
        let envelope = AABB::from_corners(
            [window.min().x, window.min().y],
            [window.max().x, window.max().y],
        );
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|entry| entry.index)
            .collect();
        hits.sort_unstable();

        let clip = MultiPolygon::new(vec![window.to_polygon()]);
        let visible: Vec<MultiPolygon<f64>> = hits
            .into_iter()
            .map(|i| &self.features[i])
            .filter(|geometry| geometry.intersects(&clip))
            .map(|geometry| geometry.intersection(&clip))
            .filter(|clipped| !clipped.0.is_empty())
            .collect();

        debug!(
            total = self.features.len(),
            visible = visible.len(),
            "Selected background features for view"
        );
        visible
    }
}

fn expand(rect: Rect<f64>, margin: f64) -> Rect<f64> {
    let (dx, dy) = (rect.width() * margin, rect.height() * margin);
    Rect::new(
        geo::coord! { x: rect.min().x - dx, y: rect.min().y - dy },
        geo::coord! { x: rect.max().x + dx, y: rect.max().y + dy },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{coord, polygon, Area};

    fn square(x: f64, y: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
        ]])
    }

    #[test]
    fn keeps_only_features_in_view() {
        let index = BackgroundIndex::new(vec![
            square(0.0, 0.0, 1.0),
            square(100.0, 100.0, 1.0),
            square(5.0, 5.0, 1.0),
            MultiPolygon::new(vec![]),
        ]);
        assert_eq!(index.len(), 3);

        let extent = Rect::new(coord! { x: -1.0, y: -1.0 }, coord! { x: 10.0, y: 10.0 });
        let visible = index.visible(extent);
        assert_eq!(visible.len(), 2);
        assert!((visible[0].unsigned_area() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn clips_features_crossing_the_edge() {
        let index = BackgroundIndex::new(vec![square(0.0, 0.0, 100.0)]);
        let extent = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 });
        let visible = index.visible(extent);
        assert_eq!(visible.len(), 1);
        let bbox = visible[0].bounding_rect().unwrap();
        assert!(bbox.max().x <= 10.5 + 1e-9);
        assert!(bbox.max().y <= 10.5 + 1e-9);
    }

    #[test]
    fn empty_index_yields_nothing() {
        let index = BackgroundIndex::new(Vec::new());
        assert!(index.is_empty());
        let extent = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 });
        assert!(index.visible(extent).is_empty());
    }
}

//! Region label text and placement.
//!
//! Anchor points are computed on lon/lat geometry (offsets are in degrees)
//! and projected afterwards; inset placement rules work on the projected
//! inset extent.

use crate::figure::TextLabel;
use crate::geography::{
    AnchorPointKind, ClipSide, HAlign, InsetLabelRule, LabelSettings, Positioning, RelCoord,
    VAlign,
};
use crate::projection::Projection;
use crate::types::MergedRecord;
use geo::{
    Area, BooleanOps, BoundingRect, Centroid, Contains, Coord, InteriorPoint, MultiPolygon,
    Polygon, Rect,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Formats `value` with a `{}`-style template: `{}`, `{:.2f}`, `{:,.0f}`,
/// `{:.1%}`, optionally wrapped in literal text (`"${:,.0f}"`).
///
/// Templates outside that subset fall back to the plain number.
pub fn format_value(value: f64, template: &str) -> String {
    match try_format_value(value, template) {
        Some(text) => text,
        None => {
            debug!(template, "Unsupported value format, using plain number");
            value.to_string()
        }
    }
}

fn try_format_value(value: f64, template: &str) -> Option<String> {
    let open = template.find('{')?;
    let close = open + template[open..].find('}')?;
    let (prefix, suffix) = (&template[..open], &template[close + 1..]);
    let inner = &template[open + 1..close];

    let spec = match inner.strip_prefix(':') {
        Some(spec) => spec,
        None if inner.is_empty() => "",
        None => return None,
    };

    let (grouping, rest) = match spec.strip_prefix(',') {
        Some(rest) => (true, rest),
        None => (false, spec),
    };
    let (precision, kind) = match rest.strip_prefix('.') {
        Some(rest) => {
            let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
            let precision = digits.parse::<usize>().ok()?;
            (Some(precision), &rest[digits.len()..])
        }
        None => (None, rest),
    };

    let body = match (kind, precision) {
        ("f" | "F", p) => format!("{:.*}", p.unwrap_or(6), value),
        ("%", p) => format!("{:.*}%", p.unwrap_or(6), value * 100.0),
        ("d", None) if value.fract() == 0.0 => format!("{}", value as i64),
        ("", Some(p)) => format!("{:.*}", p, value),
        ("", None) => format!("{}", value),
        _ => return None,
    };
    let body = if grouping { group_thousands(&body) } else { body };

    Some(format!("{}{}{}", prefix, body, suffix))
}

fn group_thousands(number: &str) -> String {
    let (sign, digits) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let split = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let (int_part, tail) = digits.split_at(split);

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{}{}{}", sign, grouped, tail)
}

/// Substitutes `{code}`, `{name}` and `{value}` in `template`.
pub fn format_label(template: &str, code: &str, name: &str, value_text: &str) -> String {
    template
        .replace("{code}", code)
        .replace("{name}", name)
        .replace("{value}", value_text)
}

/// Label text of `record` under `settings`.
pub fn label_text(record: &MergedRecord, settings: &LabelSettings) -> String {
    let value_text = match record.value.value() {
        Some(v) => format_value(v, &settings.value_format),
        None => settings.na_value_text.clone(),
    };
    format_label(&settings.label_format, &record.code, &record.name, &value_text)
}

/// An interior point of `geometry`, or its centroid when the interior point
/// is not strictly inside.
pub fn interior_or_centroid(geometry: &MultiPolygon<f64>) -> Option<Coord<f64>> {
    match geometry.interior_point() {
        Some(point) if geometry.contains(&point) => Some(point.0),
        _ => geometry.centroid().map(|c| c.0),
    }
}

/// Interior point of the `fraction` of `geometry` nearest `side`.
///
/// Falls back to the whole geometry when the slice comes out empty.
pub fn clipped_point(
    geometry: &MultiPolygon<f64>,
    side: ClipSide,
    fraction: f64,
) -> Option<Coord<f64>> {
    let bounds = geometry.bounding_rect()?;
    let slice = clip_slice(bounds, side, fraction);
    let clipped = geometry.intersection(&MultiPolygon::new(vec![slice.to_polygon()]));

    if clipped.0.is_empty() || clipped.unsigned_area() <= 0.0 {
        warn!(?side, fraction, "Clipped geometry is empty, using full geometry");
        return interior_or_centroid(geometry);
    }
    interior_or_centroid(&clipped)
}

fn clip_slice(bounds: Rect<f64>, side: ClipSide, fraction: f64) -> Rect<f64> {
    let (min, max) = (bounds.min(), bounds.max());
    let (w, h) = (bounds.width(), bounds.height());
    let (lo, hi) = match side {
        ClipSide::Top => (Coord { x: min.x, y: max.y - h * fraction }, max),
        ClipSide::Bottom => (min, Coord { x: max.x, y: min.y + h * fraction }),
        ClipSide::Left => (min, Coord { x: min.x + w * fraction, y: max.y }),
        ClipSide::Right => (Coord { x: max.x - w * fraction, y: min.y }, max),
    };
    Rect::new(lo, hi)
}

/// The polygon of `geometry` with the largest area.
pub fn largest_polygon(geometry: &MultiPolygon<f64>) -> Option<&Polygon<f64>> {
    geometry.0.iter().max_by(|a, b| {
        a.unsigned_area()
            .partial_cmp(&b.unsigned_area())
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

/// Labels for regions drawn in the main axes.
pub fn main_labels(
    records: &[&MergedRecord],
    settings: &LabelSettings,
    projection: &Projection,
) -> Vec<TextLabel> {
    let mut labels = Vec::with_capacity(records.len());
    for record in records {
        let clip = by_code(&settings.clipped_regions, &record.code);
        let anchor = match clip {
            Some((side, fraction)) => clipped_point(&record.geometry, *side, *fraction),
            None => interior_or_centroid(&record.geometry),
        };
        let Some(anchor) = anchor else {
            warn!(code = %record.code, "No label position for empty geometry");
            continue;
        };

        let text = label_text(record, settings);
        let offset = settings
            .small_regions
            .iter()
            .any(|c| c.eq_ignore_ascii_case(&record.code))
            .then(|| by_code(&settings.offsets, &record.code))
            .flatten();

        let label = match offset {
            Some([dx, dy]) => {
                debug!(code = %record.code, dx, dy, "Annotating small region");
                TextLabel {
                    code: record.code.clone(),
                    text,
                    position: projection.project(anchor.x + dx, anchor.y + dy),
                    arrow_to: Some(projection.project(anchor.x, anchor.y)),
                    fontsize: settings.annotation_fontsize,
                    ha: HAlign::Left,
                    va: VAlign::Center,
                    bbox: settings.annotation_bbox_style.clone(),
                    arrow: settings.annotation_arrowprops.clone(),
                }
            }
            None => TextLabel {
                code: record.code.clone(),
                text,
                position: projection.project(anchor.x, anchor.y),
                arrow_to: None,
                fontsize: settings.label_fontsize,
                ha: HAlign::Center,
                va: VAlign::Center,
                bbox: settings.label_bbox_style.clone(),
                arrow: None,
            },
        };
        labels.push(label);
    }
    labels
}

/// Labels for regions drawn in an inset whose projected window is `extent`.
pub fn inset_labels(
    records: &[&MergedRecord],
    settings: &LabelSettings,
    projection: &Projection,
    extent: Rect<f64>,
) -> Vec<TextLabel> {
    let mut labels = Vec::with_capacity(records.len());
    for record in records {
        let text = label_text(record, settings);

        if let Some(rule) = by_code(&settings.inset_label_handling, &record.code) {
            match rule_anchor(&record.geometry, rule) {
                Some(anchor) => {
                    let anchor = projection.project(anchor.x, anchor.y);
                    let placement = &rule.placement;
                    let position = Coord {
                        x: relative(placement.x_rel.as_ref(), extent.min().x, extent.width())
                            .unwrap_or(anchor.x),
                        y: relative(placement.y_rel.as_ref(), extent.min().y, extent.height())
                            .unwrap_or(anchor.y),
                    };
                    labels.push(TextLabel {
                        code: record.code.clone(),
                        text,
                        position,
                        arrow_to: Some(anchor),
                        fontsize: settings.annotation_fontsize,
                        ha: placement.ha,
                        va: placement.va,
                        bbox: settings.annotation_bbox_style.clone(),
                        arrow: if placement.use_arrow {
                            settings.annotation_arrowprops.clone()
                        } else {
                            None
                        },
                    });
                    continue;
                }
                None => warn!(
                    code = %record.code,
                    "No anchor point for inset label rule, using default placement"
                ),
            }
        }

        let Some(point) = interior_or_centroid(&record.geometry) else {
            continue;
        };
        labels.push(TextLabel {
            code: record.code.clone(),
            text,
            position: projection.project(point.x, point.y),
            arrow_to: None,
            fontsize: settings.label_fontsize - 1.0,
            ha: HAlign::Center,
            va: VAlign::Center,
            bbox: settings.label_bbox_style.clone(),
            arrow: None,
        });
    }
    labels
}

/// Per-code setting, matching region codes case-insensitively.
fn by_code<'a, V>(map: &'a BTreeMap<String, V>, code: &str) -> Option<&'a V> {
    map.get(code).or_else(|| {
        map.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(code))
            .map(|(_, value)| value)
    })
}

fn rule_anchor(geometry: &MultiPolygon<f64>, rule: &InsetLabelRule) -> Option<Coord<f64>> {
    match rule.positioning {
        Positioning::RelativeToLargestPolygon => {
            let largest = largest_polygon(geometry)?;
            match rule.anchor_point {
                AnchorPointKind::Centroid => largest.centroid().map(|p| p.0),
                AnchorPointKind::RepresentativePoint => largest.interior_point().map(|p| p.0),
            }
        }
        Positioning::GeometryCentroid => geometry.centroid().map(|p| p.0),
        Positioning::GeometryRepresentativePoint => geometry.interior_point().map(|p| p.0),
    }
}

/// `origin + span * fraction` for numeric coordinates; keywords such as
/// `centroid_y` yield `None`.
fn relative(coord: Option<&RelCoord>, origin: f64, span: f64) -> Option<f64> {
    coord
        .and_then(RelCoord::fraction)
        .map(|f| origin + span * f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geography::{InsetLabelRule, Placement};
    use crate::types::BoundValue;
    use geo::{coord, polygon};

    fn rect_poly(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
        polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]
    }

    fn record(code: &str, value: Option<f64>, polys: Vec<Polygon<f64>>) -> MergedRecord {
        MergedRecord {
            code: code.to_string(),
            name: format!("{} name", code),
            geometry: MultiPolygon::new(polys),
            value: value.map(BoundValue::Value).unwrap_or(BoundValue::Missing),
        }
    }

    #[test]
    fn value_formats() {
        assert_eq!(format_value(1234.567, "{:.0f}"), "1235");
        assert_eq!(format_value(1234567.891, "{:,.2f}"), "1,234,567.89");
        assert_eq!(format_value(-9876.0, "{:,.0f}"), "-9,876");
        assert_eq!(format_value(0.256, "{:.1%}"), "25.6%");
        assert_eq!(format_value(12.5, "${:.1f}M"), "$12.5M");
        assert_eq!(format_value(3.0, "{}"), "3");
        assert_eq!(format_value(3.25, "{:>10q}"), "3.25");
    }

    #[test]
    fn label_template_substitution() {
        let settings = LabelSettings::default();
        let ca = record("CA", Some(10.4), vec![rect_poly(0.0, 0.0, 1.0, 1.0)]);
        assert_eq!(label_text(&ca, &settings), "CA - 10");

        let missing = record("OH", None, vec![rect_poly(0.0, 0.0, 1.0, 1.0)]);
        assert_eq!(label_text(&missing, &settings), "OH - N/A");

        assert_eq!(format_label("{name}\n{value}", "X", "Xland", "5"), "Xland\n5");
    }

    #[test]
    fn interior_point_lies_inside() {
        let geom = MultiPolygon::new(vec![rect_poly(0.0, 0.0, 4.0, 2.0)]);
        let p = interior_or_centroid(&geom).unwrap();
        assert!(geom.contains(&geo::Point::from(p)));
        assert!(interior_or_centroid(&MultiPolygon::new(vec![])).is_none());
    }

    #[test]
    fn clipped_point_moves_toward_side() {
        let geom = MultiPolygon::new(vec![rect_poly(0.0, 0.0, 10.0, 10.0)]);
        let top = clipped_point(&geom, ClipSide::Top, 0.2).unwrap();
        assert!(top.y >= 8.0 - 1e-9);
        let left = clipped_point(&geom, ClipSide::Left, 0.3).unwrap();
        assert!(left.x <= 3.0 + 1e-9);
        let right = clipped_point(&geom, ClipSide::Right, 0.1).unwrap();
        assert!(right.x >= 9.0 - 1e-9);
    }

    #[test]
    fn largest_polygon_by_area() {
        let geom = MultiPolygon::new(vec![
            rect_poly(0.0, 0.0, 1.0, 1.0),
            rect_poly(5.0, 5.0, 8.0, 8.0),
            rect_poly(10.0, 10.0, 11.0, 12.0),
        ]);
        let largest = largest_polygon(&geom).unwrap();
        assert_eq!(largest.unsigned_area(), 9.0);
    }

    #[test]
    fn small_regions_with_offsets_become_annotations() {
        let mut settings = LabelSettings::default();
        settings.small_regions = vec!["RI".into()];
        settings.offsets.insert("RI".into(), [2.0, -1.0]);
        // Offset without small_regions membership is ignored.
        settings.offsets.insert("CT".into(), [5.0, 5.0]);

        let ri = record("RI", Some(3.0), vec![rect_poly(0.0, 0.0, 1.0, 1.0)]);
        let ct = record("CT", Some(4.0), vec![rect_poly(2.0, 0.0, 3.0, 1.0)]);
        let labels = main_labels(&[&ri, &ct], &settings, &Projection::PlateCarree);

        assert_eq!(labels.len(), 2);
        let ri_label = &labels[0];
        assert!(ri_label.is_annotation());
        assert_eq!(ri_label.fontsize, 6.0);
        assert_eq!(ri_label.ha, HAlign::Left);
        let anchor = ri_label.arrow_to.unwrap();
        assert!((ri_label.position.x - anchor.x - 2.0).abs() < 1e-9);
        assert!((ri_label.position.y - anchor.y + 1.0).abs() < 1e-9);

        let ct_label = &labels[1];
        assert!(!ct_label.is_annotation());
        assert_eq!(ct_label.fontsize, 7.0);
    }

    #[test]
    fn per_code_settings_ignore_case() {
        let mut settings = LabelSettings::default();
        settings.small_regions = vec!["ri".into()];
        settings.offsets.insert("Ri".into(), [2.0, -1.0]);
        settings.clipped_regions.insert("fl".into(), (ClipSide::Bottom, 0.5));

        let ri = record("RI", Some(3.0), vec![rect_poly(0.0, 0.0, 1.0, 1.0)]);
        let fl = record("FL", Some(4.0), vec![rect_poly(0.0, 0.0, 2.0, 10.0)]);
        let labels = main_labels(&[&ri, &fl], &settings, &Projection::PlateCarree);

        assert!(labels[0].is_annotation());
        assert!(labels[1].position.y < 5.0);
    }

    #[test]
    fn inset_rule_places_relative_to_extent() {
        let mut settings = LabelSettings::default();
        settings.inset_label_handling.insert(
            "HI".into(),
            InsetLabelRule {
                positioning: Positioning::RelativeToLargestPolygon,
                anchor_point: AnchorPointKind::Centroid,
                placement: Placement {
                    ha: HAlign::Left,
                    va: VAlign::Center,
                    x_rel: Some(RelCoord::Fraction(0.25)),
                    y_rel: Some(RelCoord::Keyword("centroid_y".into())),
                    use_arrow: false,
                },
            },
        );
        let hi = record(
            "HI",
            Some(1.0),
            vec![rect_poly(0.0, 0.0, 1.0, 1.0), rect_poly(4.0, 4.0, 8.0, 6.0)],
        );
        let ak = record("AK", None, vec![rect_poly(20.0, 20.0, 22.0, 22.0)]);
        let extent = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 40.0, y: 10.0 });

        let labels = inset_labels(&[&hi, &ak], &settings, &Projection::PlateCarree, extent);
        let hi_label = &labels[0];
        let anchor = hi_label.arrow_to.unwrap();
        assert!((anchor.x - 6.0).abs() < 1e-9 && (anchor.y - 5.0).abs() < 1e-9);
        assert!((hi_label.position.x - 10.0).abs() < 1e-9);
        assert_eq!(hi_label.position.y, anchor.y);
        assert!(hi_label.arrow.is_none());

        let ak_label = &labels[1];
        assert_eq!(ak_label.fontsize, 6.0);
        assert_eq!(ak_label.text, "AK - N/A");
    }

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands("1234567"), "1,234,567");
        assert_eq!(group_thousands("999.5"), "999.5");
        assert_eq!(group_thousands("-1000"), "-1,000");
    }
}

//! Draws a [`Figure`] with plotters: SVG as text, PNG/JPEG through an RGB
//! buffer saved with `image`.

use crate::colormap;
use crate::error::{PlotError, Result};
use crate::figure::{Axes, Colorbar, FigRect, Figure, Layer, TextLabel, POINTS_PER_INCH};
use crate::geography::{HAlign, LineStyle, Orientation, VAlign};
use geo::{BooleanOps, BoundingRect, LineString, MultiPolygon, Rect, TriangulateEarcut};
use image::RgbImage;
use plotters::coord::types::RangedCoordf64;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::FontTransform;
use std::borrow::Cow;
use std::fmt::Display;
use std::fs;
use std::iter::once;
use std::path::Path;
use tracing::{debug, info, warn};

type MapChart<'a, DB> = ChartContext<'a, DB, Cartesian2d<RangedCoordf64, RangedCoordf64>>;

const FONT_FAMILY: &str = "sans-serif";
const TITLE_FONTSIZE: f64 = 16.0;
const COLORBAR_FONTSIZE: f64 = 9.0;
const COLORBAR_STEPS: usize = 64;
const COLORBAR_TICKS: usize = 4;

/// Writes `figure` to `path`, choosing the format from the extension.
pub fn save(figure: &Figure, path: &Path) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "svg" => save_svg(figure, path),
        "png" | "jpg" | "jpeg" => save_raster(figure, path),
        other => Err(PlotError::Render(format!(
            "Unsupported output format '{}' for {:?} (use .svg, .png or .jpg)",
            other, path
        ))),
    }
}

pub fn render_svg_string(figure: &Figure) -> Result<String> {
    let size = figure.pixel_size();
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, size).into_drawing_area();
        draw_figure(&root, figure)?;
        root.present().map_err(render_error)?;
    }
    Ok(svg)
}

pub fn save_svg(figure: &Figure, path: &Path) -> Result<()> {
    let svg = render_svg_string(figure)?;
    fs::write(path, svg)?;
    info!(path = ?path, "Saved SVG figure");
    Ok(())
}

pub fn render_rgb(figure: &Figure) -> Result<RgbImage> {
    let (width, height) = figure.pixel_size();
    let mut buffer = vec![0u8; width as usize * height as usize * 3];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        draw_figure(&root, figure)?;
        root.present().map_err(render_error)?;
    }
    RgbImage::from_raw(width, height, buffer)
        .ok_or_else(|| PlotError::Render("Pixel buffer does not match figure size".into()))
}

pub fn save_raster(figure: &Figure, path: &Path) -> Result<()> {
    let image = render_rgb(figure)?;
    image
        .save(path)
        .map_err(|e| PlotError::Render(format!("Failed to write {:?}: {}", path, e)))?;
    info!(path = ?path, width = image.width(), height = image.height(), "Saved raster figure");
    Ok(())
}

fn render_error<E: Display>(e: E) -> PlotError {
    PlotError::Render(e.to_string())
}

/// Text needs system fonts; a figure without them is still useful.
fn soft<T, E: Display>(result: std::result::Result<T, E>, what: &str) {
    if let Err(e) = result {
        warn!(error = %e, "Could not draw {}", what);
    }
}

fn rgba(c: colormap::Color) -> RGBAColor {
    RGBAColor(c.r, c.g, c.b, c.a)
}

fn points_to_px(points: f64, dpi: u32) -> f64 {
    points * dpi as f64 / POINTS_PER_INCH
}

fn stroke_px(linewidth: f64, dpi: u32) -> u32 {
    points_to_px(linewidth, dpi).round().max(1.0) as u32
}

/// Top-left pixel corner and size of a figure-fraction rectangle.
fn pixel_rect(rect: FigRect, (width, height): (u32, u32)) -> (i32, i32, u32, u32) {
    let (w, h) = (width as f64, height as f64);
    let left = (rect.left * w).round() as i32;
    let top = ((1.0 - rect.top()) * h).round() as i32;
    let pw = (rect.width * w).round().max(1.0) as u32;
    let ph = (rect.height * h).round().max(1.0) as u32;
    (left, top, pw, ph)
}

fn draw_figure<DB: DrawingBackend>(root: &DrawingArea<DB, Shift>, figure: &Figure) -> Result<()> {
    root.fill(&WHITE).map_err(render_error)?;
    for axes in figure.all_axes() {
        draw_axes(root, axes, figure)?;
    }
    draw_colorbar(root, &figure.colorbar, figure)?;

    if !figure.title.is_empty() {
        let (w, h) = figure.pixel_size();
        let y = ((1.0 - figure.main.rect.top()) / 2.0 * h as f64) as i32;
        let style = (FONT_FAMILY, points_to_px(TITLE_FONTSIZE, figure.dpi))
            .into_font()
            .color(&BLACK)
            .pos(Pos::new(HPos::Center, VPos::Center));
        soft(
            root.draw(&Text::new(figure.title.clone(), (w as i32 / 2, y), style)),
            "title",
        );
    }
    Ok(())
}

fn draw_axes<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    axes: &Axes,
    figure: &Figure,
) -> Result<()> {
    let (left, top, width, height) = pixel_rect(axes.rect, figure.pixel_size());
    let area = root.clone().shrink((left, top), (width, height));
    area.fill(&rgba(axes.background)).map_err(render_error)?;

    let extent = axes.extent;
    let mut chart = ChartBuilder::on(&area)
        .build_cartesian_2d(extent.min().x..extent.max().x, extent.min().y..extent.max().y)
        .map_err(render_error)?;
    let units_per_px = extent.width() / width as f64;

    for layer in &axes.layers {
        debug!(kind = ?layer.kind, shapes = layer.shapes.len(), "Drawing layer");
        draw_layer(&mut chart, layer, axes, figure.dpi, units_per_px)?;
    }

    area.draw(&Rectangle::new(
        [(0, 0), (width as i32 - 1, height as i32 - 1)],
        BLACK.stroke_width(1),
    ))
    .map_err(render_error)?;

    for label in &axes.labels {
        soft(draw_label(root, &chart, label, figure.dpi), "label");
    }
    Ok(())
}

fn draw_layer<DB: DrawingBackend>(
    chart: &mut MapChart<'_, DB>,
    layer: &Layer,
    axes: &Axes,
    dpi: u32,
    units_per_px: f64,
) -> Result<()> {
    let style = &layer.style;
    let stroke = stroke_px(style.linewidth, dpi);
    let draw_edges = style.edge.a > 0.0 && style.linewidth > 0.0;
    let dash = match style.linestyle {
        LineStyle::Solid => None,
        LineStyle::Dashed => Some((4.0 * stroke as f64, 2.0 * stroke as f64)),
        LineStyle::Dotted => Some((stroke as f64, 2.0 * stroke as f64)),
    };

    for shape in &layer.shapes {
        let geometry = clip_to(&shape.geometry, axes.extent);
        for polygon in geometry.iter() {
            if shape.fill.a > 0.0 {
                let fill = rgba(shape.fill).filled();
                if polygon.interiors().is_empty() {
                    chart
                        .draw_series(once(Polygon::new(ring_points(polygon.exterior()), fill)))
                        .map_err(render_error)?;
                } else {
                    // Holes stay unpainted so enclaves drawn earlier show through.
                    chart
                        .draw_series(polygon.earcut_triangles_iter().map(|triangle| {
                            let corners: Vec<(f64, f64)> =
                                triangle.to_array().iter().map(|c| (c.x, c.y)).collect();
                            Polygon::new(corners, fill)
                        }))
                        .map_err(render_error)?;
                }
            }

            if !draw_edges {
                continue;
            }
            let edge = rgba(style.edge).stroke_width(stroke);
            for ring in once(polygon.exterior()).chain(polygon.interiors()) {
                let points = ring_points(ring);
                let paths = match dash {
                    None => vec![points],
                    Some((on, off)) => dash_segments(&points, on * units_per_px, off * units_per_px),
                };
                chart
                    .draw_series(paths.into_iter().map(|p| PathElement::new(p, edge)))
                    .map_err(render_error)?;
            }
        }
    }
    Ok(())
}

fn ring_points(ring: &LineString<f64>) -> Vec<(f64, f64)> {
    ring.coords().map(|c| (c.x, c.y)).collect()
}

/// `geometry` cut to `extent`; untouched when it already fits.
fn clip_to(geometry: &MultiPolygon<f64>, extent: Rect<f64>) -> Cow<'_, MultiPolygon<f64>> {
    match geometry.bounding_rect() {
        Some(b)
            if b.min().x >= extent.min().x
                && b.min().y >= extent.min().y
                && b.max().x <= extent.max().x
                && b.max().y <= extent.max().y =>
        {
            Cow::Borrowed(geometry)
        }
        Some(_) => Cow::Owned(geometry.intersection(&MultiPolygon::new(vec![extent.to_polygon()]))),
        None => Cow::Borrowed(geometry),
    }
}

/// Splits a polyline into dashes of length `on` separated by gaps of `off`.
fn dash_segments(points: &[(f64, f64)], on: f64, off: f64) -> Vec<Vec<(f64, f64)>> {
    if points.len() < 2 || !(on > 0.0 && off > 0.0) {
        return vec![points.to_vec()];
    }
    let mut segments = Vec::new();
    let mut drawing = true;
    let mut remaining = on;
    let mut current = vec![points[0]];

    for pair in points.windows(2) {
        let (mut x0, mut y0) = pair[0];
        let (x1, y1) = pair[1];
        let mut len = (x1 - x0).hypot(y1 - y0);
        while len > remaining {
            let t = remaining / len;
            let split = (x0 + (x1 - x0) * t, y0 + (y1 - y0) * t);
            if drawing {
                current.push(split);
                segments.push(std::mem::take(&mut current));
            } else {
                current = vec![split];
            }
            drawing = !drawing;
            remaining = if drawing { on } else { off };
            (x0, y0) = split;
            len = (x1 - x0).hypot(y1 - y0);
        }
        remaining -= len;
        if drawing {
            current.push((x1, y1));
        }
    }
    if drawing && current.len() > 1 {
        segments.push(current);
    }
    segments
}

fn draw_label<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    chart: &MapChart<'_, DB>,
    label: &TextLabel,
    dpi: u32,
) -> Result<()> {
    let (x, y) = chart.backend_coord(&(label.position.x, label.position.y));

    if let (Some(target), Some(arrow)) = (label.arrow_to, &label.arrow) {
        let to = chart.backend_coord(&(target.x, target.y));
        let color = arrow.color.map(rgba).unwrap_or(BLACK.to_rgba());
        let width = stroke_px(arrow.linewidth.unwrap_or(0.5), dpi);
        draw_arrow(root, (x, y), to, color.stroke_width(width))?;
    }

    let size = points_to_px(label.fontsize, dpi);
    let hpos = match label.ha {
        HAlign::Left => HPos::Left,
        HAlign::Center => HPos::Center,
        HAlign::Right => HPos::Right,
    };
    let style = (FONT_FAMILY, size)
        .into_font()
        .color(&BLACK)
        .pos(Pos::new(hpos, VPos::Center));

    let lines: Vec<&str> = label.text.lines().collect();
    let line_h = (size * 1.2).round() as i32;
    let block_h = line_h * lines.len() as i32;
    let first = match label.va {
        VAlign::Top => y + line_h / 2,
        VAlign::Center => y - block_h / 2 + line_h / 2,
        VAlign::Bottom => y - block_h + line_h / 2,
    };

    if let Some(bbox) = &label.bbox {
        let mut text_w = 0;
        for line in &lines {
            let (w, _) = root.estimate_text_size(line, &style).map_err(render_error)?;
            text_w = text_w.max(w as i32);
        }
        let pad = (size * 0.3).round() as i32;
        let x0 = match label.ha {
            HAlign::Left => x,
            HAlign::Center => x - text_w / 2,
            HAlign::Right => x - text_w,
        };
        let corners = [
            (x0 - pad, first - line_h / 2 - pad),
            (x0 + text_w + pad, first - line_h / 2 + block_h + pad),
        ];
        let alpha = bbox.alpha.unwrap_or(1.0);
        if let Some(face) = bbox.facecolor {
            let fill = rgba(face.with_alpha(face.a * alpha)).filled();
            root.draw(&Rectangle::new(corners, fill)).map_err(render_error)?;
        }
        if let Some(edge) = bbox.edgecolor {
            let line = rgba(edge.with_alpha(edge.a * alpha)).stroke_width(1);
            root.draw(&Rectangle::new(corners, line)).map_err(render_error)?;
        }
    }

    for (i, line) in lines.iter().enumerate() {
        root.draw(&Text::new(
            line.to_string(),
            (x, first + i as i32 * line_h),
            style.clone(),
        ))
        .map_err(render_error)?;
    }
    Ok(())
}

fn draw_arrow<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    from: (i32, i32),
    to: (i32, i32),
    style: ShapeStyle,
) -> Result<()> {
    root.draw(&PathElement::new(vec![from, to], style))
        .map_err(render_error)?;

    let (dx, dy) = ((to.0 - from.0) as f64, (to.1 - from.1) as f64);
    let len = dx.hypot(dy);
    if len < 1.0 {
        return Ok(());
    }
    let head = 6.0 + style.stroke_width as f64;
    let angle = dy.atan2(dx);
    for side in [-0.45_f64, 0.45] {
        let a = angle + std::f64::consts::PI + side;
        let tip = (
            to.0 + (head * a.cos()).round() as i32,
            to.1 + (head * a.sin()).round() as i32,
        );
        root.draw(&PathElement::new(vec![to, tip], style))
            .map_err(render_error)?;
    }
    Ok(())
}

fn draw_colorbar<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    colorbar: &Colorbar,
    figure: &Figure,
) -> Result<()> {
    let (left, top, width, height) = pixel_rect(colorbar.rect, figure.pixel_size());
    let (right, bottom) = (left + width as i32, top + height as i32);
    let vertical = colorbar.orientation == Orientation::Vertical;

    for i in 0..COLORBAR_STEPS {
        let t = (i as f64 + 0.5) / COLORBAR_STEPS as f64;
        let fill = rgba(colorbar.colormap.sample(t)).filled();
        let (a, b) = (
            i as f64 / COLORBAR_STEPS as f64,
            (i + 1) as f64 / COLORBAR_STEPS as f64,
        );
        let corners = if vertical {
            let span = height as f64;
            [
                (left, bottom - (b * span).ceil() as i32),
                (right, bottom - (a * span).floor() as i32),
            ]
        } else {
            let span = width as f64;
            [
                (left + (a * span).floor() as i32, top),
                (left + (b * span).ceil() as i32, bottom),
            ]
        };
        root.draw(&Rectangle::new(corners, fill))
            .map_err(render_error)?;
    }
    root.draw(&Rectangle::new(
        [(left, top), (right, bottom)],
        BLACK.stroke_width(1),
    ))
    .map_err(render_error)?;

    let font_px = points_to_px(COLORBAR_FONTSIZE, figure.dpi);
    let tick_len = (font_px / 3.0).round().max(2.0) as i32;
    let norm = colorbar.norm;
    for k in 0..=COLORBAR_TICKS {
        let f = k as f64 / COLORBAR_TICKS as f64;
        let value = norm.vmin + (norm.vmax - norm.vmin) * f;
        let (tick, text_at, pos) = if vertical {
            let ty = bottom - (f * height as f64).round() as i32;
            (
                [(right, ty), (right + tick_len, ty)],
                (right + 2 * tick_len, ty),
                Pos::new(HPos::Left, VPos::Center),
            )
        } else {
            let tx = left + (f * width as f64).round() as i32;
            (
                [(tx, bottom), (tx, bottom + tick_len)],
                (tx, bottom + 2 * tick_len),
                Pos::new(HPos::Center, VPos::Top),
            )
        };
        root.draw(&PathElement::new(tick.to_vec(), BLACK.stroke_width(1)))
            .map_err(render_error)?;
        let style = (FONT_FAMILY, font_px).into_font().color(&BLACK).pos(pos);
        soft(
            root.draw(&Text::new(tick_label(value), text_at, style)),
            "colour bar tick",
        );
    }

    if !colorbar.label.is_empty() {
        let (at, style) = if vertical {
            let x = right + 2 * tick_len + (font_px * 4.5) as i32;
            (
                (x, (top + bottom) / 2),
                (FONT_FAMILY, font_px)
                    .into_font()
                    .transform(FontTransform::Rotate270)
                    .color(&BLACK)
                    .pos(Pos::new(HPos::Center, VPos::Center)),
            )
        } else {
            (
                ((left + right) / 2, bottom + 2 * tick_len + (font_px * 1.5) as i32),
                (FONT_FAMILY, font_px)
                    .into_font()
                    .color(&BLACK)
                    .pos(Pos::new(HPos::Center, VPos::Top)),
            )
        };
        soft(
            root.draw(&Text::new(colorbar.label.clone(), at, style)),
            "colour bar label",
        );
    }
    Ok(())
}

fn tick_label(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 || value.abs() >= 100.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.2}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colormap::{Color, Colormap, Normalize};
    use crate::figure::{LayerKind, LayerStyle};
    use geo::{coord, polygon};

    fn figure() -> Figure {
        let extent = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 });
        let mut main = Axes::new(FigRect::new(0.1, 0.1, 0.7, 0.8), extent, Color::rgb(240, 248, 255));
        let style = LayerStyle {
            fill: Color::rgb(211, 211, 211),
            edge: Color::rgb(0, 0, 0),
            linewidth: 0.5,
            linestyle: LineStyle::Dashed,
        };
        let mut layer = Layer::new(LayerKind::Base, style);
        layer.push(
            Some("A".into()),
            MultiPolygon::new(vec![polygon![
                (x: 1.0, y: 1.0), (x: 12.0, y: 1.0), (x: 12.0, y: 6.0), (x: 1.0, y: 6.0)
            ]]),
            Color::rgb(68, 1, 84),
        );
        main.layers.push(layer);

        Figure {
            width: 2.0,
            height: 1.5,
            dpi: 50,
            title: String::new(),
            main,
            insets: Vec::new(),
            colorbar: Colorbar {
                colormap: Colormap::by_name("viridis").unwrap(),
                norm: Normalize::new(0.0, 10.0),
                label: String::new(),
                orientation: Orientation::Vertical,
                rect: FigRect::new(0.85, 0.1, 0.05, 0.8),
            },
        }
    }

    #[test]
    fn svg_contains_filled_regions() {
        let svg = render_svg_string(&figure()).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("<polygon"));
        assert!(svg.contains("width=\"100\""));
    }

    #[test]
    fn png_has_figure_pixel_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.png");
        save(&figure(), &path).unwrap();
        assert_eq!(image::image_dimensions(&path).unwrap(), (100, 75));
    }

    #[test]
    fn unknown_extension_is_a_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = save(&figure(), &dir.path().join("map.gif")).unwrap_err();
        assert!(matches!(err, PlotError::Render(_)));
    }

    #[test]
    fn dashes_alternate_along_the_line() {
        let dashes = dash_segments(&[(0.0, 0.0), (10.0, 0.0)], 2.0, 1.0);
        assert_eq!(dashes.len(), 4);
        assert_eq!(dashes[0], vec![(0.0, 0.0), (2.0, 0.0)]);
        assert_eq!(dashes[1], vec![(3.0, 0.0), (5.0, 0.0)]);
        assert_eq!(dashes[3], vec![(9.0, 0.0), (10.0, 0.0)]);

        let solid = dash_segments(&[(0.0, 0.0), (1.0, 0.0)], 0.0, 1.0);
        assert_eq!(solid.len(), 1);
    }

    #[test]
    fn geometry_inside_extent_is_not_copied() {
        let extent = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 });
        let inside = MultiPolygon::new(vec![polygon![
            (x: 1.0, y: 1.0), (x: 2.0, y: 1.0), (x: 2.0, y: 2.0)
        ]]);
        assert!(matches!(clip_to(&inside, extent), Cow::Borrowed(_)));

        let crossing = MultiPolygon::new(vec![polygon![
            (x: 5.0, y: 5.0), (x: 20.0, y: 5.0), (x: 20.0, y: 8.0), (x: 5.0, y: 8.0)
        ]]);
        let clipped = clip_to(&crossing, extent);
        assert!(clipped.bounding_rect().unwrap().max().x <= 10.0 + 1e-9);
    }

    #[test]
    fn enclave_inside_a_hole_keeps_its_fill() {
        let red = Color::rgb(255, 0, 0);
        let green = Color::rgb(0, 128, 0);
        let extent = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 });
        let mut main = Axes::new(FigRect::new(0.0, 0.0, 1.0, 1.0), extent, Color::rgb(0, 0, 255));
        let style = LayerStyle {
            fill: red,
            edge: Color::TRANSPARENT,
            linewidth: 0.0,
            linestyle: LineStyle::Solid,
        };
        let mut layer = Layer::new(LayerKind::Data, style);
        layer.push(
            Some("ACT".into()),
            MultiPolygon::new(vec![polygon![
                (x: 4.0, y: 4.0), (x: 6.0, y: 4.0), (x: 6.0, y: 6.0), (x: 4.0, y: 6.0)
            ]]),
            red,
        );
        layer.push(
            Some("NSW".into()),
            MultiPolygon::new(vec![polygon!(
                exterior: [(x: 1.0, y: 1.0), (x: 9.0, y: 1.0), (x: 9.0, y: 9.0), (x: 1.0, y: 9.0)],
                interiors: [[(x: 4.0, y: 4.0), (x: 4.0, y: 6.0), (x: 6.0, y: 6.0), (x: 6.0, y: 4.0)]],
            )]),
            green,
        );
        main.layers.push(layer);

        let mut figure = figure();
        figure.width = 2.0;
        figure.height = 2.0;
        figure.main = main;
        figure.colorbar.rect = FigRect::new(0.0, 0.0, 0.01, 0.01);
        let image = render_rgb(&figure).unwrap();
        assert_eq!(image.dimensions(), (100, 100));

        assert_eq!(image.get_pixel(50, 50).0, [255, 0, 0]);
        assert_eq!(image.get_pixel(25, 50).0, [0, 128, 0]);
        assert_eq!(image.get_pixel(50, 75).0, [0, 128, 0]);
        assert_eq!(image.get_pixel(5, 50).0, [0, 0, 255]);
    }

    #[test]
    fn tick_labels() {
        assert_eq!(tick_label(10.0), "10");
        assert_eq!(tick_label(2.5), "2.50");
        assert_eq!(tick_label(1234.56), "1235");
    }
}

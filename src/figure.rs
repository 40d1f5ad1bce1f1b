//! Backend-independent description of a rendered map: a figure holding the
//! main axes, inset axes and a colour bar. Geometry in an [`Axes`] is in
//! projected coordinates; axes rectangles are figure fractions measured from
//! the bottom-left corner.

use crate::colormap::{Color, Colormap, Normalize};
use crate::geography::{
    ArrowStyle, BboxTransform, BoxStyle, HAlign, InsetLocation, LineStyle, Orientation,
    VAlign,
};
use geo::{Coord, MultiPolygon, Rect};

/// Points per inch, for converting line widths and font sizes to pixels.
pub const POINTS_PER_INCH: f64 = 72.0;
// Font size `borderpad` is measured in.
const BORDERPAD_FONT_POINTS: f64 = 10.0;

/// An axis-aligned rectangle in figure fractions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FigRect {
    pub left: f64,
    pub bottom: f64,
    pub width: f64,
    pub height: f64,
}

impl FigRect {
    pub fn new(left: f64, bottom: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            bottom,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn top(&self) -> f64 {
        self.bottom + self.height
    }

    /// Largest rectangle centred in `self` whose physical aspect matches
    /// `data_aspect` (height / width) on a figure of `fig_w` x `fig_h`.
    pub fn fit_aspect(&self, data_aspect: f64, fig_w: f64, fig_h: f64) -> FigRect {
        if !(data_aspect.is_finite() && data_aspect > 0.0) {
            return *self;
        }
        let box_w = self.width * fig_w;
        let box_h = self.height * fig_h;
        let (w, h) = if box_h / box_w > data_aspect {
            (box_w, box_w * data_aspect)
        } else {
            (box_h / data_aspect, box_h)
        };
        let (w, h) = (w / fig_w, h / fig_h);
        FigRect::new(
            self.left + (self.width - w) / 2.0,
            self.bottom + (self.height - h) / 2.0,
            w,
            h,
        )
    }
}

/// Stroke and default fill shared by every shape of a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerStyle {
    pub fill: Color,
    pub edge: Color,
    /// In points.
    pub linewidth: f64,
    pub linestyle: LineStyle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    NeighborCountries,
    NeighborLevel1,
    /// Every target region in the missing colour.
    Base,
    /// Target regions with a bound value, in colormap colours.
    Data,
    Lakes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    /// Region code for target regions.
    pub code: Option<String>,
    pub geometry: MultiPolygon<f64>,
    pub fill: Color,
}

/// Shapes drawn together, in order, above all earlier layers.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub kind: LayerKind,
    pub style: LayerStyle,
    pub shapes: Vec<Shape>,
}

impl Layer {
    pub fn new(kind: LayerKind, style: LayerStyle) -> Self {
        Self {
            kind,
            style,
            shapes: Vec::new(),
        }
    }

    pub fn push(&mut self, code: Option<String>, geometry: MultiPolygon<f64>, fill: Color) {
        self.shapes.push(Shape {
            code,
            geometry,
            fill,
        });
    }

    /// Adds a shape in the layer's default fill.
    pub fn push_plain(&mut self, geometry: MultiPolygon<f64>) {
        let fill = self.style.fill;
        self.push(None, geometry, fill);
    }
}

/// A piece of text, optionally connected by an arrow to the point it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct TextLabel {
    pub code: String,
    pub text: String,
    /// Where the text sits, in projected coordinates.
    pub position: Coord<f64>,
    /// Arrow target for annotations.
    pub arrow_to: Option<Coord<f64>>,
    /// In points.
    pub fontsize: f64,
    pub ha: HAlign,
    pub va: VAlign,
    pub bbox: Option<BoxStyle>,
    pub arrow: Option<ArrowStyle>,
}

impl TextLabel {
    pub fn is_annotation(&self) -> bool {
        self.arrow_to.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Axes {
    /// Placement on the figure.
    pub rect: FigRect,
    /// Visible data window in projected coordinates.
    pub extent: Rect<f64>,
    pub background: Color,
    pub layers: Vec<Layer>,
    pub labels: Vec<TextLabel>,
    /// Region codes this axes was created for (empty for the main axes).
    pub codes: Vec<String>,
}

impl Axes {
    pub fn new(rect: FigRect, extent: Rect<f64>, background: Color) -> Self {
        Self {
            rect,
            extent,
            background,
            layers: Vec::new(),
            labels: Vec::new(),
            codes: Vec::new(),
        }
    }

    pub fn layer(&self, kind: LayerKind) -> Option<&Layer> {
        self.layers.iter().find(|l| l.kind == kind)
    }

    /// Final fill of region `code`: the data colour if it has one, else its
    /// base colour.
    pub fn fill_of(&self, code: &str) -> Option<Color> {
        [LayerKind::Data, LayerKind::Base]
            .iter()
            .filter_map(|kind| self.layer(*kind))
            .flat_map(|layer| layer.shapes.iter())
            .find(|shape| shape.code.as_deref() == Some(code))
            .map(|shape| shape.fill)
    }

    /// Codes of every target region drawn in this axes.
    pub fn region_codes(&self) -> Vec<&str> {
        self.layer(LayerKind::Base)
            .map(|l| l.shapes.iter().filter_map(|s| s.code.as_deref()).collect())
            .unwrap_or_default()
    }

    /// Height-over-width ratio of the extent.
    pub fn data_aspect(&self) -> f64 {
        self.extent.height() / self.extent.width()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Colorbar {
    pub colormap: Colormap,
    pub norm: Normalize,
    pub label: String,
    pub orientation: Orientation,
    pub rect: FigRect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Figure {
    /// Inches.
    pub width: f64,
    pub height: f64,
    pub dpi: u32,
    pub title: String,
    pub main: Axes,
    pub insets: Vec<Axes>,
    pub colorbar: Colorbar,
}

impl Figure {
    /// Output size in pixels.
    pub fn pixel_size(&self) -> (u32, u32) {
        let px = |inches: f64| ((inches * self.dpi as f64).round() as u32).max(1);
        (px(self.width), px(self.height))
    }

    pub fn all_axes(&self) -> impl Iterator<Item = &Axes> {
        std::iter::once(&self.main).chain(self.insets.iter())
    }

    /// Inset drawing region `code`, if any.
    pub fn inset_for(&self, code: &str) -> Option<&Axes> {
        self.insets
            .iter()
            .find(|axes| axes.region_codes().contains(&code))
    }

    /// Final fill of region `code` wherever it is drawn.
    pub fn fill_of(&self, code: &str) -> Option<Color> {
        self.all_axes().find_map(|axes| axes.fill_of(code))
    }
}

/// Placement of an inset inside `parent` (or the whole figure), following
/// `location`. Width and height are fractions of the anchor box.
pub fn inset_rect(
    location: &InsetLocation,
    parent: FigRect,
    fig_w: f64,
    fig_h: f64,
) -> Result<FigRect, String> {
    let [bx, by, bw, bh] = location.bbox_to_anchor;
    let anchor_box = match location.bbox_transform {
        BboxTransform::Axes => FigRect::new(
            parent.left + bx * parent.width,
            parent.bottom + by * parent.height,
            bw * parent.width,
            bh * parent.height,
        ),
        BboxTransform::Figure => FigRect::new(bx, by, bw, bh),
    };

    let w = location.width.fraction()? * anchor_box.width;
    let h = location.height.fraction()? * anchor_box.height;
    let pad_inches = location.borderpad * BORDERPAD_FONT_POINTS / POINTS_PER_INCH;
    let (pad_x, pad_y) = (pad_inches / fig_w, pad_inches / fig_h);
    let (fx, fy) = location.loc.factors();

    Ok(FigRect::new(
        anchor_box.left + fx * (anchor_box.width - w) + pad_x * (1.0 - 2.0 * fx),
        anchor_box.bottom + fy * (anchor_box.height - h) + pad_y * (1.0 - 2.0 * fy),
        w,
        h,
    ))
}

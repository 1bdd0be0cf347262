use std::collections::HashSet;

use image::Rgba;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::components::history::HistoryState;
use crate::geometry::{Point, Rect, rotated_bounding_box};

// ============================================================================
// COLOR
// ============================================================================

/// Straight (non-premultiplied) RGBA8.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color(pub [u8; 4]);

impl Default for Color {
    fn default() -> Self {
        Color::BLACK
    }
}

impl Color {
    pub const TRANSPARENT: Color = Color([0, 0, 0, 0]);
    pub const BLACK: Color = Color([0, 0, 0, 255]);
    pub const WHITE: Color = Color([255, 255, 255, 255]);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Color([r, g, b, a])
    }

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color([r, g, b, 255])
    }

    pub fn alpha(&self) -> u8 {
        self.0[3]
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba(self.0)
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` (leading `#` optional).
    pub fn from_hex(s: &str) -> Option<Color> {
        let hex = s.trim().trim_start_matches('#');
        let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        match hex.len() {
            3 => {
                let nib = |i: usize| {
                    let v = u8::from_str_radix(hex.get(i..i + 1)?, 16).ok()?;
                    Some(v * 17)
                };
                Some(Color::rgb(nib(0)?, nib(1)?, nib(2)?))
            }
            6 => Some(Color::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Some(Color::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => None,
        }
    }

    pub fn to_hex(&self) -> String {
        let [r, g, b, a] = self.0;
        format!("#{:02x}{:02x}{:02x}{:02x}", r, g, b, a)
    }
}

// ============================================================================
// BLEND MODES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Hue,
    Saturation,
    Color,
    Luminosity,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::ColorDodge,
            BlendMode::ColorBurn,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::Difference,
            BlendMode::Exclusion,
            BlendMode::Hue,
            BlendMode::Saturation,
            BlendMode::Color,
            BlendMode::Luminosity,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::HardLight => "Hard Light",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
            BlendMode::Hue => "Hue",
            BlendMode::Saturation => "Saturation",
            BlendMode::Color => "Color",
            BlendMode::Luminosity => "Luminosity",
        }
    }

    /// Case-insensitive lookup by display name (`"color dodge"`, `"multiply"`).
    pub fn from_name(name: &str) -> Option<BlendMode> {
        let wanted: String = name.chars().filter(|c| !c.is_whitespace() && *c != '-' && *c != '_').collect();
        BlendMode::all().iter().copied().find(|m| {
            let n: String = m.name().chars().filter(|c| !c.is_whitespace()).collect();
            n.eq_ignore_ascii_case(&wanted)
        })
    }

    /// Per-mode blend `B(Cb, Cs)` for the separable modes; non-separable
    /// modes are resolved in `blend_pixel`.
    fn separable(self, base: f32, top: f32) -> f32 {
        match self {
            BlendMode::Multiply => base * top,
            BlendMode::Screen => 1.0 - (1.0 - base) * (1.0 - top),
            BlendMode::Overlay => hard_light_channel(top, base),
            BlendMode::Darken => base.min(top),
            BlendMode::Lighten => base.max(top),
            BlendMode::ColorDodge => color_dodge_channel(base, top),
            BlendMode::ColorBurn => color_burn_channel(base, top),
            BlendMode::HardLight => hard_light_channel(base, top),
            BlendMode::SoftLight => soft_light_channel(base, top),
            BlendMode::Difference => (base - top).abs(),
            BlendMode::Exclusion => base + top - 2.0 * base * top,
            _ => top,
        }
    }
}

/// Composite `top` over `base` with blend `mode` and extra `opacity` (0..1),
/// following the W3C compositing model (source-over with mixed blend color).
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    if top[3] == 0 || opacity <= 0.0 {
        return base;
    }
    if mode == BlendMode::Normal && opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let opacity = opacity.min(1.0);
    let cb = [base[0] as f32 / 255.0, base[1] as f32 / 255.0, base[2] as f32 / 255.0];
    let cs = [top[0] as f32 / 255.0, top[1] as f32 / 255.0, top[2] as f32 / 255.0];
    let ab = base[3] as f32 / 255.0;
    let as_ = (top[3] as f32 / 255.0) * opacity;

    let mixed = match mode {
        BlendMode::Normal => cs,
        BlendMode::Hue => set_lum(set_sat(cs, sat(cb)), lum(cb)),
        BlendMode::Saturation => set_lum(set_sat(cb, sat(cs)), lum(cb)),
        BlendMode::Color => set_lum(cs, lum(cb)),
        BlendMode::Luminosity => set_lum(cb, lum(cs)),
        _ => [
            mode.separable(cb[0], cs[0]),
            mode.separable(cb[1], cs[1]),
            mode.separable(cb[2], cs[2]),
        ],
    };

    let out_a = as_ + ab * (1.0 - as_);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let channel = |i: usize| {
        let src = (1.0 - ab) * cs[i] + ab * mixed[i];
        let c = (as_ * src + ab * cb[i] * (1.0 - as_)) / out_a;
        (c * 255.0).round().clamp(0.0, 255.0) as u8
    };

    Rgba([
        channel(0),
        channel(1),
        channel(2),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

fn hard_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base * 2.0 * top
    } else {
        let s = 2.0 * top - 1.0;
        base + s - base * s
    }
}

fn color_burn_channel(base: f32, top: f32) -> f32 {
    if base >= 1.0 {
        1.0
    } else if top <= 0.0 {
        0.0
    } else {
        1.0 - ((1.0 - base) / top).min(1.0)
    }
}

fn color_dodge_channel(base: f32, top: f32) -> f32 {
    if base <= 0.0 {
        0.0
    } else if top >= 1.0 {
        1.0
    } else {
        (base / (1.0 - top)).min(1.0)
    }
}

/// W3C Soft Light formula.
fn soft_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

fn lum(c: [f32; 3]) -> f32 {
    0.3 * c[0] + 0.59 * c[1] + 0.11 * c[2]
}

fn clip_color(c: [f32; 3]) -> [f32; 3] {
    let l = lum(c);
    let n = c[0].min(c[1]).min(c[2]);
    let x = c[0].max(c[1]).max(c[2]);
    let mut out = c;
    if n < 0.0 {
        for v in out.iter_mut() {
            *v = l + (*v - l) * l / (l - n);
        }
    }
    if x > 1.0 {
        for v in out.iter_mut() {
            *v = l + (*v - l) * (1.0 - l) / (x - l);
        }
    }
    out
}

fn set_lum(c: [f32; 3], l: f32) -> [f32; 3] {
    let d = l - lum(c);
    clip_color([c[0] + d, c[1] + d, c[2] + d])
}

fn sat(c: [f32; 3]) -> f32 {
    c[0].max(c[1]).max(c[2]) - c[0].min(c[1]).min(c[2])
}

fn set_sat(c: [f32; 3], s: f32) -> [f32; 3] {
    let max = c[0].max(c[1]).max(c[2]);
    let min = c[0].min(c[1]).min(c[2]);
    if max <= min {
        return [0.0; 3];
    }
    c.map(|v| (v - min) * s / (max - min))
}

// ============================================================================
// LAYERS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(Uuid);

impl LayerId {
    pub fn new() -> Self {
        LayerId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShapeKind {
    #[default]
    Rectangle,
    Ellipse,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageContent {
    /// Key into the session's bitmap store.
    pub source: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
    pub font_family: String,
    pub font_size: f32,
    /// CSS-style weight, 100..900.
    pub font_weight: u16,
    pub italic: bool,
    pub uppercase: bool,
    pub align: TextAlign,
    pub color: Color,
    /// Multiple of `font_size` between baselines.
    pub line_height: f32,
}

impl Default for TextContent {
    fn default() -> Self {
        Self {
            text: String::new(),
            font_family: "sans-serif".to_string(),
            font_size: 48.0,
            font_weight: 400,
            italic: false,
            uppercase: false,
            align: TextAlign::Left,
            color: Color::BLACK,
            line_height: 1.2,
        }
    }
}

impl TextContent {
    /// Text as drawn, after the uppercase transform.
    pub fn display_text(&self) -> String {
        if self.uppercase {
            self.text.to_uppercase()
        } else {
            self.text.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShapeContent {
    pub kind: ShapeKind,
    pub fill: Color,
    /// Rectangle only; ignored for ellipses.
    pub corner_radius: f32,
}

/// Variant payload of a layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LayerContent {
    Image(ImageContent),
    Text(TextContent),
    Shape(ShapeContent),
}

impl LayerContent {
    pub fn kind_name(&self) -> &'static str {
        match self {
            LayerContent::Image(_) => "image",
            LayerContent::Text(_) => "text",
            LayerContent::Shape(_) => "shape",
        }
    }
}

/// One positioned, transformable element.  `x`/`y` is the top-left of the
/// unrotated box; `rotation` (degrees) turns it about its own center.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub rotation: f32,
    /// 0..=100
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub visible: bool,
    pub locked: bool,
    pub content: LayerContent,
}

impl Layer {
    pub fn new(name: impl Into<String>, rect: Rect, content: LayerContent) -> Self {
        Self {
            id: LayerId::new(),
            name: name.into(),
            x: rect.x,
            y: rect.y,
            width: rect.width.max(0.0),
            height: rect.height.max(0.0),
            rotation: 0.0,
            opacity: 100.0,
            blend_mode: BlendMode::Normal,
            visible: true,
            locked: false,
            content,
        }
    }

    pub fn image(source: impl Into<String>, rect: Rect) -> Self {
        Self::new("Image", rect, LayerContent::Image(ImageContent { source: source.into() }))
    }

    pub fn text(text: impl Into<String>, rect: Rect) -> Self {
        let content = TextContent { text: text.into(), ..TextContent::default() };
        Self::new("Text", rect, LayerContent::Text(content))
    }

    pub fn shape(kind: ShapeKind, rect: Rect, fill: Color) -> Self {
        let name = match kind {
            ShapeKind::Rectangle => "Rectangle",
            ShapeKind::Ellipse => "Ellipse",
        };
        Self::new(name, rect, LayerContent::Shape(ShapeContent { kind, fill, corner_radius: 0.0 }))
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn center(&self) -> Point {
        self.rect().center()
    }

    /// Axis-aligned bounds after rotation.
    pub fn bounds(&self) -> Rect {
        rotated_bounding_box([(self.rect(), self.rotation)]).unwrap_or_else(|| self.rect())
    }

    pub fn hit(&self, p: Point) -> bool {
        self.rect().contains_rotated(p, self.rotation)
    }
}

/// Partial property update.  `None` fields are left untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayerPatch {
    pub name: Option<String>,
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub rotation: Option<f32>,
    pub opacity: Option<f32>,
    pub blend_mode: Option<BlendMode>,
    pub visible: Option<bool>,
    pub locked: Option<bool>,
    pub content: Option<LayerContent>,
}

impl LayerPatch {
    pub fn position(x: f32, y: f32) -> Self {
        Self { x: Some(x), y: Some(y), ..Self::default() }
    }

    pub fn geometry(rect: Rect) -> Self {
        Self {
            x: Some(rect.x),
            y: Some(rect.y),
            width: Some(rect.width),
            height: Some(rect.height),
            ..Self::default()
        }
    }

    pub fn rotation(degrees: f32) -> Self {
        Self { rotation: Some(degrees), ..Self::default() }
    }

    pub fn opacity(opacity: f32) -> Self {
        Self { opacity: Some(opacity), ..Self::default() }
    }

    /// Apply onto `layer`, enforcing the layer invariants.
    pub fn apply(&self, layer: &mut Layer) {
        if let Some(name) = &self.name {
            layer.name = name.clone();
        }
        if let Some(x) = self.x {
            layer.x = x;
        }
        if let Some(y) = self.y {
            layer.y = y;
        }
        if let Some(w) = self.width {
            layer.width = w.max(0.0);
        }
        if let Some(h) = self.height {
            layer.height = h.max(0.0);
        }
        if let Some(r) = self.rotation {
            layer.rotation = r;
        }
        if let Some(o) = self.opacity {
            layer.opacity = o.clamp(0.0, 100.0);
        }
        if let Some(m) = self.blend_mode {
            layer.blend_mode = m;
        }
        if let Some(v) = self.visible {
            layer.visible = v;
        }
        if let Some(l) = self.locked {
            layer.locked = l;
        }
        if let Some(c) = &self.content {
            layer.content = c.clone();
        }
    }
}

// ============================================================================
// CANVAS SETTINGS
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridSettings {
    pub visible: bool,
    pub snap: bool,
    pub size: f32,
    pub color: Color,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuideSettings {
    pub enabled: bool,
    pub color: Color,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanvasSettings {
    pub width: u32,
    pub height: u32,
    pub background: Option<Color>,
    /// No bounds, no background fill, no canvas-edge snapping.
    pub infinite: bool,
    pub grid: GridSettings,
    pub guides: GuideSettings,
}

impl CanvasSettings {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            background: Some(Color::WHITE),
            infinite: false,
            grid: GridSettings { visible: false, snap: false, size: 20.0, color: Color::rgba(0, 0, 0, 40) },
            guides: GuideSettings { enabled: true, color: Color::rgba(255, 0, 170, 255) },
        }
    }

    /// Canvas rectangle, or `None` in infinite mode.
    pub fn bounds(&self) -> Option<Rect> {
        (!self.infinite).then(|| Rect::new(0.0, 0.0, self.width as f32, self.height as f32))
    }

    /// Background fill, suppressed in infinite mode.
    pub fn effective_background(&self) -> Option<Color> {
        if self.infinite { None } else { self.background }
    }
}

// ============================================================================
// LAYER STORE
// ============================================================================

/// Deep copy of the ordered layer list; one history entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CanvasSnapshot {
    pub layers: Vec<Layer>,
}

impl HistoryState for CanvasSnapshot {
    fn memory_size(&self) -> usize {
        self.layers
            .iter()
            .map(|l| {
                let payload = match &l.content {
                    LayerContent::Image(img) => img.source.len(),
                    LayerContent::Text(t) => t.text.len() + t.font_family.len(),
                    LayerContent::Shape(_) => 0,
                };
                std::mem::size_of::<Layer>() + l.name.len() + payload
            })
            .sum()
    }
}

/// Canonical ordered layer collection (index 0 = topmost) plus canvas
/// settings and the current layer selection.  Every mutation bumps
/// `revision`.
#[derive(Clone, Debug)]
pub struct CanvasState {
    pub settings: CanvasSettings,
    layers: Vec<Layer>,
    selected: Vec<LayerId>,
    revision: u64,
}

impl CanvasState {
    pub fn new(settings: CanvasSettings) -> Self {
        Self { settings, layers: Vec::new(), selected: Vec::new(), revision: 0 }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn index_of(&self, id: LayerId) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    pub fn snapshot(&self) -> CanvasSnapshot {
        CanvasSnapshot { layers: self.layers.clone() }
    }

    /// Replace the layer list wholesale (undo/redo, document load).
    /// Selection entries that no longer exist are dropped.
    pub fn restore(&mut self, snapshot: &CanvasSnapshot) {
        self.layers = snapshot.layers.clone();
        let layers = &self.layers;
        self.selected.retain(|id| layers.iter().any(|l| l.id == *id));
        self.touch();
    }

    // --- selection ---

    pub fn selected(&self) -> &[LayerId] {
        &self.selected
    }

    pub fn is_selected(&self, id: LayerId) -> bool {
        self.selected.contains(&id)
    }

    /// Selected layers in z-order (topmost first).
    pub fn selected_layers(&self) -> Vec<&Layer> {
        self.layers.iter().filter(|l| self.selected.contains(&l.id)).collect()
    }

    pub fn set_selection(&mut self, ids: &[LayerId]) {
        let mut seen = HashSet::new();
        self.selected = ids
            .iter()
            .copied()
            .filter(|id| self.layer(*id).is_some() && seen.insert(*id))
            .collect();
    }

    pub fn select_only(&mut self, id: LayerId) {
        self.set_selection(&[id]);
    }

    pub fn toggle_selected(&mut self, id: LayerId) {
        if let Some(pos) = self.selected.iter().position(|s| *s == id) {
            self.selected.remove(pos);
        } else if self.layer(id).is_some() {
            self.selected.push(id);
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    // --- CRUD ---

    /// Insert at the top; the new layer becomes the sole selection.
    pub fn add_layer(&mut self, layer: Layer) -> LayerId {
        self.insert_layer(0, layer)
    }

    /// Insert at `index` (clamped) and select it alone.  A clashing id is
    /// replaced with a fresh one.
    pub fn insert_layer(&mut self, index: usize, mut layer: Layer) -> LayerId {
        if self.layer(layer.id).is_some() {
            layer.id = LayerId::new();
        }
        layer.width = layer.width.max(0.0);
        layer.height = layer.height.max(0.0);
        layer.opacity = layer.opacity.clamp(0.0, 100.0);
        let id = layer.id;
        let index = index.min(self.layers.len());
        self.layers.insert(index, layer);
        self.selected = vec![id];
        self.touch();
        id
    }

    /// Remove the given layers; returns how many were removed.
    pub fn delete_layers(&mut self, ids: &[LayerId]) -> usize {
        let before = self.layers.len();
        self.layers.retain(|l| !ids.contains(&l.id));
        self.selected.retain(|s| !ids.contains(s));
        let removed = before - self.layers.len();
        if removed > 0 {
            self.touch();
        }
        removed
    }

    /// Copy the given layers, offset by `(dx, dy)`, inserting the copies as
    /// a block directly above the topmost original.  Copies become the
    /// selection.
    pub fn duplicate_layers(&mut self, ids: &[LayerId], dx: f32, dy: f32) -> Vec<LayerId> {
        let originals: Vec<(usize, Layer)> = self
            .layers
            .iter()
            .enumerate()
            .filter(|(_, l)| ids.contains(&l.id))
            .map(|(i, l)| (i, l.clone()))
            .collect();
        let Some(&(top_index, _)) = originals.first() else {
            return Vec::new();
        };

        let mut new_ids = Vec::with_capacity(originals.len());
        for (offset, (_, mut copy)) in originals.into_iter().enumerate() {
            copy.id = LayerId::new();
            copy.name = format!("{} copy", copy.name);
            copy.x += dx;
            copy.y += dy;
            new_ids.push(copy.id);
            self.layers.insert(top_index + offset, copy);
        }
        self.selected = new_ids.clone();
        self.touch();
        new_ids
    }

    /// Reorder to exactly `new_order`; rejected unless it is a permutation of
    /// the current ids.
    pub fn reorder(&mut self, new_order: &[LayerId]) -> bool {
        if new_order.len() != self.layers.len() {
            return false;
        }
        let mut reordered = Vec::with_capacity(new_order.len());
        for id in new_order {
            if reordered.iter().any(|l: &Layer| l.id == *id) {
                return false;
            }
            match self.layer(*id) {
                Some(layer) => reordered.push(layer.clone()),
                None => return false,
            }
        }
        if reordered != self.layers {
            self.layers = reordered;
            self.touch();
        }
        true
    }

    /// Move one layer by `steps` in z-order (negative = toward the top).
    pub fn shift_layer(&mut self, id: LayerId, steps: isize) -> bool {
        let Some(from) = self.index_of(id) else { return false };
        let to = (from as isize + steps).clamp(0, self.layers.len() as isize - 1) as usize;
        if to == from {
            return false;
        }
        let mut order: Vec<LayerId> = self.layers.iter().map(|l| l.id).collect();
        let moved = order.remove(from);
        order.insert(to, moved);
        self.reorder(&order)
    }

    /// Apply one partial update; `false` if the id is unknown.
    pub fn apply_patch(&mut self, id: LayerId, patch: &LayerPatch) -> bool {
        let Some(layer) = self.layers.iter_mut().find(|l| l.id == id) else {
            return false;
        };
        let before = layer.clone();
        patch.apply(layer);
        if *layer != before {
            self.touch();
        }
        true
    }

    /// Rotated bounding box of the given layers.
    pub fn bounding_box_of(&self, ids: &[LayerId]) -> Option<Rect> {
        rotated_bounding_box(
            self.layers
                .iter()
                .filter(|l| ids.contains(&l.id))
                .map(|l| (l.rect(), l.rotation)),
        )
    }

    /// Topmost visible, unlocked layer under `p`.
    pub fn hit_test(&self, p: Point) -> Option<LayerId> {
        self.layers
            .iter()
            .find(|l| l.visible && !l.locked && l.hit(p))
            .map(|l| l.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(n: usize) -> (CanvasState, Vec<LayerId>) {
        let mut s = CanvasState::new(CanvasSettings::new(400, 300));
        let mut ids = Vec::new();
        for i in 0..n {
            ids.push(s.add_layer(Layer::shape(
                ShapeKind::Rectangle,
                Rect::new(i as f32 * 10.0, 0.0, 10.0, 10.0),
                Color::BLACK,
            )));
        }
        (s, ids)
    }

    #[test]
    fn selection_drops_repeats_and_unknown_ids() {
        let (mut s, ids) = store_with(3);
        s.set_selection(&[ids[0], ids[1], ids[0], LayerId::new(), ids[1]]);
        assert_eq!(s.selected(), &[ids[0], ids[1]]);
    }

    #[test]
    fn add_puts_layer_on_top_and_selects_it() {
        let (s, ids) = store_with(3);
        assert_eq!(s.layers()[0].id, ids[2]);
        assert_eq!(s.selected(), &[ids[2]]);
    }

    #[test]
    fn duplicate_goes_above_topmost_original() {
        let (mut s, ids) = store_with(3);
        // z-order: ids[2], ids[1], ids[0]
        let copies = s.duplicate_layers(&[ids[0], ids[1]], 20.0, 20.0);
        assert_eq!(copies.len(), 2);
        let order: Vec<LayerId> = s.layers().iter().map(|l| l.id).collect();
        assert_eq!(order, vec![ids[2], copies[0], copies[1], ids[1], ids[0]]);
        assert_eq!(s.layer(copies[0]).unwrap().x, s.layer(ids[1]).unwrap().x + 20.0);
        assert_eq!(s.selected(), copies.as_slice());
    }

    #[test]
    fn reorder_rejects_non_permutations() {
        let (mut s, ids) = store_with(2);
        assert!(!s.reorder(&[ids[0], ids[0]]));
        assert!(!s.reorder(&[ids[0]]));
        assert!(s.reorder(&[ids[0], ids[1]]));
        assert_eq!(s.layers()[0].id, ids[0]);
    }

    #[test]
    fn patch_clamps_opacity_and_size() {
        let (mut s, ids) = store_with(1);
        let patch = LayerPatch { opacity: Some(140.0), width: Some(-5.0), ..LayerPatch::default() };
        s.apply_patch(ids[0], &patch);
        let l = s.layer(ids[0]).unwrap();
        assert_eq!(l.opacity, 100.0);
        assert_eq!(l.width, 0.0);
    }

    #[test]
    fn noop_patch_does_not_bump_revision() {
        let (mut s, ids) = store_with(1);
        let rev = s.revision();
        s.apply_patch(ids[0], &LayerPatch::position(0.0, 0.0));
        assert_eq!(s.revision(), rev);
    }

    #[test]
    fn hex_colors() {
        assert_eq!(Color::from_hex("#ff0080"), Some(Color::rgb(255, 0, 128)));
        assert_eq!(Color::from_hex("fff"), Some(Color::WHITE));
        assert_eq!(Color::from_hex("#12345"), None);
    }

    #[test]
    fn blend_multiply_half_opacity() {
        let out = blend_pixel(Rgba([200, 100, 50, 255]), Rgba([100, 200, 250, 255]), BlendMode::Multiply, 0.5);
        assert_eq!(out, Rgba([139, 89, 50, 255]));
    }

    #[test]
    fn blend_over_transparent_keeps_source() {
        let out = blend_pixel(Rgba([0, 0, 0, 0]), Rgba([10, 20, 30, 128]), BlendMode::Screen, 1.0);
        assert_eq!(out, Rgba([10, 20, 30, 128]));
    }

    #[test]
    fn blend_mode_names_resolve() {
        assert_eq!(BlendMode::from_name("color-dodge"), Some(BlendMode::ColorDodge));
        assert_eq!(BlendMode::from_name("MULTIPLY"), Some(BlendMode::Multiply));
        assert_eq!(BlendMode::from_name("glow"), None);
    }
}

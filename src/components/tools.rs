use crate::canvas::{Layer, LayerId, LayerPatch, ShapeKind};
use crate::components::snapping::{Guide, SnapEdges, SnapResult, snap_rect, snap_to_grid};
use crate::geometry::{Axis, Point, Rect};
use crate::project::DocumentSession;

/// Handle hit radius, screen pixels.
const HANDLE_HIT_RADIUS: f32 = 6.0;
/// Distance of the rotate handle above the top edge, screen pixels.
const ROTATE_HANDLE_OFFSET: f32 = 24.0;
const MIN_LAYER_SIZE: f32 = 1.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub alt: bool,
    pub ctrl: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers { shift: false, alt: false, ctrl: false };
    pub const SHIFT: Modifiers = Modifiers { shift: true, alt: false, ctrl: false };
    pub const ALT: Modifiers = Modifiers { shift: false, alt: true, ctrl: false };
}

/// Pointer input in screen coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointerEvent {
    Down { pos: Point, mods: Modifiers },
    Move { pos: Point, mods: Modifiers },
    Up { pos: Point, mods: Modifiers },
}

impl PointerEvent {
    pub fn position(&self) -> Point {
        match *self {
            PointerEvent::Down { pos, .. } | PointerEvent::Move { pos, .. } | PointerEvent::Up { pos, .. } => pos,
        }
    }

    pub fn modifiers(&self) -> Modifiers {
        match *self {
            PointerEvent::Down { mods, .. } | PointerEvent::Move { mods, .. } | PointerEvent::Up { mods, .. } => mods,
        }
    }
}

/// Screen = canvas * zoom + pan.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub pan: Point,
    pub zoom: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { pan: Point::ZERO, zoom: 1.0 }
    }
}

impl Viewport {
    pub fn screen_to_canvas(&self, p: Point) -> Point {
        (p - self.pan) * (1.0 / self.zoom)
    }

    pub fn canvas_to_screen(&self, p: Point) -> Point {
        p * self.zoom + self.pan
    }

    /// Zoom by `factor` keeping `anchor` (screen) fixed.
    pub fn zoom_at(&mut self, anchor: Point, factor: f32) {
        let fixed = self.screen_to_canvas(anchor);
        self.zoom = (self.zoom * factor).clamp(0.01, 64.0);
        self.pan = anchor - fixed * self.zoom;
    }

    /// Canvas-space length of `px` screen pixels.
    fn canvas_len(&self, px: f32) -> f32 {
        px / self.zoom
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handle {
    TopLeft,
    Top,
    TopRight,
    Right,
    BottomRight,
    Bottom,
    BottomLeft,
    Left,
    Rotate,
}

impl Handle {
    /// Corners before edges so corners win where they overlap.
    pub const RESIZE: [Handle; 8] = [
        Handle::TopLeft,
        Handle::TopRight,
        Handle::BottomRight,
        Handle::BottomLeft,
        Handle::Top,
        Handle::Right,
        Handle::Bottom,
        Handle::Left,
    ];

    /// Which box edges the handle drags: -1 = min edge, 1 = max edge, 0 = none.
    pub fn sides(self) -> (i8, i8) {
        match self {
            Handle::TopLeft => (-1, -1),
            Handle::Top => (0, -1),
            Handle::TopRight => (1, -1),
            Handle::Right => (1, 0),
            Handle::BottomRight => (1, 1),
            Handle::Bottom => (0, 1),
            Handle::BottomLeft => (-1, 1),
            Handle::Left => (-1, 0),
            Handle::Rotate => (0, 0),
        }
    }

    pub fn position(self, r: &Rect) -> Point {
        let (sx, sy) = self.sides();
        let pick = |side: i8, min: f32, size: f32| min + size * (side as f32 + 1.0) * 0.5;
        Point::new(pick(sx, r.x, r.width), pick(sy, r.y, r.height))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Tool {
    #[default]
    Select,
    DrawShape(ShapeKind),
}

/// What the host should do after an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    Redraw,
    GuidesChanged,
    SelectionChanged,
    Committed,
    LayerCreated(LayerId),
}

/// In-flight pointer gesture.  Positions are canvas space.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Gesture {
    #[default]
    Idle,
    Move {
        start: Point,
        start_box: Rect,
        origins: Vec<(LayerId, Point)>,
        axis_lock: Option<Axis>,
        pending_duplicate: bool,
        moved: bool,
    },
    Resize {
        handle: Handle,
        start: Point,
        start_box: Rect,
        originals: Vec<(LayerId, Rect)>,
    },
    Rotate {
        id: LayerId,
        center: Point,
        start_bearing: f32,
        start_rotation: f32,
    },
    Marquee {
        start: Point,
        current: Point,
        additive: bool,
        prior: Vec<LayerId>,
        dragged: bool,
    },
    DrawShape {
        kind: ShapeKind,
        start: Point,
        current: Point,
    },
}

fn bearing_degrees(center: Point, p: Point) -> f32 {
    (p.y - center.y).atan2(p.x - center.x).to_degrees()
}

/// Rectangle for a shape drag: Shift forces equal sides, Alt treats
/// `start` as the center.
pub fn shape_rect(start: Point, current: Point, mods: Modifiers) -> Rect {
    let mut dx = current.x - start.x;
    let mut dy = current.y - start.y;
    if mods.shift {
        let side = dx.abs().max(dy.abs());
        dx = side.copysign(dx);
        dy = side.copysign(dy);
    }
    if mods.alt {
        Rect::new(start.x - dx.abs(), start.y - dy.abs(), dx.abs() * 2.0, dy.abs() * 2.0)
    } else {
        Rect::from_points(start, Point::new(start.x + dx, start.y + dy))
    }
}

/// Scale `start_box` by dragging `handle` by `delta`.  Shift keeps the
/// aspect ratio (the dragged axis decides, or the larger change for a
/// corner); Alt scales about the center.
pub fn resized_box(start_box: Rect, handle: Handle, delta: Point, mods: Modifiers) -> Rect {
    let (sx, sy) = handle.sides();
    let w = start_box.width.max(MIN_LAYER_SIZE);
    let h = start_box.height.max(MIN_LAYER_SIZE);
    let from_center = mods.alt;

    let grow = |side: i8, d: f32, size: f32| match side {
        0 => size,
        s => {
            let d = d * s as f32;
            if from_center { size + 2.0 * d } else { size + d }
        }
    };
    let mut nw = grow(sx, delta.x, w);
    let mut nh = grow(sy, delta.y, h);

    if mods.shift {
        let (kx, ky) = (nw / w, nh / h);
        let k = if sx == 0 {
            ky
        } else if sy == 0 || (kx - 1.0).abs() >= (ky - 1.0).abs() {
            kx
        } else {
            ky
        };
        nw = w * k;
        nh = h * k;
    }
    nw = nw.max(MIN_LAYER_SIZE);
    nh = nh.max(MIN_LAYER_SIZE);

    let place = |side: i8, min: f32, size: f32, new_size: f32| {
        if from_center || side == 0 {
            min + (size - new_size) * 0.5
        } else if side < 0 {
            min + size - new_size
        } else {
            min
        }
    };
    Rect::new(place(sx, start_box.x, w, nw), place(sy, start_box.y, h, nh), nw, nh)
}

/// Map `r` from `from` box space into `to` box space.
fn map_rect(r: &Rect, from: &Rect, to: &Rect) -> Rect {
    let kx = if from.width > 0.0 { to.width / from.width } else { 1.0 };
    let ky = if from.height > 0.0 { to.height / from.height } else { 1.0 };
    Rect::new(
        to.x + (r.x - from.x) * kx,
        to.y + (r.y - from.y) * ky,
        r.width * kx,
        r.height * ky,
    )
}

/// Pointer-driven move/resize/rotate/marquee/draw controller.
#[derive(Clone, Debug, Default)]
pub struct InteractionController {
    pub viewport: Viewport,
    tool: Tool,
    gesture: Gesture,
    guides: Vec<Guide>,
}

impl InteractionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    /// Ignored while a gesture is running.
    pub fn set_tool(&mut self, tool: Tool) -> bool {
        if !self.is_idle() {
            return false;
        }
        self.tool = tool;
        true
    }

    pub fn gesture(&self) -> &Gesture {
        &self.gesture
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.gesture, Gesture::Idle)
    }

    pub fn guides(&self) -> &[Guide] {
        &self.guides
    }

    /// Marquee rectangle being dragged, for overlay drawing.
    pub fn marquee_rect(&self) -> Option<Rect> {
        match &self.gesture {
            Gesture::Marquee { start, current, dragged: true, .. } => Some(Rect::from_points(*start, *current)),
            _ => None,
        }
    }

    /// Handle under `screen` for cursor feedback.
    pub fn hover_handle(&self, session: &DocumentSession, screen: Point) -> Option<Handle> {
        self.handle_at(session, self.viewport.screen_to_canvas(screen))
    }

    /// Abort the current gesture, reverting its live edits.
    pub fn cancel(&mut self, session: &mut DocumentSession) -> Vec<Effect> {
        let mut fx = Vec::new();
        if !self.is_idle() {
            self.gesture = Gesture::Idle;
            session.cancel_gesture();
            fx.push(Effect::Redraw);
        }
        self.set_guides(Vec::new(), &mut fx);
        fx
    }

    pub fn dispatch(&mut self, session: &mut DocumentSession, event: PointerEvent) -> Vec<Effect> {
        let mut fx = Vec::new();
        let pos = self.viewport.screen_to_canvas(event.position());
        let mods = event.modifiers();
        let gesture = std::mem::take(&mut self.gesture);

        self.gesture = match event {
            PointerEvent::Down { .. } => match gesture {
                Gesture::Idle => self.begin(session, pos, mods, &mut fx),
                active => active,
            },
            PointerEvent::Move { .. } => self.update(session, gesture, pos, mods, &mut fx),
            PointerEvent::Up { .. } => {
                let gesture = self.update(session, gesture, pos, mods, &mut fx);
                self.finish(session, gesture, pos, mods, &mut fx);
                Gesture::Idle
            }
        };
        fx
    }

    // ========================================================================
    // POINTER DOWN
    // ========================================================================

    fn begin(&mut self, session: &mut DocumentSession, pos: Point, mods: Modifiers, fx: &mut Vec<Effect>) -> Gesture {
        if let Tool::DrawShape(kind) = self.tool {
            session.begin_gesture();
            return Gesture::DrawShape { kind, start: pos, current: pos };
        }

        if let Some(handle) = self.handle_at(session, pos) {
            if let Some(g) = self.begin_handle(session, handle, pos) {
                session.begin_gesture();
                return g;
            }
        }

        match session.canvas().hit_test(pos) {
            Some(id) => {
                if mods.shift {
                    session.toggle_layer_selection(id);
                    fx.push(Effect::SelectionChanged);
                    fx.push(Effect::Redraw);
                    if !session.canvas().is_selected(id) {
                        return Gesture::Idle;
                    }
                } else if !session.canvas().is_selected(id) {
                    session.select_layers(&[id]);
                    fx.push(Effect::SelectionChanged);
                    fx.push(Effect::Redraw);
                }
                let origins: Vec<(LayerId, Point)> = session
                    .canvas()
                    .selected_layers()
                    .into_iter()
                    .filter(|l| !l.locked)
                    .map(|l| (l.id, Point::new(l.x, l.y)))
                    .collect();
                let ids: Vec<LayerId> = origins.iter().map(|(id, _)| *id).collect();
                let Some(start_box) = session.bounding_box_of(&ids) else {
                    return Gesture::Idle;
                };
                session.begin_gesture();
                Gesture::Move {
                    start: pos,
                    start_box,
                    origins,
                    axis_lock: None,
                    pending_duplicate: mods.alt,
                    moved: false,
                }
            }
            None => {
                let prior = if mods.shift { session.selected().to_vec() } else { Vec::new() };
                session.begin_gesture();
                Gesture::Marquee { start: pos, current: pos, additive: mods.shift, prior, dragged: false }
            }
        }
    }

    /// Unlocked selected layers, the only ones handles act on.
    fn handle_targets<'s>(session: &'s DocumentSession) -> Vec<&'s Layer> {
        session.canvas().selected_layers().into_iter().filter(|l| !l.locked).collect()
    }

    fn rotate_handle_position(&self, layer: &Layer) -> Point {
        let center = layer.center();
        let top_mid = Point::new(center.x, layer.y).rotate_about(center, layer.rotation);
        let up = Point::new(center.x, center.y - 1.0).rotate_about(center, layer.rotation) - center;
        top_mid + up * self.viewport.canvas_len(ROTATE_HANDLE_OFFSET)
    }

    fn handle_at(&self, session: &DocumentSession, pos: Point) -> Option<Handle> {
        if !matches!(self.tool, Tool::Select) {
            return None;
        }
        let targets = Self::handle_targets(session);
        if targets.is_empty() {
            return None;
        }
        let radius = self.viewport.canvas_len(HANDLE_HIT_RADIUS);
        if let [single] = targets.as_slice() {
            if self.rotate_handle_position(single).distance(pos) <= radius {
                return Some(Handle::Rotate);
            }
        }
        let ids: Vec<LayerId> = targets.iter().map(|l| l.id).collect();
        let bounds = session.bounding_box_of(&ids)?;
        Handle::RESIZE.into_iter().find(|h| h.position(&bounds).distance(pos) <= radius)
    }

    fn begin_handle(&self, session: &DocumentSession, handle: Handle, pos: Point) -> Option<Gesture> {
        let targets = Self::handle_targets(session);
        if handle == Handle::Rotate {
            let [layer] = targets.as_slice() else { return None };
            let center = layer.center();
            return Some(Gesture::Rotate {
                id: layer.id,
                center,
                start_bearing: bearing_degrees(center, pos),
                start_rotation: layer.rotation,
            });
        }
        let originals: Vec<(LayerId, Rect)> = targets.iter().map(|l| (l.id, l.rect())).collect();
        let ids: Vec<LayerId> = originals.iter().map(|(id, _)| *id).collect();
        let start_box = session.bounding_box_of(&ids)?;
        Some(Gesture::Resize { handle, start: pos, start_box, originals })
    }

    // ========================================================================
    // POINTER MOVE
    // ========================================================================

    fn update(
        &mut self,
        session: &mut DocumentSession,
        gesture: Gesture,
        pos: Point,
        mods: Modifiers,
        fx: &mut Vec<Effect>,
    ) -> Gesture {
        match gesture {
            Gesture::Idle => Gesture::Idle,
            Gesture::Move { start, start_box, mut origins, mut axis_lock, mut pending_duplicate, mut moved } => {
                let delta = pos - start;
                if !moved {
                    let travel = delta.x.hypot(delta.y) * self.viewport.zoom;
                    if travel < session.settings().drag_threshold {
                        return Gesture::Move { start, start_box, origins, axis_lock, pending_duplicate, moved };
                    }
                    moved = true;
                }

                if pending_duplicate {
                    pending_duplicate = false;
                    let ids: Vec<LayerId> = origins.iter().map(|(id, _)| *id).collect();
                    let copies = session.duplicate_in_place(&ids);
                    for ((id, _), copy) in origins.iter_mut().zip(&copies) {
                        *id = *copy;
                    }
                    fx.extend(copies.iter().map(|id| Effect::LayerCreated(*id)));
                    fx.push(Effect::SelectionChanged);
                }

                if mods.shift && axis_lock.is_none() {
                    let threshold = self.viewport.canvas_len(session.settings().axis_lock_threshold);
                    if delta.x.abs().max(delta.y.abs()) > threshold {
                        axis_lock = Some(if delta.x.abs() >= delta.y.abs() { Axis::X } else { Axis::Y });
                    } else {
                        return Gesture::Move { start, start_box, origins, axis_lock, pending_duplicate, moved };
                    }
                }

                let (mut dx, mut dy) = match axis_lock {
                    Some(Axis::X) => (delta.x, 0.0),
                    Some(Axis::Y) => (0.0, delta.y),
                    None => (delta.x, delta.y),
                };

                if !mods.alt {
                    let edges = SnapEdges {
                        x: [axis_lock != Some(Axis::Y); 3],
                        y: [axis_lock != Some(Axis::X); 3],
                    };
                    let exclude: Vec<LayerId> = origins.iter().map(|(id, _)| *id).collect();
                    let moving = start_box.translated(dx, dy);
                    let snap = self.snap(session, moving, &exclude, edges);
                    dx += snap.dx;
                    dy += snap.dy;
                    let grid = &session.canvas().settings.grid;
                    if grid.snap {
                        if edges.any(Axis::X) && !snap.has_guide(Axis::X) {
                            dx = snap_to_grid(start_box.x + dx, grid.size) - start_box.x;
                        }
                        if edges.any(Axis::Y) && !snap.has_guide(Axis::Y) {
                            dy = snap_to_grid(start_box.y + dy, grid.size) - start_box.y;
                        }
                    }
                    self.set_guides(snap.guides, fx);
                } else {
                    self.set_guides(Vec::new(), fx);
                }

                let updates: Vec<(LayerId, LayerPatch)> = origins
                    .iter()
                    .map(|(id, o)| (*id, LayerPatch::position(o.x + dx, o.y + dy)))
                    .collect();
                if let Err(e) = session.update_layers(&updates, false) {
                    crate::log_warn!("Move aborted: {}", e);
                }
                fx.push(Effect::Redraw);
                Gesture::Move { start, start_box, origins, axis_lock, pending_duplicate, moved }
            }
            Gesture::Resize { handle, start, start_box, originals } => {
                let mut target = resized_box(start_box, handle, pos - start, mods);
                if !mods.alt && !mods.shift {
                    target = self.snap_resize(session, target, handle, &originals, fx);
                } else {
                    self.set_guides(Vec::new(), fx);
                }
                let updates: Vec<(LayerId, LayerPatch)> = originals
                    .iter()
                    .map(|(id, r)| (*id, LayerPatch::geometry(map_rect(r, &start_box, &target))))
                    .collect();
                if let Err(e) = session.update_layers(&updates, false) {
                    crate::log_warn!("Resize aborted: {}", e);
                }
                fx.push(Effect::Redraw);
                Gesture::Resize { handle, start, start_box, originals }
            }
            Gesture::Rotate { id, center, start_bearing, start_rotation } => {
                let mut rotation = start_rotation + (bearing_degrees(center, pos) - start_bearing);
                if mods.shift {
                    let step = session.settings().rotate_snap_degrees;
                    if step > 0.0 {
                        rotation = (rotation / step).round() * step;
                    }
                }
                if let Err(e) = session.update_layer(id, LayerPatch::rotation(rotation), false) {
                    crate::log_warn!("Rotate aborted: {}", e);
                }
                fx.push(Effect::Redraw);
                Gesture::Rotate { id, center, start_bearing, start_rotation }
            }
            Gesture::Marquee { start, additive, prior, mut dragged, .. } => {
                let current = pos;
                let travel = (current - start).x.hypot((current - start).y) * self.viewport.zoom;
                if travel >= session.settings().drag_threshold {
                    dragged = true;
                }
                if dragged {
                    let area = Rect::from_points(start, current);
                    let mut ids = prior.clone();
                    ids.extend(
                        session
                            .canvas()
                            .layers()
                            .iter()
                            .filter(|l| l.visible && !l.locked && l.bounds().intersects(&area))
                            .map(|l| l.id)
                            .filter(|id| !prior.contains(id)),
                    );
                    if ids.as_slice() != session.selected() {
                        session.select_layers(&ids);
                        fx.push(Effect::SelectionChanged);
                    }
                    fx.push(Effect::Redraw);
                }
                Gesture::Marquee { start, current, additive, prior, dragged }
            }
            Gesture::DrawShape { kind, start, .. } => {
                fx.push(Effect::Redraw);
                Gesture::DrawShape { kind, start, current: pos }
            }
        }
    }

    fn snap(&self, session: &DocumentSession, moving: Rect, exclude: &[LayerId], edges: SnapEdges) -> SnapResult {
        let canvas = session.canvas();
        if !canvas.settings.guides.enabled {
            return SnapResult::default();
        }
        let targets: Vec<Rect> = canvas
            .layers()
            .iter()
            .filter(|l| l.visible && !exclude.contains(&l.id))
            .map(|l| l.bounds())
            .collect();
        let threshold = self.viewport.canvas_len(session.settings().snap_threshold);
        snap_rect(moving, &targets, canvas.settings.bounds(), threshold, edges)
    }

    /// Snap the dragged edges of a resize box, with grid fallback.
    fn snap_resize(
        &mut self,
        session: &DocumentSession,
        mut target: Rect,
        handle: Handle,
        originals: &[(LayerId, Rect)],
        fx: &mut Vec<Effect>,
    ) -> Rect {
        let (sx, sy) = handle.sides();
        let edge_mask = |side: i8| [side < 0, false, side > 0];
        let edges = SnapEdges { x: edge_mask(sx), y: edge_mask(sy) };
        let exclude: Vec<LayerId> = originals.iter().map(|(id, _)| *id).collect();
        let snap = self.snap(session, target, &exclude, edges);

        let grid = session.canvas().settings.grid.clone();
        let grid_x = grid.snap && !snap.has_guide(Axis::X);
        let grid_y = grid.snap && !snap.has_guide(Axis::Y);

        let move_edge = |side: i8, min: &mut f32, size: &mut f32, d: f32, use_grid: bool| {
            let max = *min + *size;
            match side {
                s if s < 0 => {
                    let mut edge = *min + d;
                    if use_grid {
                        edge = snap_to_grid(edge, grid.size);
                    }
                    let edge = edge.min(max - MIN_LAYER_SIZE);
                    *size = max - edge;
                    *min = edge;
                }
                s if s > 0 => {
                    let mut edge = max + d;
                    if use_grid {
                        edge = snap_to_grid(edge, grid.size);
                    }
                    *size = (edge - *min).max(MIN_LAYER_SIZE);
                }
                _ => {}
            }
        };
        move_edge(sx, &mut target.x, &mut target.width, snap.dx, grid_x);
        move_edge(sy, &mut target.y, &mut target.height, snap.dy, grid_y);

        self.set_guides(snap.guides, fx);
        target
    }

    fn set_guides(&mut self, guides: Vec<Guide>, fx: &mut Vec<Effect>) {
        if guides != self.guides {
            self.guides = guides;
            fx.push(Effect::GuidesChanged);
        }
    }

    // ========================================================================
    // POINTER UP
    // ========================================================================

    fn finish(
        &mut self,
        session: &mut DocumentSession,
        gesture: Gesture,
        pos: Point,
        mods: Modifiers,
        fx: &mut Vec<Effect>,
    ) {
        self.set_guides(Vec::new(), fx);
        match gesture {
            Gesture::Idle => {}
            Gesture::Move { .. } => {
                if session.end_gesture("Move Layers") {
                    fx.push(Effect::Committed);
                }
            }
            Gesture::Resize { .. } => {
                if session.end_gesture("Resize Layers") {
                    fx.push(Effect::Committed);
                }
            }
            Gesture::Rotate { .. } => {
                if session.end_gesture("Rotate Layer") {
                    fx.push(Effect::Committed);
                }
            }
            Gesture::Marquee { additive, dragged, .. } => {
                if !dragged && !additive && !session.selected().is_empty() {
                    session.clear_selection();
                    fx.push(Effect::SelectionChanged);
                    fx.push(Effect::Redraw);
                }
                session.end_gesture("Select");
            }
            Gesture::DrawShape { kind, start, .. } => {
                session.end_gesture("Draw Shape");
                let rect = shape_rect(start, pos, mods);
                if rect.width < MIN_LAYER_SIZE || rect.height < MIN_LAYER_SIZE {
                    fx.push(Effect::Redraw);
                    return;
                }
                let fill = session.settings().shape_fill;
                let id = session.add_layer(Layer::shape(kind, rect, fill));
                fx.push(Effect::LayerCreated(id));
                fx.push(Effect::SelectionChanged);
                fx.push(Effect::Committed);
                fx.push(Effect::Redraw);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{CanvasSettings, Color};
    use crate::settings::EditorSettings;

    fn session() -> DocumentSession {
        DocumentSession::new(CanvasSettings::new(1000, 1000), EditorSettings::default())
    }

    fn add(s: &mut DocumentSession, r: Rect) -> LayerId {
        s.add_layer(Layer::shape(ShapeKind::Rectangle, r, Color::BLACK))
    }

    fn down(x: f32, y: f32, mods: Modifiers) -> PointerEvent {
        PointerEvent::Down { pos: Point::new(x, y), mods }
    }
    fn mv(x: f32, y: f32, mods: Modifiers) -> PointerEvent {
        PointerEvent::Move { pos: Point::new(x, y), mods }
    }
    fn up(x: f32, y: f32, mods: Modifiers) -> PointerEvent {
        PointerEvent::Up { pos: Point::new(x, y), mods }
    }

    #[test]
    fn viewport_round_trip() {
        let v = Viewport { pan: Point::new(10.0, 20.0), zoom: 2.0 };
        let c = v.screen_to_canvas(Point::new(30.0, 60.0));
        assert_eq!(c, Point::new(10.0, 20.0));
        assert_eq!(v.canvas_to_screen(c), Point::new(30.0, 60.0));
    }

    #[test]
    fn click_selects_and_drag_moves_with_one_commit() {
        let mut s = session();
        let id = add(&mut s, Rect::new(303.0, 307.0, 50.0, 50.0));
        s.clear_selection();
        let mut c = InteractionController::new();
        let before = s.history().len();

        let fx = c.dispatch(&mut s, down(320.0, 320.0, Modifiers::NONE));
        assert!(fx.contains(&Effect::SelectionChanged));
        c.dispatch(&mut s, mv(330.0, 320.0, Modifiers::NONE));
        c.dispatch(&mut s, mv(340.0, 320.0, Modifiers::NONE));
        let fx = c.dispatch(&mut s, up(340.0, 320.0, Modifiers::NONE));
        assert!(fx.contains(&Effect::Committed));
        assert_eq!(s.layer(id).unwrap().x, 323.0);
        assert_eq!(s.history().len(), before + 1);
        assert!(c.is_idle());
    }

    #[test]
    fn down_during_gesture_is_ignored() {
        let mut s = session();
        add(&mut s, Rect::new(303.0, 307.0, 50.0, 50.0));
        let mut c = InteractionController::new();
        c.dispatch(&mut s, down(320.0, 320.0, Modifiers::NONE));
        let g = c.gesture().clone();
        assert!(c.dispatch(&mut s, down(900.0, 900.0, Modifiers::NONE)).is_empty());
        assert_eq!(c.gesture(), &g);
    }

    #[test]
    fn alt_click_without_drag_does_not_duplicate() {
        let mut s = session();
        add(&mut s, Rect::new(303.0, 307.0, 50.0, 50.0));
        let mut c = InteractionController::new();
        c.dispatch(&mut s, down(320.0, 320.0, Modifiers::ALT));
        c.dispatch(&mut s, mv(321.0, 320.0, Modifiers::ALT));
        c.dispatch(&mut s, up(321.0, 320.0, Modifiers::ALT));
        assert_eq!(s.canvas().layers().len(), 1);
    }

    #[test]
    fn alt_drag_moves_a_duplicate() {
        let mut s = session();
        let original = add(&mut s, Rect::new(303.0, 307.0, 50.0, 50.0));
        let mut c = InteractionController::new();
        c.dispatch(&mut s, down(320.0, 320.0, Modifiers::ALT));
        let fx = c.dispatch(&mut s, mv(420.0, 320.0, Modifiers::ALT));
        assert!(fx.iter().any(|e| matches!(e, Effect::LayerCreated(_))));
        c.dispatch(&mut s, up(420.0, 320.0, Modifiers::ALT));
        assert_eq!(s.canvas().layers().len(), 2);
        assert_eq!(s.layer(original).unwrap().x, 303.0);
        let copy = s.selected()[0];
        assert_ne!(copy, original);
        assert_eq!(s.layer(copy).unwrap().x, 403.0);
    }

    #[test]
    fn shift_locks_axis_for_whole_gesture() {
        let mut s = session();
        let id = add(&mut s, Rect::new(303.0, 307.0, 50.0, 50.0));
        s.clear_selection();
        let mut c = InteractionController::new();
        c.dispatch(&mut s, down(320.0, 320.0, Modifiers::SHIFT));
        c.dispatch(&mut s, mv(330.0, 323.0, Modifiers::SHIFT));
        c.dispatch(&mut s, mv(331.0, 390.0, Modifiers::NONE));
        c.dispatch(&mut s, up(331.0, 390.0, Modifiers::NONE));
        let l = s.layer(id).unwrap();
        assert_eq!((l.x, l.y), (314.0, 307.0));
    }

    #[test]
    fn snaps_to_neighbour_edge() {
        let mut s = session();
        let anchor = add(&mut s, Rect::new(103.0, 607.0, 100.0, 50.0));
        let moving = add(&mut s, Rect::new(303.0, 307.0, 50.0, 50.0));
        let mut c = InteractionController::new();
        c.dispatch(&mut s, down(320.0, 320.0, Modifiers::NONE));
        // left edge lands at 195, 8 from the anchor's right edge at 203
        let fx = c.dispatch(&mut s, mv(212.0, 320.0, Modifiers::NONE));
        assert!(fx.contains(&Effect::GuidesChanged));
        assert_eq!(s.layer(moving).unwrap().x, 203.0);
        assert!(c.guides().iter().any(|g| g.axis == Axis::X && g.position == 203.0));
        assert_eq!(s.layer(anchor).unwrap().rect(), Rect::new(103.0, 607.0, 100.0, 50.0));
        c.dispatch(&mut s, up(212.0, 320.0, Modifiers::NONE));
        assert!(c.guides().is_empty());
    }

    #[test]
    fn resize_from_corner_and_rotate_with_snap() {
        let mut s = session();
        let id = add(&mut s, Rect::new(303.0, 307.0, 100.0, 50.0));
        let mut c = InteractionController::new();
        // bottom-right handle at (403, 357)
        c.dispatch(&mut s, down(403.0, 357.0, Modifiers::NONE));
        assert!(matches!(c.gesture(), Gesture::Resize { handle: Handle::BottomRight, .. }));
        c.dispatch(&mut s, up(503.0, 382.0, Modifiers::SHIFT));
        let l = s.layer(id).unwrap();
        assert_eq!((l.x, l.y, l.width, l.height), (303.0, 307.0, 200.0, 100.0));

        // rotate handle sits 24 px above the top edge center (403, 307)
        c.dispatch(&mut s, down(403.0, 283.0, Modifiers::NONE));
        assert!(matches!(c.gesture(), Gesture::Rotate { .. }));
        c.dispatch(&mut s, up(503.0, 353.0, Modifiers::SHIFT));
        assert_eq!(s.layer(id).unwrap().rotation, 90.0);
    }

    #[test]
    fn marquee_selects_and_empty_click_clears() {
        let mut s = session();
        let a = add(&mut s, Rect::new(100.0, 100.0, 50.0, 50.0));
        // Outside the marquee.
        add(&mut s, Rect::new(300.0, 100.0, 50.0, 50.0));
        let locked = add(&mut s, Rect::new(120.0, 200.0, 50.0, 50.0));
        s.update_layer(locked, LayerPatch { locked: Some(true), ..LayerPatch::default() }, true).unwrap();
        s.clear_selection();
        let mut c = InteractionController::new();
        c.dispatch(&mut s, down(90.0, 90.0, Modifiers::NONE));
        c.dispatch(&mut s, mv(200.0, 260.0, Modifiers::NONE));
        c.dispatch(&mut s, up(200.0, 260.0, Modifiers::NONE));
        assert_eq!(s.selected(), &[a]);

        c.dispatch(&mut s, down(600.0, 600.0, Modifiers::NONE));
        let fx = c.dispatch(&mut s, up(600.0, 600.0, Modifiers::NONE));
        assert!(fx.contains(&Effect::SelectionChanged));
        assert!(s.selected().is_empty());
    }

    #[test]
    fn draw_square_from_center() {
        let mut s = session();
        let mut c = InteractionController::new();
        assert!(c.set_tool(Tool::DrawShape(ShapeKind::Ellipse)));
        let both = Modifiers { shift: true, alt: true, ctrl: false };
        c.dispatch(&mut s, down(500.0, 500.0, both));
        c.dispatch(&mut s, mv(520.0, 510.0, both));
        let fx = c.dispatch(&mut s, up(520.0, 510.0, both));
        let Some(Effect::LayerCreated(id)) = fx.iter().find(|e| matches!(e, Effect::LayerCreated(_))).copied() else {
            panic!("no layer created");
        };
        assert_eq!(s.layer(id).unwrap().rect(), Rect::new(480.0, 480.0, 40.0, 40.0));
    }

    #[test]
    fn shape_rect_variants() {
        let r = shape_rect(Point::new(10.0, 10.0), Point::new(0.0, 30.0), Modifiers::NONE);
        assert_eq!(r, Rect::new(0.0, 10.0, 10.0, 20.0));
        let r = shape_rect(Point::new(10.0, 10.0), Point::new(0.0, 30.0), Modifiers::SHIFT);
        assert_eq!(r, Rect::new(-10.0, 10.0, 20.0, 20.0));
    }
}

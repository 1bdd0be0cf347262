//! End-to-end behaviour of a document session: geometry, history, selection
//! masks, arrangement, blending, merge, interaction and AI jobs.

use std::sync::{Arc, Mutex, mpsc};
use std::time::{Duration, Instant};

use composefe::canvas::{BlendMode, CanvasSettings, Color, Layer, LayerContent, LayerId, LayerPatch, ShapeKind};
use composefe::components::tools::{InteractionController, Modifiers, PointerEvent};
use composefe::compositor::{RenderResources, render};
use composefe::geometry::{Axis, Point, Rect, rotated_bounding_box};
use composefe::io::GallerySink;
use composefe::ops::ai::{AiError, AiOutcome, AiRequest, AiTarget, AiTransform, CancelToken};
use composefe::ops::canvas_ops::Alignment;
use composefe::project::DocumentSession;
use composefe::selection::{Selection, SelectionMode};
use composefe::settings::EditorSettings;
use image::RgbaImage;

fn session(w: u32, h: u32) -> DocumentSession {
    DocumentSession::new(CanvasSettings::new(w, h), EditorSettings::default())
}

fn rect_layer(s: &mut DocumentSession, r: Rect, fill: Color) -> LayerId {
    s.add_layer(Layer::shape(ShapeKind::Rectangle, r, fill))
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-3
}

#[derive(Default)]
struct CollectGallery(Vec<RgbaImage>);

impl GallerySink for CollectGallery {
    fn add_result(&mut self, image: &RgbaImage) {
        self.0.push(image.clone());
    }
}

// ============================================================
// Geometry
// ============================================================

#[test]
fn quarter_turn_bounding_box() {
    let b = rotated_bounding_box(std::iter::once((Rect::new(10.0, 10.0, 100.0, 50.0), 90.0))).unwrap();
    assert!(close(b.x, 35.0) && close(b.y, -15.0), "{:?}", b);
    assert!(close(b.width, 50.0) && close(b.height, 100.0), "{:?}", b);
}

// ============================================================
// History
// ============================================================

#[test]
fn undo_redo_walks_back_and_forth() {
    let mut s = session(200, 200);
    assert!(!s.undo());
    assert!(!s.redo());

    let a = rect_layer(&mut s, Rect::new(0.0, 0.0, 10.0, 10.0), Color::BLACK);
    s.update_layer(a, LayerPatch::position(40.0, 0.0), true).unwrap();
    assert!(s.undo());
    assert_eq!(s.layer(a).unwrap().x, 0.0);
    assert!(s.undo());
    assert!(s.layer(a).is_none());
    assert!(!s.undo());

    assert!(s.redo());
    assert!(s.redo());
    assert_eq!(s.layer(a).unwrap().x, 40.0);
    assert!(!s.redo());
}

#[test]
fn identical_commits_are_deduplicated() {
    let mut s = session(200, 200);
    let a = rect_layer(&mut s, Rect::new(5.0, 5.0, 10.0, 10.0), Color::BLACK);
    let len = s.history().len();
    assert!(!s.commit("Nothing"));
    s.update_layer(a, LayerPatch::position(5.0, 5.0), true).unwrap();
    assert_eq!(s.history().len(), len);
}

// ============================================================
// Pixel selection
// ============================================================

#[test]
fn rect_selection_and_its_inverse_are_complements() {
    let mut sel = Selection::new();
    let r = Rect::new(2.0, 2.0, 4.0, 3.0);
    assert!(sel.apply(SelectionMode::Replace, r.corners().to_vec()));
    let mask = sel.coverage(10, 10);
    for (x, y, p) in mask.enumerate_pixels() {
        let inside = (2..6).contains(&x) && (2..5).contains(&y);
        assert_eq!(p[0], if inside { 255 } else { 0 }, "({}, {})", x, y);
    }

    sel.invert();
    let inv = sel.coverage(10, 10);
    for (a, b) in mask.pixels().zip(inv.pixels()) {
        assert_eq!(a[0] as u16 + b[0] as u16, 255);
    }
}

// ============================================================
// Arrangement
// ============================================================

#[test]
fn align_left_three_layers() {
    let mut s = session(500, 500);
    let a = rect_layer(&mut s, Rect::new(40.0, 0.0, 10.0, 10.0), Color::BLACK);
    let b = rect_layer(&mut s, Rect::new(25.0, 50.0, 30.0, 10.0), Color::BLACK);
    let c = rect_layer(&mut s, Rect::new(90.0, 100.0, 20.0, 10.0), Color::BLACK);
    s.select_layers(&[a, b, c]);
    let len = s.history().len();
    assert!(s.align(Alignment::Left));
    for id in [a, b, c] {
        assert_eq!(s.layer(id).unwrap().x, 25.0);
    }
    assert_eq!(s.history().len(), len + 1);
}

#[test]
fn distribute_and_scale_equalizes_heights() {
    let mut s = session(1000, 1000);
    let a = rect_layer(&mut s, Rect::new(0.0, 0.0, 100.0, 100.0), Color::BLACK);
    let b = rect_layer(&mut s, Rect::new(200.0, 0.0, 100.0, 200.0), Color::BLACK);
    let c = rect_layer(&mut s, Rect::new(400.0, 0.0, 100.0, 150.0), Color::BLACK);
    s.select_layers(&[a, b, c]);
    assert!(s.distribute_and_scale(Axis::X));
    let gap = s.settings().distribute_gap;

    let (la, lb, lc) = (s.layer(a).unwrap(), s.layer(b).unwrap(), s.layer(c).unwrap());
    for l in [la, lb, lc] {
        assert!(close(l.height, 150.0));
        assert!(close(l.y, 0.0));
    }
    assert!(close(la.width, 150.0) && close(lb.width, 75.0) && close(lc.width, 100.0));
    assert!(close(la.x, 0.0));
    assert!(close(lb.x, 150.0 + gap));
    assert!(close(lc.x, 225.0 + 2.0 * gap));
}

// ============================================================
// Compositing
// ============================================================

#[test]
fn multiply_at_half_opacity() {
    let mut s = session(10, 10);
    rect_layer(&mut s, Rect::new(0.0, 0.0, 10.0, 10.0), Color::rgb(255, 200, 0));
    let top = rect_layer(&mut s, Rect::new(0.0, 0.0, 10.0, 10.0), Color::rgb(128, 128, 128));
    let patch = LayerPatch { opacity: Some(50.0), blend_mode: Some(BlendMode::Multiply), ..LayerPatch::default() };
    s.update_layer(top, patch, true).unwrap();

    let out = s.flatten(1.0);
    let p = out.get_pixel(5, 5).0;
    // base * (1 - 0.5) + (base * 128 / 255) * 0.5
    let expect = |base: f32| base * 0.5 + base * (128.0 / 255.0) * 0.5;
    assert!((p[0] as f32 - expect(255.0)).abs() <= 1.0, "{:?}", p);
    assert!((p[1] as f32 - expect(200.0)).abs() <= 1.0, "{:?}", p);
    assert_eq!((p[2], p[3]), (0, 255));
}

#[test]
fn merge_matches_direct_render() {
    let mut s = session(200, 200);
    let a = rect_layer(&mut s, Rect::new(10.0, 10.0, 40.0, 30.0), Color::rgb(255, 0, 0));
    let b = rect_layer(&mut s, Rect::new(30.0, 20.0, 40.0, 40.0), Color::rgba(0, 0, 255, 128));
    let other = rect_layer(&mut s, Rect::new(150.0, 150.0, 10.0, 10.0), Color::BLACK);

    let sources: Vec<Layer> = [b, a].iter().map(|id| s.layer(*id).unwrap().clone()).collect();
    let bounds = s.bounding_box_of(&[a, b]).unwrap();
    let expected = render(
        &sources,
        bounds,
        None,
        RenderResources { bitmaps: s.bitmaps(), fonts: &s.fonts },
        1.0,
    );

    s.select_layers(&[a, b]);
    let merged = s.merge_selected().unwrap();
    assert_eq!(s.selected(), &[merged]);
    assert!(s.layer(a).is_none() && s.layer(b).is_none());
    assert!(s.layer(other).is_some());

    let layer = s.layer(merged).unwrap();
    assert_eq!(layer.rect(), Rect::new(10.0, 10.0, 60.0, 50.0));
    let LayerContent::Image(img) = &layer.content else { panic!("merge produced {:?}", layer.content) };
    assert_eq!(**s.bitmaps().get(&img.source).unwrap(), expected);
}

// ============================================================
// Interaction
// ============================================================

#[test]
fn shift_drag_locks_to_dominant_axis() {
    let mut s = session(1000, 1000);
    let id = rect_layer(&mut s, Rect::new(303.0, 307.0, 50.0, 50.0), Color::BLACK);
    s.clear_selection();
    let mut c = InteractionController::new();
    let at = |x: f32, y: f32| Point::new(x, y);

    c.dispatch(&mut s, PointerEvent::Down { pos: at(320.0, 320.0), mods: Modifiers::SHIFT });
    c.dispatch(&mut s, PointerEvent::Move { pos: at(320.0, 331.0), mods: Modifiers::SHIFT });
    c.dispatch(&mut s, PointerEvent::Move { pos: at(377.0, 333.0), mods: Modifiers::SHIFT });
    c.dispatch(&mut s, PointerEvent::Up { pos: at(377.0, 333.0), mods: Modifiers::SHIFT });

    let l = s.layer(id).unwrap();
    assert_eq!((l.x, l.y), (303.0, 320.0));
}

// ============================================================
// AI jobs
// ============================================================

#[test]
fn cancelled_ai_job_leaves_document_untouched() {
    let mut s = session(100, 100);
    let id = rect_layer(&mut s, Rect::new(0.0, 0.0, 10.0, 10.0), Color::BLACK);
    let before = s.layer(id).unwrap().clone();
    let len = s.history().len();

    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let gate = Mutex::new(gate_rx);
    let done = Mutex::new(done_tx);
    let adapter: Arc<dyn AiTransform> = Arc::new(move |_: AiRequest, cancel: &CancelToken| -> Result<Vec<RgbaImage>, AiError> {
        let _ = gate.lock().map(|rx| rx.recv_timeout(Duration::from_secs(5)));
        let _ = done.lock().map(|tx| tx.send(()));
        if cancel.is_cancelled() {
            Err(AiError::Cancelled)
        } else {
            Ok(vec![RgbaImage::new(4, 4)])
        }
    });

    let token = s.request_ai_edit(adapter, id, "make it red", AiTarget::ReplaceLayer(id)).unwrap();
    assert!(s.cancel_ai(token));
    gate_tx.send(()).unwrap();
    done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let mut gallery = CollectGallery::default();
    assert!(s.poll_ai(&mut gallery).is_empty());
    assert!(s.ai_idle());
    assert_eq!(s.layer(id).unwrap(), &before);
    assert_eq!(s.history().len(), len);
    assert!(gallery.0.is_empty());
}

#[test]
fn failed_ai_job_is_reported_and_changes_nothing() {
    let mut s = session(100, 100);
    let id = rect_layer(&mut s, Rect::new(0.0, 0.0, 10.0, 10.0), Color::BLACK);
    let before = s.layer(id).unwrap().clone();
    let len = s.history().len();

    let adapter: Arc<dyn AiTransform> = Arc::new(|_: AiRequest, _: &CancelToken| -> Result<Vec<RgbaImage>, AiError> {
        Err(AiError::Failed("quota exceeded".into()))
    });
    let token = s.request_ai_edit(adapter, id, "make it red", AiTarget::ReplaceLayer(id)).unwrap();

    let mut gallery = CollectGallery::default();
    let mut outcomes = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !s.ai_idle() && Instant::now() < deadline {
        outcomes.extend(s.poll_ai(&mut gallery));
        std::thread::sleep(Duration::from_millis(5));
    }
    outcomes.extend(s.poll_ai(&mut gallery));

    assert_eq!(outcomes.len(), 1, "{:?}", outcomes);
    match &outcomes[0] {
        AiOutcome::Failed(t, msg) => {
            assert_eq!(*t, token);
            assert!(msg.contains("quota exceeded"), "{}", msg);
        }
        other => panic!("expected a failure, got {:?}", other),
    }
    assert_eq!(s.layer(id).unwrap(), &before);
    assert_eq!(s.history().len(), len);
    assert!(gallery.0.is_empty());
}

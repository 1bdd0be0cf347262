// ============================================================================
// CANVAS-LEVEL OPERATIONS: align / distribute / merge / bake
// ============================================================================
//
// None of these push history themselves; the session commits after a
// successful call.

use crate::canvas::{BlendMode, CanvasState, Layer, LayerId, LayerPatch};
use crate::compositor::{BitmapStore, RenderResources, capture_layers, capture_scale, render};
use crate::geometry::{Axis, Rect, rotated_bounding_box};
use crate::ops::text::FontBook;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Alignment {
    Left,
    CenterHorizontal,
    Right,
    Top,
    Middle,
    Bottom,
}

/// Unlocked layers among `ids`, in z-order.
fn movable(state: &CanvasState, ids: &[LayerId]) -> Vec<Layer> {
    state
        .layers()
        .iter()
        .filter(|l| ids.contains(&l.id) && !l.locked)
        .cloned()
        .collect()
}

fn group_box(layers: &[Layer]) -> Option<Rect> {
    rotated_bounding_box(layers.iter().map(|l| (l.rect(), l.rotation)))
}

/// Move each layer's rotated bounds edge/center onto the group box's.
pub fn align_layers(state: &mut CanvasState, ids: &[LayerId], alignment: Alignment) -> bool {
    let layers = movable(state, ids);
    if layers.len() < 2 {
        return false;
    }
    let Some(group) = group_box(&layers) else { return false };

    let mut changed = false;
    for layer in &layers {
        let b = layer.bounds();
        let (dx, dy) = match alignment {
            Alignment::Left => (group.x - b.x, 0.0),
            Alignment::CenterHorizontal => (group.center().x - b.center().x, 0.0),
            Alignment::Right => (group.right() - b.right(), 0.0),
            Alignment::Top => (0.0, group.y - b.y),
            Alignment::Middle => (0.0, group.center().y - b.center().y),
            Alignment::Bottom => (0.0, group.bottom() - b.bottom()),
        };
        if dx != 0.0 || dy != 0.0 {
            state.apply_patch(layer.id, &LayerPatch::position(layer.x + dx, layer.y + dy));
            changed = true;
        }
    }
    changed
}

fn start_of(r: &Rect, axis: Axis) -> f32 {
    match axis {
        Axis::X => r.x,
        Axis::Y => r.y,
    }
}

fn extent_of(r: &Rect, axis: Axis) -> f32 {
    match axis {
        Axis::X => r.width,
        Axis::Y => r.height,
    }
}

/// Space layers evenly across the group span along `axis`, keeping sizes.
pub fn distribute_layers(state: &mut CanvasState, ids: &[LayerId], axis: Axis) -> bool {
    let mut layers = movable(state, ids);
    if layers.len() < 2 {
        return false;
    }
    let Some(group) = group_box(&layers) else { return false };
    layers.sort_by(|a, b| start_of(&a.bounds(), axis).total_cmp(&start_of(&b.bounds(), axis)));

    let occupied: f32 = layers.iter().map(|l| extent_of(&l.bounds(), axis)).sum();
    let gap = (extent_of(&group, axis) - occupied) / (layers.len() - 1) as f32;
    if !gap.is_finite() {
        return false;
    }

    let mut cursor = start_of(&group, axis);
    let mut changed = false;
    for layer in &layers {
        let b = layer.bounds();
        let shift = cursor - start_of(&b, axis);
        if shift != 0.0 {
            let patch = match axis {
                Axis::X => LayerPatch::position(layer.x + shift, layer.y),
                Axis::Y => LayerPatch::position(layer.x, layer.y + shift),
            };
            state.apply_patch(layer.id, &patch);
            changed = true;
        }
        cursor += extent_of(&b, axis) + gap;
    }
    changed
}

/// Resize every layer to the average cross-axis size (height for `Axis::X`,
/// width for `Axis::Y`) keeping aspect ratios, then lay them out edge to edge
/// with `gap` starting at the group box origin.
pub fn distribute_and_scale(state: &mut CanvasState, ids: &[LayerId], axis: Axis, gap: f32) -> bool {
    let mut layers = movable(state, ids);
    if layers.len() < 2 {
        return false;
    }
    let Some(group) = group_box(&layers) else { return false };

    let cross = |l: &Layer| match axis {
        Axis::X => l.height,
        Axis::Y => l.width,
    };
    if layers.iter().any(|l| cross(l) <= 0.0) {
        return false;
    }
    let target = layers.iter().map(cross).sum::<f32>() / layers.len() as f32;
    if !(target > 0.0) || !target.is_finite() {
        return false;
    }

    layers.sort_by(|a, b| start_of(&a.rect(), axis).total_cmp(&start_of(&b.rect(), axis)));

    let mut cursor = start_of(&group, axis);
    for layer in &layers {
        let k = target / cross(layer);
        let rect = match axis {
            Axis::X => Rect::new(cursor, group.y, layer.width * k, target),
            Axis::Y => Rect::new(group.x, cursor, target, layer.height * k),
        };
        cursor += extent_of(&rect, axis) + gap;
        state.apply_patch(layer.id, &LayerPatch::geometry(rect));
    }
    true
}

/// Flatten the given layers into one image layer covering their rotated
/// bounding box, inserted where the topmost of them was.  Needs at least
/// two layers.
pub fn merge_layers(
    state: &mut CanvasState,
    ids: &[LayerId],
    bitmaps: &mut BitmapStore,
    fonts: &FontBook,
) -> Option<LayerId> {
    let layers: Vec<Layer> = state.layers().iter().filter(|l| ids.contains(&l.id)).cloned().collect();
    if layers.len() < 2 {
        return None;
    }
    let top_index = state.index_of(layers[0].id)?;
    let (bounds, image) = capture_layers(&layers, RenderResources { bitmaps: &*bitmaps, fonts }, 1.0)?;
    if image.width() == 0 || image.height() == 0 {
        crate::log_warn!("Merge skipped: layers cover no pixels");
        return None;
    }
    let rect = Rect::new(bounds.x, bounds.y, image.width() as f32, image.height() as f32);
    let key = bitmaps.insert(image);

    let mut merged = Layer::image(key, rect);
    merged.name = "Merged".to_string();

    let merged_ids: Vec<LayerId> = layers.iter().map(|l| l.id).collect();
    state.delete_layers(&merged_ids);
    let id = state.insert_layer(top_index, merged);
    crate::log_info!("Merged {} layers into {}", merged_ids.len(), id);
    Some(id)
}

/// Rasterize one layer in place.  Text and shape content is captured at
/// `oversample`, images at their source resolution; the replacement keeps
/// the layer's geometry, opacity, blend mode and flags.
pub fn bake_layer(
    state: &mut CanvasState,
    id: LayerId,
    bitmaps: &mut BitmapStore,
    fonts: &FontBook,
    oversample: f32,
) -> Option<LayerId> {
    let index = state.index_of(id)?;
    let original = state.layer(id)?.clone();
    if original.width <= 0.0 || original.height <= 0.0 {
        return None;
    }

    let mut flat = original.clone();
    flat.rotation = 0.0;
    flat.opacity = 100.0;
    flat.blend_mode = BlendMode::Normal;
    flat.visible = true;

    let scale = capture_scale(&flat, bitmaps, oversample);
    let image = render(
        std::slice::from_ref(&flat),
        flat.rect(),
        None,
        RenderResources { bitmaps: &*bitmaps, fonts },
        scale,
    );
    let key = bitmaps.insert(image);

    let mut baked = Layer::image(key, original.rect());
    baked.name = original.name.clone();
    baked.rotation = original.rotation;
    baked.opacity = original.opacity;
    baked.blend_mode = original.blend_mode;
    baked.visible = original.visible;
    baked.locked = original.locked;

    state.delete_layers(&[id]);
    let new_id = state.insert_layer(index, baked);
    crate::log_info!("Baked {} layer '{}'", original.content.kind_name(), original.name);
    Some(new_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{CanvasSettings, Color, ShapeKind};

    fn rect_layer(state: &mut CanvasState, r: Rect) -> LayerId {
        state.add_layer(Layer::shape(ShapeKind::Rectangle, r, Color::BLACK))
    }

    #[test]
    fn align_left_uses_group_edge() {
        let mut s = CanvasState::new(CanvasSettings::new(500, 500));
        let a = rect_layer(&mut s, Rect::new(10.0, 0.0, 50.0, 50.0));
        let b = rect_layer(&mut s, Rect::new(80.0, 100.0, 30.0, 30.0));
        assert!(align_layers(&mut s, &[a, b], Alignment::Left));
        assert_eq!(s.layer(a).unwrap().x, 10.0);
        assert_eq!(s.layer(b).unwrap().x, 10.0);
        assert_eq!(s.layer(b).unwrap().y, 100.0);
    }

    #[test]
    fn single_layer_is_a_no_op() {
        let mut s = CanvasState::new(CanvasSettings::new(500, 500));
        let a = rect_layer(&mut s, Rect::new(10.0, 0.0, 50.0, 50.0));
        let rev = s.revision();
        assert!(!align_layers(&mut s, &[a], Alignment::Right));
        assert!(!distribute_layers(&mut s, &[a], Axis::X));
        assert_eq!(s.revision(), rev);
    }

    #[test]
    fn distribute_evens_gaps() {
        let mut s = CanvasState::new(CanvasSettings::new(500, 500));
        let a = rect_layer(&mut s, Rect::new(0.0, 0.0, 10.0, 10.0));
        let b = rect_layer(&mut s, Rect::new(20.0, 0.0, 10.0, 10.0));
        let c = rect_layer(&mut s, Rect::new(90.0, 0.0, 10.0, 10.0));
        assert!(distribute_layers(&mut s, &[a, b, c], Axis::X));
        assert_eq!(s.layer(b).unwrap().x, 45.0);
        assert_eq!(s.layer(c).unwrap().x, 90.0);
    }

    #[test]
    fn zero_height_makes_scale_degenerate() {
        let mut s = CanvasState::new(CanvasSettings::new(500, 500));
        let a = rect_layer(&mut s, Rect::new(0.0, 0.0, 10.0, 0.0));
        let b = rect_layer(&mut s, Rect::new(20.0, 0.0, 10.0, 10.0));
        let rev = s.revision();
        assert!(!distribute_and_scale(&mut s, &[a, b], Axis::X, 16.0));
        assert_eq!(s.revision(), rev);
    }

    #[test]
    fn bake_keeps_geometry() {
        let mut s = CanvasState::new(CanvasSettings::new(100, 100));
        let mut bitmaps = BitmapStore::new();
        let id = rect_layer(&mut s, Rect::new(5.0, 6.0, 10.0, 4.0));
        s.apply_patch(id, &LayerPatch { rotation: Some(30.0), opacity: Some(40.0), ..LayerPatch::default() });
        let baked = bake_layer(&mut s, id, &mut bitmaps, &FontBook::new(), 4.0).unwrap();
        let layer = s.layer(baked).unwrap();
        assert_eq!(layer.rect(), Rect::new(5.0, 6.0, 10.0, 4.0));
        assert_eq!((layer.rotation, layer.opacity), (30.0, 40.0));
        assert_eq!(s.index_of(baked), Some(0));
        let crate::canvas::LayerContent::Image(img) = &layer.content else { panic!("not an image") };
        let bitmap = bitmaps.get(&img.source).unwrap();
        assert_eq!(bitmap.dimensions(), (40, 16));
        assert_eq!(bitmap.get_pixel(20, 8).0, [0, 0, 0, 255]);
    }
}

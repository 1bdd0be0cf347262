use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;
use uuid::Uuid;

use crate::canvas::{
    CanvasSettings, CanvasSnapshot, CanvasState, ImageContent, Layer, LayerContent, LayerId, LayerPatch,
};
use crate::components::history::HistoryManager;
use crate::compositor::{BitmapStore, RenderResources, capture_layer, render_canvas};
use crate::geometry::{Axis, Rect};
use crate::io::{
    AutosaveTimer, BackgroundSaver, DocumentFile, DocumentStore, EditorError, GallerySink, decode_layer_bitmap,
    ensure_non_empty, load_document, save_document,
};
use crate::ops::ai::{AiJobQueue, AiOutcome, AiRequest, AiTarget, AiTransform};
use crate::ops::canvas_ops::{self, Alignment};
use crate::ops::text::FontBook;
use crate::settings::EditorSettings;

/// Largest box with the aspect of `w`x`h` that fits `frame`, centered in it.
/// Without `upscale` the natural size is never exceeded.
pub fn fit_into(w: u32, h: u32, frame: Rect, upscale: bool) -> Rect {
    if w == 0 || h == 0 {
        return Rect::new(frame.center().x, frame.center().y, 0.0, 0.0);
    }
    let mut k = (frame.width / w as f32).min(frame.height / h as f32);
    if !upscale {
        k = k.min(1.0);
    }
    let (fw, fh) = (w as f32 * k, h as f32 * k);
    let c = frame.center();
    Rect::new(c.x - fw * 0.5, c.y - fh * 0.5, fw, fh)
}

/// Single open document: the layer store plus everything that hangs off it
/// (history, bitmaps, fonts, pending async jobs, autosave).
pub struct DocumentSession {
    pub id: Uuid,
    /// Display name (derived from path or "Untitled-X")
    pub name: String,
    /// `None` for unsaved/untitled documents.
    pub path: Option<PathBuf>,
    pub is_dirty: bool,
    pub fonts: FontBook,

    canvas: CanvasState,
    history: HistoryManager<CanvasSnapshot>,
    bitmaps: BitmapStore,
    settings: EditorSettings,
    ai: AiJobQueue,

    /// Canvas revision matching the current history entry.
    committed_revision: u64,
    /// Revision last handed out by `frame`.
    rendered_revision: Option<u64>,
    redraw_pending: bool,
    gesture_active: bool,

    autosave: AutosaveTimer,
    saver: BackgroundSaver,
    /// Bumped by every `mark_dirty`.
    edit_serial: u64,
    /// In-flight autosave: (token, `edit_serial` at submit).
    autosave_pending: Option<(u64, u64)>,
}

impl DocumentSession {
    pub fn new(canvas_settings: CanvasSettings, settings: EditorSettings) -> Self {
        Self::from_parts(CanvasState::new(canvas_settings), BitmapStore::new(), settings)
    }

    pub fn new_untitled(untitled_counter: usize, width: u32, height: u32, settings: EditorSettings) -> Self {
        let mut session = Self::new(CanvasSettings::new(width, height), settings);
        session.name = format!("Untitled-{}", untitled_counter);
        session
    }

    fn from_parts(canvas: CanvasState, bitmaps: BitmapStore, settings: EditorSettings) -> Self {
        let history = HistoryManager::new(canvas.snapshot(), settings.max_undo_steps);
        let autosave = AutosaveTimer::new(Duration::from_secs(settings.autosave_seconds));
        Self {
            id: Uuid::new_v4(),
            name: "Untitled".to_string(),
            path: None,
            is_dirty: false,
            fonts: FontBook::new(),
            committed_revision: canvas.revision(),
            canvas,
            history,
            bitmaps,
            settings,
            ai: AiJobQueue::new(),
            rendered_revision: None,
            redraw_pending: true,
            gesture_active: false,
            autosave,
            saver: BackgroundSaver::new(),
            edit_serial: 0,
            autosave_pending: None,
        }
    }

    /// Rebuild a session from a validated document, history included.
    pub fn from_document(doc: DocumentFile, settings: EditorSettings) -> Result<Self, EditorError> {
        doc.validate()?;
        let bitmaps = doc.bitmap_store()?;
        let entries = doc.history_entries();
        let live = CanvasSnapshot { layers: doc.layers };

        let mut canvas = CanvasState::new(doc.settings);
        canvas.restore(&live);
        let mut session = Self::from_parts(canvas, bitmaps, settings);
        if !entries.is_empty() {
            session.history.restore_entries(entries, doc.history_index);
            if *session.history.current() != live {
                // Saved mid-edit: the live state is ahead of history.
                session.committed_revision = session.canvas.revision().wrapping_sub(1);
            }
        }
        crate::log_info!(
            "Document loaded: {} layers, {} history entries",
            session.canvas.layers().len(),
            session.history.len()
        );
        Ok(session)
    }

    pub fn open(path: &Path, settings: EditorSettings) -> Result<Self, EditorError> {
        let doc = load_document(path)?;
        let mut session = Self::from_document(doc, settings)?;
        session.path = Some(path.to_path_buf());
        session.update_name_from_path();
        Ok(session)
    }

    pub fn to_document(&self) -> DocumentFile {
        DocumentFile::new(
            self.canvas.settings.clone(),
            self.canvas.layers().to_vec(),
            self.history.entries(),
            self.history.index(),
            &self.bitmaps,
        )
    }

    /// Synchronous save; also becomes the autosave target.
    pub fn save(&mut self, path: &Path) -> Result<(), EditorError> {
        save_document(&self.to_document(), path)?;
        self.path = Some(path.to_path_buf());
        self.update_name_from_path();
        self.mark_clean();
        crate::log_info!("Saved document to {}", path.display());
        Ok(())
    }

    pub fn save_to_store(&mut self, store: &mut dyn DocumentStore) -> Result<(), EditorError> {
        store.save_document_state(&self.to_document())?;
        self.mark_clean();
        Ok(())
    }

    pub fn load_from_store(store: &mut dyn DocumentStore, settings: EditorSettings) -> Result<Option<Self>, EditorError> {
        store.load_document_state()?.map(|doc| Self::from_document(doc, settings)).transpose()
    }

    // --- naming / dirty state ---

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
        self.edit_serial += 1;
        self.autosave.mark_dirty(Instant::now());
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
        self.autosave.mark_saved();
    }

    pub fn update_name_from_path(&mut self) {
        if let Some(ref path) = self.path {
            self.name = path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "Unknown".to_string());
        }
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }

    // --- access ---

    pub fn canvas(&self) -> &CanvasState {
        &self.canvas
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    pub fn history(&self) -> &HistoryManager<CanvasSnapshot> {
        &self.history
    }

    pub fn bitmaps(&self) -> &BitmapStore {
        &self.bitmaps
    }

    pub fn resources(&self) -> RenderResources<'_> {
        RenderResources { bitmaps: &self.bitmaps, fonts: &self.fonts }
    }

    pub fn layer(&self, id: LayerId) -> Option<&Layer> {
        self.canvas.layer(id)
    }

    pub fn selected(&self) -> &[LayerId] {
        self.canvas.selected()
    }

    pub fn is_gesture_active(&self) -> bool {
        self.gesture_active
    }

    /// True when live state has edits no history entry covers yet.
    pub fn has_uncommitted_changes(&self) -> bool {
        self.canvas.revision() != self.committed_revision
    }

    // --- selection (never recorded in history) ---

    pub fn select_layers(&mut self, ids: &[LayerId]) {
        self.canvas.set_selection(ids);
        self.redraw_pending = true;
    }

    pub fn toggle_layer_selection(&mut self, id: LayerId) {
        self.canvas.toggle_selected(id);
        self.redraw_pending = true;
    }

    pub fn clear_selection(&mut self) {
        self.canvas.clear_selection();
        self.redraw_pending = true;
    }

    // --- layer CRUD ---

    pub fn add_layer(&mut self, layer: Layer) -> LayerId {
        let id = self.canvas.add_layer(layer);
        self.commit("Add Layer");
        id
    }

    /// Decode `bytes` into a new image layer centered on the canvas,
    /// scaled down to fit when larger than it.
    pub fn add_image_layer_from_bytes(&mut self, bytes: &[u8]) -> Result<LayerId, EditorError> {
        let image = decode_layer_bitmap(bytes)?;
        let frame = match self.canvas.settings.bounds() {
            Some(b) => b,
            None => Rect::new(0.0, 0.0, image.width() as f32, image.height() as f32),
        };
        let rect = fit_into(image.width(), image.height(), frame, false);
        let key = self.bitmaps.insert(image);
        let id = self.canvas.add_layer(Layer::image(key, rect));
        self.commit("Add Image");
        Ok(id)
    }

    pub fn delete_layers(&mut self, ids: &[LayerId]) -> usize {
        let removed = self.canvas.delete_layers(ids);
        if removed > 0 {
            self.commit("Delete Layers");
        }
        removed
    }

    pub fn delete_selected(&mut self) -> usize {
        let ids = self.canvas.selected().to_vec();
        self.delete_layers(&ids)
    }

    pub fn duplicate_layers(&mut self, ids: &[LayerId]) -> Vec<LayerId> {
        let off = self.settings.duplicate_offset;
        let new_ids = self.canvas.duplicate_layers(ids, off, off);
        if !new_ids.is_empty() {
            self.commit("Duplicate Layers");
        }
        new_ids
    }

    /// Copies on top of the originals with no offset and no history entry;
    /// the alt-drag gesture commits once it ends.
    pub(crate) fn duplicate_in_place(&mut self, ids: &[LayerId]) -> Vec<LayerId> {
        self.canvas.duplicate_layers(ids, 0.0, 0.0)
    }

    pub fn reorder(&mut self, new_order: &[LayerId]) -> bool {
        if !self.canvas.reorder(new_order) {
            crate::log_warn!("Reorder rejected: not a permutation of the current layers");
            return false;
        }
        self.commit("Reorder Layers");
        true
    }

    fn shift(&mut self, id: LayerId, steps: isize, description: &str) -> bool {
        if !self.canvas.shift_layer(id, steps) {
            return false;
        }
        self.commit(description);
        true
    }

    pub fn bring_forward(&mut self, id: LayerId) -> bool {
        self.shift(id, -1, "Bring Forward")
    }

    pub fn send_backward(&mut self, id: LayerId) -> bool {
        self.shift(id, 1, "Send Backward")
    }

    pub fn bring_to_front(&mut self, id: LayerId) -> bool {
        self.shift(id, isize::MIN / 2, "Bring to Front")
    }

    pub fn send_to_back(&mut self, id: LayerId) -> bool {
        self.shift(id, isize::MAX / 2, "Send to Back")
    }

    pub fn update_layer(&mut self, id: LayerId, patch: LayerPatch, is_final: bool) -> Result<(), EditorError> {
        self.update_layers(&[(id, patch)], is_final)
    }

    /// Apply partial updates.  Non-final updates only touch live state;
    /// a final one commits if the result differs from the last entry.
    /// Nothing is applied when any id is unknown.
    pub fn update_layers(&mut self, updates: &[(LayerId, LayerPatch)], is_final: bool) -> Result<(), EditorError> {
        if let Some((missing, _)) = updates.iter().find(|(id, _)| self.canvas.layer(*id).is_none()) {
            return Err(EditorError::UnknownLayer(*missing));
        }
        for (id, patch) in updates {
            self.canvas.apply_patch(*id, patch);
        }
        if is_final {
            self.commit("Edit Layers");
        }
        Ok(())
    }

    pub fn bounding_box_of(&self, ids: &[LayerId]) -> Option<Rect> {
        self.canvas.bounding_box_of(ids)
    }

    pub fn selection_bounds(&self) -> Option<Rect> {
        self.canvas.bounding_box_of(self.canvas.selected())
    }

    // --- history ---

    /// Snapshot live state as a new entry.  Cheap when nothing changed
    /// since the last commit; otherwise deduped structurally.
    pub fn commit(&mut self, description: &str) -> bool {
        if !self.has_uncommitted_changes() {
            return false;
        }
        self.committed_revision = self.canvas.revision();
        let added = self.history.commit(description, self.canvas.snapshot());
        if added {
            crate::log_debug!("History: {} (entry {})", description, self.history.index());
            self.mark_dirty();
        }
        added
    }

    /// Throw away live edits made since the last entry.
    pub fn discard_uncommitted(&mut self) {
        if self.has_uncommitted_changes() {
            let current = self.history.current().clone();
            self.canvas.restore(&current);
            self.committed_revision = self.canvas.revision();
        }
    }

    /// Ignored while a gesture is in progress.  Uncommitted live edits are
    /// committed first so they are what gets undone.
    pub fn undo(&mut self) -> bool {
        if self.gesture_active {
            return false;
        }
        self.commit("Edit Layers");
        let Some(state) = self.history.undo().cloned() else { return false };
        self.canvas.restore(&state);
        self.committed_revision = self.canvas.revision();
        self.mark_dirty();
        true
    }

    pub fn redo(&mut self) -> bool {
        if self.gesture_active || self.has_uncommitted_changes() {
            return false;
        }
        let Some(state) = self.history.redo().cloned() else { return false };
        self.canvas.restore(&state);
        self.committed_revision = self.canvas.revision();
        self.mark_dirty();
        true
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo() || self.has_uncommitted_changes()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo() && !self.has_uncommitted_changes()
    }

    // --- gestures ---

    pub fn begin_gesture(&mut self) {
        self.gesture_active = true;
    }

    /// Close the gesture with at most one history entry.
    pub fn end_gesture(&mut self, description: &str) -> bool {
        self.gesture_active = false;
        self.commit(description)
    }

    pub fn cancel_gesture(&mut self) {
        self.gesture_active = false;
        self.discard_uncommitted();
    }

    // --- arrangement ---

    pub fn align(&mut self, alignment: Alignment) -> bool {
        let ids = self.canvas.selected().to_vec();
        canvas_ops::align_layers(&mut self.canvas, &ids, alignment) && self.commit("Align Layers")
    }

    pub fn distribute(&mut self, axis: Axis) -> bool {
        let ids = self.canvas.selected().to_vec();
        canvas_ops::distribute_layers(&mut self.canvas, &ids, axis) && self.commit("Distribute Layers")
    }

    pub fn distribute_and_scale(&mut self, axis: Axis) -> bool {
        let ids = self.canvas.selected().to_vec();
        let gap = self.settings.distribute_gap;
        canvas_ops::distribute_and_scale(&mut self.canvas, &ids, axis, gap) && self.commit("Distribute and Scale")
    }

    pub fn merge_selected(&mut self) -> Option<LayerId> {
        let ids = self.canvas.selected().to_vec();
        let id = canvas_ops::merge_layers(&mut self.canvas, &ids, &mut self.bitmaps, &self.fonts)?;
        self.commit("Merge Layers");
        Some(id)
    }

    pub fn bake_layer(&mut self, id: LayerId) -> Option<LayerId> {
        let oversample = self.settings.export_oversample;
        let new_id = canvas_ops::bake_layer(&mut self.canvas, id, &mut self.bitmaps, &self.fonts, oversample)?;
        self.commit("Bake Layer");
        Some(new_id)
    }

    // --- output ---

    pub fn export_layer(&self, id: LayerId) -> Result<RgbaImage, EditorError> {
        let layer = self.canvas.layer(id).ok_or(EditorError::UnknownLayer(id))?;
        Ok(capture_layer(layer, self.resources(), self.settings.export_oversample))
    }

    pub fn flatten(&self, scale: f32) -> RgbaImage {
        render_canvas(&self.canvas, self.resources(), scale)
    }

    /// Render a frame if anything changed since the last one.
    pub fn frame(&mut self, scale: f32) -> Option<RgbaImage> {
        let revision = self.canvas.revision();
        if !self.redraw_pending && self.rendered_revision == Some(revision) {
            return None;
        }
        self.redraw_pending = false;
        self.rendered_revision = Some(revision);
        Some(self.flatten(scale))
    }

    pub fn request_redraw(&mut self) {
        self.redraw_pending = true;
    }

    // --- AI ---

    /// Capture `id` and hand it to `adapter` on the worker pool.  The result
    /// is applied by a later `poll_ai`.
    pub fn request_ai_edit(
        &mut self,
        adapter: Arc<dyn AiTransform>,
        id: LayerId,
        prompt: &str,
        target: AiTarget,
    ) -> Result<u64, EditorError> {
        let layer = self.canvas.layer(id).ok_or(EditorError::UnknownLayer(id))?;
        let source = match &layer.content {
            LayerContent::Image(img) => self.bitmaps.get(&img.source).cloned(),
            _ => None,
        };
        let image = match source {
            Some(bitmap) => bitmap,
            None => Arc::new(capture_layer(layer, self.resources(), self.settings.export_oversample)),
        };
        Ok(self.ai.submit(adapter, AiRequest::new(prompt, image), target))
    }

    pub fn cancel_ai(&mut self, token: u64) -> bool {
        self.ai.cancel(token)
    }

    pub fn cancel_all_ai(&mut self) {
        self.ai.cancel_all();
    }

    pub fn ai_idle(&self) -> bool {
        self.ai.is_idle()
    }

    /// Apply finished AI jobs with a single history entry.  Deferred while a
    /// gesture is running.  Every finished, non-cancelled job yields one
    /// outcome; failed jobs leave the document untouched.
    pub fn poll_ai(&mut self, gallery: &mut dyn GallerySink) -> Vec<AiOutcome> {
        if self.gesture_active {
            return Vec::new();
        }
        let mut outcomes = Vec::new();
        for done in self.ai.poll() {
            let images = match done.result.map(|images| {
                images.into_iter().filter_map(|img| ensure_non_empty(img).ok()).collect::<Vec<_>>()
            }) {
                Ok(images) if !images.is_empty() => images,
                Ok(_) => {
                    crate::log_warn!("AI job {} returned no images", done.token);
                    outcomes.push(AiOutcome::Failed(done.token, "no images returned".to_string()));
                    continue;
                }
                Err(e) => {
                    outcomes.push(AiOutcome::Failed(done.token, e));
                    continue;
                }
            };
            match done.target {
                AiTarget::ReplaceLayer(id) => {
                    if self.canvas.layer(id).is_none() {
                        crate::log_warn!("AI result for deleted layer {} dropped", id);
                        outcomes.push(AiOutcome::Failed(done.token, format!("layer {} no longer exists", id)));
                        continue;
                    }
                    let Some(first) = images.into_iter().next() else { continue };
                    let key = self.bitmaps.insert(first);
                    let patch = LayerPatch {
                        content: Some(LayerContent::Image(ImageContent { source: key })),
                        ..LayerPatch::default()
                    };
                    self.canvas.apply_patch(id, &patch);
                }
                AiTarget::NewLayers { frame } => {
                    for image in images {
                        let rect = fit_into(image.width(), image.height(), frame, true);
                        let key = self.bitmaps.insert(image);
                        let mut layer = Layer::image(key, rect);
                        layer.name = "AI Result".to_string();
                        self.canvas.add_layer(layer);
                    }
                }
                AiTarget::Gallery => {
                    for image in &images {
                        gallery.add_result(image);
                    }
                }
            }
            outcomes.push(AiOutcome::Applied(done.token));
        }
        if outcomes.iter().any(|o| matches!(o, AiOutcome::Applied(_))) {
            self.commit("AI Edit");
        }
        outcomes
    }

    // --- autosave ---

    /// Drive autosave from the host's frame loop.  Returns the save token
    /// when a background write was started.  The document only turns clean
    /// once the write is reported successful and nothing changed meanwhile.
    pub fn autosave_tick(&mut self, now: Instant) -> Option<u64> {
        while let Some((token, result)) = self.saver.poll() {
            let Some((pending, serial)) = self.autosave_pending else { continue };
            if pending != token {
                continue;
            }
            self.autosave_pending = None;
            match result {
                Ok(()) if serial == self.edit_serial => {
                    crate::log_debug!("Autosave {} finished", token);
                    self.mark_clean();
                }
                Ok(()) => crate::log_debug!("Autosave {} finished; newer edits still unsaved", token),
                // Re-arm so the next attempt waits a full interval.
                Err(_) => self.autosave.mark_dirty(now),
            }
        }
        if self.settings.autosave_seconds == 0 || self.gesture_active || self.saver.is_busy() {
            return None;
        }
        let path = self.path.clone()?;
        if !self.autosave.due(now) {
            return None;
        }
        let token = self.saver.submit(self.to_document(), path);
        self.autosave_pending = Some((token, self.edit_serial));
        // Stop the timer while the write is in flight; `is_dirty` stays set.
        self.autosave.mark_saved();
        Some(token)
    }

    pub fn autosave_busy(&self) -> bool {
        self.saver.is_busy()
    }
}

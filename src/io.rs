use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::tga::TgaEncoder;
use image::{DynamicImage, ImageEncoder, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::canvas::{CanvasSettings, CanvasSnapshot, Layer, LayerContent, LayerId};
use crate::components::history::HistoryEntry;
use crate::compositor::BitmapStore;

// ============================================================================
// ERRORS
// ============================================================================

/// Error type for decoding, encoding and document persistence.
#[derive(Debug)]
pub enum EditorError {
    Io(std::io::Error),
    /// Bitmap bytes could not be decoded.
    Decode(String),
    /// A decoded bitmap has zero width or height.
    EmptyImage,
    Serialize(String),
    InvalidFormat(String),
    UnknownLayer(LayerId),
}

impl std::fmt::Display for EditorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditorError::Io(e) => write!(f, "I/O error: {}", e),
            EditorError::Decode(e) => write!(f, "Decode error: {}", e),
            EditorError::EmptyImage => write!(f, "Image has zero width or height"),
            EditorError::Serialize(e) => write!(f, "Serialization error: {}", e),
            EditorError::InvalidFormat(e) => write!(f, "Invalid format: {}", e),
            EditorError::UnknownLayer(id) => write!(f, "Unknown layer {}", id),
        }
    }
}

impl std::error::Error for EditorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EditorError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EditorError {
    fn from(e: std::io::Error) -> Self {
        EditorError::Io(e)
    }
}

impl From<image::ImageError> for EditorError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::IoError(io) => EditorError::Io(io),
            other => EditorError::Decode(other.to_string()),
        }
    }
}

impl From<Box<bincode::ErrorKind>> for EditorError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        EditorError::Serialize(e.to_string())
    }
}

// ============================================================================
// BITMAP DECODE / ENCODE
// ============================================================================

/// Decode any supported raster format to RGBA8.
pub fn decode_image(bytes: &[u8]) -> Result<RgbaImage, EditorError> {
    let img = image::load_from_memory(bytes).map_err(|e| EditorError::Decode(e.to_string()))?;
    Ok(img.to_rgba8())
}

/// Decode for use as layer content: zero-sized bitmaps are rejected.
pub fn decode_layer_bitmap(bytes: &[u8]) -> Result<RgbaImage, EditorError> {
    decode_image(bytes).and_then(ensure_non_empty)
}

/// Most decoders refuse zero-sized files outright; AI results are checked
/// here too before they reach the bitmap store.
pub fn ensure_non_empty(img: RgbaImage) -> Result<RgbaImage, EditorError> {
    if img.width() == 0 || img.height() == 0 {
        return Err(EditorError::EmptyImage);
    }
    Ok(img)
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, EditorError> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ColorType::Rgba8,
    )?;
    Ok(out)
}

/// Output formats for flattened exports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SaveFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
    Bmp,
    Tga,
}

impl SaveFormat {
    pub fn from_path(path: &Path) -> Option<SaveFormat> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(SaveFormat::Png),
            "jpg" | "jpeg" => Some(SaveFormat::Jpeg),
            "webp" => Some(SaveFormat::Webp),
            "bmp" => Some(SaveFormat::Bmp),
            "tga" => Some(SaveFormat::Tga),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpg",
            SaveFormat::Webp => "webp",
            SaveFormat::Bmp => "bmp",
            SaveFormat::Tga => "tga",
        }
    }
}

/// Encode and write an image to a file.  Standalone so it can run on a
/// background thread.
pub fn encode_and_write(image: &RgbaImage, path: &Path, format: SaveFormat, quality: u8) -> Result<(), EditorError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    match format {
        SaveFormat::Png => {
            PngEncoder::new(&mut writer).write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgba8,
            )?;
        }
        SaveFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality);
            encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)?;
        }
        SaveFormat::Webp => {
            drop(writer);
            DynamicImage::ImageRgba8(image.clone()).save(path)?;
            return Ok(());
        }
        SaveFormat::Bmp => {
            let mut encoder = BmpEncoder::new(&mut writer);
            encoder.encode(image.as_raw(), image.width(), image.height(), image::ColorType::Rgba8)?;
        }
        SaveFormat::Tga => {
            TgaEncoder::new(&mut writer).encode(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgba8,
            )?;
        }
    }
    writer.flush()?;
    Ok(())
}

// ============================================================================
// DOCUMENT FILE FORMAT (.cfd)
// ============================================================================

const DOC_MAGIC: &str = "CFD1";
const DOC_VERSION: u32 = 1;

/// Maximum supported canvas dimension in pixels (per axis).
pub const MAX_CANVAS_DIM: u32 = 32_768;
/// Maximum number of layers in a document.
pub const MAX_LAYERS: usize = 256;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub description: String,
    pub snapshot: CanvasSnapshot,
}

/// Raw RGBA8 bitmap referenced by image layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BitmapData {
    pub key: String,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Serializable document state: settings, live layers, the history arrays
/// and every bitmap any of them references.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentFile {
    magic: String,
    version: u32,
    pub settings: CanvasSettings,
    pub layers: Vec<Layer>,
    pub history: Vec<HistoryRecord>,
    pub history_index: usize,
    pub bitmaps: Vec<BitmapData>,
}

impl DocumentFile {
    /// Build a document, copying only the bitmaps referenced by the live
    /// layers or any history entry.
    pub fn new<'a>(
        settings: CanvasSettings,
        layers: Vec<Layer>,
        history: impl Iterator<Item = &'a HistoryEntry<CanvasSnapshot>>,
        history_index: usize,
        bitmaps: &BitmapStore,
    ) -> Self {
        let history: Vec<HistoryRecord> = history
            .map(|e| HistoryRecord { description: e.description.clone(), snapshot: e.state.clone() })
            .collect();

        let mut keys: Vec<&str> = layers
            .iter()
            .chain(history.iter().flat_map(|h| h.snapshot.layers.iter()))
            .filter_map(|l| match &l.content {
                LayerContent::Image(img) => Some(img.source.as_str()),
                _ => None,
            })
            .collect();
        keys.sort_unstable();
        keys.dedup();

        let bitmaps = keys
            .into_iter()
            .filter_map(|k| {
                bitmaps.get(k).map(|img| BitmapData {
                    key: k.to_string(),
                    width: img.width(),
                    height: img.height(),
                    pixels: img.as_raw().clone(),
                })
            })
            .collect();

        Self {
            magic: DOC_MAGIC.to_string(),
            version: DOC_VERSION,
            settings,
            layers,
            history,
            history_index,
            bitmaps,
        }
    }

    /// Reject crafted or corrupt documents before they reach the session.
    pub fn validate(&self) -> Result<(), EditorError> {
        if self.magic != DOC_MAGIC {
            return Err(EditorError::InvalidFormat(format!("Unknown magic '{}'", self.magic)));
        }
        if self.version > DOC_VERSION {
            return Err(EditorError::InvalidFormat(format!(
                "Document version {} is newer than supported version {}",
                self.version, DOC_VERSION
            )));
        }
        let s = &self.settings;
        if s.width == 0 || s.height == 0 {
            return Err(EditorError::InvalidFormat("Canvas dimensions cannot be zero".into()));
        }
        if s.width > MAX_CANVAS_DIM || s.height > MAX_CANVAS_DIM {
            return Err(EditorError::InvalidFormat(format!(
                "Canvas size {}x{} exceeds maximum allowed {}x{}",
                s.width, s.height, MAX_CANVAS_DIM, MAX_CANVAS_DIM
            )));
        }
        let too_many = |n: usize| {
            EditorError::InvalidFormat(format!(
                "Document contains {} layers, which exceeds the maximum of {}",
                n, MAX_LAYERS
            ))
        };
        if self.layers.len() > MAX_LAYERS {
            return Err(too_many(self.layers.len()));
        }
        if let Some(h) = self.history.iter().find(|h| h.snapshot.layers.len() > MAX_LAYERS) {
            return Err(too_many(h.snapshot.layers.len()));
        }
        if !self.history.is_empty() && self.history_index >= self.history.len() {
            return Err(EditorError::InvalidFormat(format!(
                "History index {} out of range for {} entries",
                self.history_index,
                self.history.len()
            )));
        }
        for b in &self.bitmaps {
            if b.width == 0 || b.height == 0 || b.width > MAX_CANVAS_DIM || b.height > MAX_CANVAS_DIM {
                return Err(EditorError::InvalidFormat(format!(
                    "Bitmap '{}' has invalid size {}x{}",
                    b.key, b.width, b.height
                )));
            }
            let expected = b.width as usize * b.height as usize * 4;
            if b.pixels.len() != expected {
                return Err(EditorError::InvalidFormat(format!(
                    "Bitmap '{}' has {} bytes, expected {}",
                    b.key,
                    b.pixels.len(),
                    expected
                )));
            }
        }
        Ok(())
    }

    /// Rebuild the bitmap store.  Call after `validate`.
    pub fn bitmap_store(&self) -> Result<BitmapStore, EditorError> {
        let mut store = BitmapStore::new();
        for b in &self.bitmaps {
            let img = RgbaImage::from_raw(b.width, b.height, b.pixels.clone()).ok_or_else(|| {
                EditorError::InvalidFormat(format!("Failed to reconstruct bitmap '{}'", b.key))
            })?;
            store.insert_with_key(b.key.clone(), Arc::new(img));
        }
        Ok(store)
    }

    pub fn history_entries(&self) -> Vec<HistoryEntry<CanvasSnapshot>> {
        self.history
            .iter()
            .map(|h| HistoryEntry { description: h.description.clone(), state: h.snapshot.clone() })
            .collect()
    }
}

/// Serialize a document with bincode.
pub fn write_document<W: Write>(doc: &DocumentFile, writer: W) -> Result<(), EditorError> {
    bincode::serialize_into(writer, doc)?;
    Ok(())
}

/// Parse and validate a document.
pub fn read_document(raw: &[u8]) -> Result<DocumentFile, EditorError> {
    if raw.len() < 12 {
        return Err(EditorError::InvalidFormat("File too small".into()));
    }
    // bincode writes a String as an 8-byte length prefix + UTF-8 data, so
    // bytes 8..12 hold the magic.
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != DOC_MAGIC {
        return Err(EditorError::InvalidFormat(format!("Unknown magic '{}'", magic)));
    }
    let doc: DocumentFile = bincode::deserialize(raw)?;
    doc.validate()?;
    Ok(doc)
}

pub fn save_document(doc: &DocumentFile, path: &Path) -> Result<(), EditorError> {
    // Write next to the target, then rename, so a crash never leaves a
    // truncated document behind.
    let tmp = path.with_extension("cfd.tmp");
    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        write_document(doc, &mut writer)?;
        writer.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn load_document(path: &Path) -> Result<DocumentFile, EditorError> {
    let raw = std::fs::read(path)?;
    read_document(&raw)
}

// ============================================================================
// PERSISTENCE / GALLERY COLLABORATORS
// ============================================================================

/// Host-side persistence used at open/close/autosave boundaries.
pub trait DocumentStore {
    fn save_document_state(&mut self, doc: &DocumentFile) -> Result<(), EditorError>;
    /// `Ok(None)` when nothing has been saved yet.
    fn load_document_state(&mut self) -> Result<Option<DocumentFile>, EditorError>;
}

/// Stores the document in a single `.cfd` file.
#[derive(Clone, Debug)]
pub struct FileDocumentStore {
    path: PathBuf,
}

impl FileDocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentStore for FileDocumentStore {
    fn save_document_state(&mut self, doc: &DocumentFile) -> Result<(), EditorError> {
        save_document(doc, &self.path)
    }

    fn load_document_state(&mut self) -> Result<Option<DocumentFile>, EditorError> {
        if !self.path.exists() {
            return Ok(None);
        }
        load_document(&self.path).map(Some)
    }
}

/// In-memory store holding the serialized bytes.
#[derive(Clone, Debug, Default)]
pub struct MemoryDocumentStore {
    bytes: Option<Vec<u8>>,
}

impl DocumentStore for MemoryDocumentStore {
    fn save_document_state(&mut self, doc: &DocumentFile) -> Result<(), EditorError> {
        let mut buf = Vec::new();
        write_document(doc, &mut buf)?;
        self.bytes = Some(buf);
        Ok(())
    }

    fn load_document_state(&mut self) -> Result<Option<DocumentFile>, EditorError> {
        self.bytes.as_deref().map(read_document).transpose()
    }
}

/// Receives AI results routed to the gallery.
pub trait GallerySink {
    fn add_result(&mut self, image: &RgbaImage);
}

/// Writes each result as a numbered PNG in a directory.
pub struct DirectoryGallery {
    dir: PathBuf,
    next: u32,
}

impl DirectoryGallery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), next: 1 }
    }
}

impl GallerySink for DirectoryGallery {
    fn add_result(&mut self, image: &RgbaImage) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            crate::log_err!("Gallery: cannot create {}: {}", self.dir.display(), e);
            return;
        }
        let path = self.dir.join(format!("result_{:04}.png", self.next));
        self.next += 1;
        match encode_and_write(image, &path, SaveFormat::Png, 100) {
            Ok(()) => crate::log_info!("Gallery: wrote {}", path.display()),
            Err(e) => crate::log_err!("Gallery: failed to write {}: {}", path.display(), e),
        }
    }
}

// ============================================================================
// AUTOSAVE
// ============================================================================

/// Debounce for autosave: due once the document has stayed dirty for
/// `interval` since the first unsaved change.
#[derive(Clone, Debug)]
pub struct AutosaveTimer {
    interval: Duration,
    dirty_since: Option<Instant>,
}

impl AutosaveTimer {
    pub fn new(interval: Duration) -> Self {
        Self { interval, dirty_since: None }
    }

    pub fn mark_dirty(&mut self, now: Instant) {
        self.dirty_since.get_or_insert(now);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    pub fn due(&self, now: Instant) -> bool {
        self.dirty_since.is_some_and(|t| now.duration_since(t) >= self.interval)
    }

    pub fn mark_saved(&mut self) {
        self.dirty_since = None;
    }
}

/// Writes documents on the rayon pool; results are polled, never awaited.
pub struct BackgroundSaver {
    tx: mpsc::Sender<(u64, Result<(), String>)>,
    rx: mpsc::Receiver<(u64, Result<(), String>)>,
    next_token: u64,
    in_flight: usize,
}

impl Default for BackgroundSaver {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundSaver {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx, next_token: 0, in_flight: 0 }
    }

    pub fn submit(&mut self, doc: DocumentFile, path: PathBuf) -> u64 {
        self.next_token += 1;
        let token = self.next_token;
        let tx = self.tx.clone();
        self.in_flight += 1;
        rayon::spawn(move || {
            let result = save_document(&doc, &path).map_err(|e| e.to_string());
            let _ = tx.send((token, result));
        });
        token
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight > 0
    }

    /// Next finished save, if any.
    pub fn poll(&mut self) -> Option<(u64, Result<(), String>)> {
        let done = self.rx.try_recv().ok()?;
        self.in_flight = self.in_flight.saturating_sub(1);
        if let Err(e) = &done.1 {
            crate::log_err!("Autosave failed: {}", e);
        }
        Some(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::ShapeKind;
    use crate::canvas::Color;
    use crate::geometry::Rect;
    use image::Rgba;

    fn doc_with(layers: Vec<Layer>, bitmaps: &BitmapStore) -> DocumentFile {
        DocumentFile::new(CanvasSettings::new(100, 80), layers, std::iter::empty(), 0, bitmaps)
    }

    #[test]
    fn zero_sized_bitmap_is_empty_not_undecodable() {
        assert!(matches!(ensure_non_empty(RgbaImage::new(0, 5)), Err(EditorError::EmptyImage)));
        assert!(matches!(ensure_non_empty(RgbaImage::new(5, 0)), Err(EditorError::EmptyImage)));
        assert!(ensure_non_empty(RgbaImage::new(1, 1)).is_ok());

        assert!(matches!(decode_layer_bitmap(b"not an image"), Err(EditorError::Decode(_))));
        let png = encode_png(&RgbaImage::new(3, 2)).unwrap();
        assert_eq!(decode_layer_bitmap(&png).unwrap().dimensions(), (3, 2));
    }

    #[test]
    fn png_roundtrip() {
        let img = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 4]));
        let bytes = encode_png(&img).unwrap();
        assert_eq!(decode_image(&bytes).unwrap(), img);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(decode_image(b"not an image"), Err(EditorError::Decode(_))));
    }

    #[test]
    fn document_keeps_only_referenced_bitmaps() {
        let mut store = BitmapStore::new();
        let used = store.insert(RgbaImage::new(2, 2));
        let _unused = store.insert(RgbaImage::new(4, 4));
        let doc = doc_with(vec![Layer::image(used.clone(), Rect::new(0.0, 0.0, 2.0, 2.0))], &store);
        assert_eq!(doc.bitmaps.len(), 1);
        assert_eq!(doc.bitmaps[0].key, used);
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = BitmapStore::new();
        let layer = Layer::shape(ShapeKind::Ellipse, Rect::new(1.0, 2.0, 3.0, 4.0), Color::WHITE);
        let doc = doc_with(vec![layer], &store);
        let mut mem = MemoryDocumentStore::default();
        assert!(mem.load_document_state().unwrap().is_none());
        mem.save_document_state(&doc).unwrap();
        assert_eq!(mem.load_document_state().unwrap(), Some(doc));
    }

    #[test]
    fn oversized_canvas_is_rejected() {
        let mut doc = doc_with(Vec::new(), &BitmapStore::new());
        doc.settings.width = MAX_CANVAS_DIM + 1;
        let mut buf = Vec::new();
        write_document(&doc, &mut buf).unwrap();
        assert!(matches!(read_document(&buf), Err(EditorError::InvalidFormat(_))));
    }

    #[test]
    fn autosave_debounce() {
        let start = Instant::now();
        let mut t = AutosaveTimer::new(Duration::from_secs(30));
        assert!(!t.due(start));
        t.mark_dirty(start);
        t.mark_dirty(start + Duration::from_secs(10));
        assert!(!t.due(start + Duration::from_secs(29)));
        assert!(t.due(start + Duration::from_secs(30)));
        t.mark_saved();
        assert!(!t.due(start + Duration::from_secs(90)));
    }
}

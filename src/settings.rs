//! Editor settings persisted as a flat `key=value` config file.

use std::path::{Path, PathBuf};

use crate::canvas::Color;

/// User-tunable editor behaviour.  Distances are in screen pixels unless
/// noted; the interaction layer divides them by the zoom factor.
#[derive(Clone, Debug, PartialEq)]
pub struct EditorSettings {
    pub max_undo_steps: usize,
    /// Alignment snap distance.
    pub snap_threshold: f32,
    /// Pointer travel before a press becomes a drag (marquee, alt-duplicate).
    pub drag_threshold: f32,
    /// Travel before a shift-move decides its axis.
    pub axis_lock_threshold: f32,
    /// Canvas-space offset applied to duplicated layers.
    pub duplicate_offset: f32,
    pub rotate_snap_degrees: f32,
    /// Scale factor for capturing text/shape layers on export.
    pub export_oversample: f32,
    /// Canvas-space gap used by distribute-and-scale.
    pub distribute_gap: f32,
    /// Longest edge of the image editor's preview canvas.
    pub preview_max_edge: u32,
    pub pen_close_threshold: f32,
    /// Seconds of inactivity before an autosave fires; 0 disables it.
    pub autosave_seconds: u64,
    pub grid_size: f32,
    pub grid_color: Color,
    pub guide_color: Color,
    /// Fill for shapes drawn with the shape tool.
    pub shape_fill: Color,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            max_undo_steps: 50,
            snap_threshold: 12.0,
            drag_threshold: 3.0,
            axis_lock_threshold: 4.0,
            duplicate_offset: 20.0,
            rotate_snap_degrees: 15.0,
            export_oversample: 4.0,
            distribute_gap: 16.0,
            preview_max_edge: 1024,
            pen_close_threshold: 8.0,
            autosave_seconds: 30,
            grid_size: 20.0,
            grid_color: Color::rgba(0, 0, 0, 40),
            guide_color: Color::rgba(255, 0, 170, 255),
            shape_fill: Color::rgb(74, 144, 226),
        }
    }
}

impl EditorSettings {
    pub(crate) fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            let config_dir = PathBuf::from(appdata).join("ComposeFE");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join("composefe_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            let config_dir = PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("ComposeFE");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join("composefe_settings.cfg"));
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("composefe");
            let _ = std::fs::create_dir_all(&config_dir);
            Some(config_dir.join("composefe_settings.cfg"))
        }
    }

    /// Write settings to the platform config file.
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        if let Err(e) = self.save_to(&path) {
            crate::log_warn!("Could not save settings to {}: {}", path.display(), e);
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_config_string())
    }

    /// Load settings from disk (returns default if file missing or corrupt)
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    /// Parse `key=value` lines on top of the defaults.  Unknown keys and bad
    /// values are skipped so an old or hand-edited file still loads.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "max_undo_steps" => s.max_undo_steps = val.parse().unwrap_or(s.max_undo_steps).max(1),
                "snap_threshold" => s.snap_threshold = parse_non_negative(val, s.snap_threshold),
                "drag_threshold" => s.drag_threshold = parse_non_negative(val, s.drag_threshold),
                "axis_lock_threshold" => {
                    s.axis_lock_threshold = parse_non_negative(val, s.axis_lock_threshold)
                }
                "duplicate_offset" => s.duplicate_offset = val.parse().unwrap_or(s.duplicate_offset),
                "rotate_snap_degrees" => {
                    s.rotate_snap_degrees = parse_non_negative(val, s.rotate_snap_degrees)
                }
                "export_oversample" => {
                    s.export_oversample = parse_non_negative(val, s.export_oversample).max(1.0)
                }
                "distribute_gap" => s.distribute_gap = parse_non_negative(val, s.distribute_gap),
                "preview_max_edge" => {
                    s.preview_max_edge = val.parse().unwrap_or(s.preview_max_edge).max(16)
                }
                "pen_close_threshold" => {
                    s.pen_close_threshold = parse_non_negative(val, s.pen_close_threshold)
                }
                "autosave_seconds" => s.autosave_seconds = val.parse().unwrap_or(s.autosave_seconds),
                "grid_size" => s.grid_size = parse_non_negative(val, s.grid_size).max(1.0),
                "grid_color" => {
                    if let Some(c) = Color::from_hex(val) {
                        s.grid_color = c;
                    }
                }
                "guide_color" => {
                    if let Some(c) = Color::from_hex(val) {
                        s.guide_color = c;
                    }
                }
                "shape_fill" => {
                    if let Some(c) = Color::from_hex(val) {
                        s.shape_fill = c;
                    }
                }
                _ => {}
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "max_undo_steps={}\n\
             snap_threshold={}\n\
             drag_threshold={}\n\
             axis_lock_threshold={}\n\
             duplicate_offset={}\n\
             rotate_snap_degrees={}\n\
             export_oversample={}\n\
             distribute_gap={}\n\
             preview_max_edge={}\n\
             pen_close_threshold={}\n\
             autosave_seconds={}\n\
             grid_size={}\n\
             grid_color={}\n\
             guide_color={}\n\
             shape_fill={}\n",
            self.max_undo_steps,
            self.snap_threshold,
            self.drag_threshold,
            self.axis_lock_threshold,
            self.duplicate_offset,
            self.rotate_snap_degrees,
            self.export_oversample,
            self.distribute_gap,
            self.preview_max_edge,
            self.pen_close_threshold,
            self.autosave_seconds,
            self.grid_size,
            self.grid_color.to_hex(),
            self.guide_color.to_hex(),
            self.shape_fill.to_hex(),
        )
    }
}

fn parse_non_negative(val: &str, fallback: f32) -> f32 {
    match val.parse::<f32>() {
        Ok(v) if v.is_finite() && v >= 0.0 => v,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_defaults_for_garbage() {
        let s = EditorSettings::parse("snap_threshold=abc\nmax_undo_steps=7\nnonsense\nfoo=bar\n");
        assert_eq!(s.snap_threshold, 12.0);
        assert_eq!(s.max_undo_steps, 7);
    }

    #[test]
    fn config_string_reparses_identically() {
        let mut s = EditorSettings::default();
        s.duplicate_offset = 8.0;
        s.guide_color = Color::rgba(1, 2, 3, 4);
        assert_eq!(EditorSettings::parse(&s.to_config_string()), s);
    }
}

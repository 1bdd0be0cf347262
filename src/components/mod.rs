pub mod history;
pub mod image_editor;
pub mod snapping;
pub mod tools;

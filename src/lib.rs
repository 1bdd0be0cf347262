//! ComposeFE: a layer composition engine.
//!
//! A document is an ordered stack of image, text and shape layers on a fixed
//! canvas.  [`project::DocumentSession`] owns the layer store, history and
//! bitmaps; [`components::tools::InteractionController`] turns pointer input
//! into live edits; [`compositor`] renders; [`components::image_editor`]
//! is the separate raster editing session.

#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]

pub mod logger;

pub mod canvas;
pub mod cli;
pub mod components;
pub mod compositor;
pub mod geometry;
pub mod io;
pub mod ops;
pub mod project;
pub mod selection;
pub mod settings;

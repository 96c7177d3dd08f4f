//! Core groupsnap library (configuration, image compositing).

pub mod config;
pub mod images;

//! Batch analysis of fluorescence microscopy plates.
//!
//! A project ([config::ProjectSettings]) lists pipelines of image commands.
//! The [processor::Processor] runs every active pipeline over each
//! iteration (tile, T, Z) of every image found in the plate folder; the
//! objects and validity flags found are written to a
//! [sink::ResultSink].

pub mod cache;
pub mod classes;
pub mod commands;
pub mod config;
pub mod context;
pub mod contour_funcs;
pub mod edm;
pub mod error;
pub mod file_grouper;
pub mod histogram_funcs;
pub mod image_funcs;
pub mod initializer;
pub mod loader;
pub mod maximum_finder;
pub mod object_list;
pub mod perimeter;
pub mod plane;
pub mod processor;
pub mod rank_filter;
pub mod roi;
pub mod rolling_ball;
pub mod sink;
pub mod spatial_index;

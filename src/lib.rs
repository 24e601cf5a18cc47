//! # Kidney CT scan classifier
//!
//! A stage-based transfer-learning pipeline: download and unpack a labelled
//! image archive, build a VGG16-style backbone with a fresh classifier head,
//! fine-tune it, evaluate it and publish the result to an experiment
//! tracker. A trained model then serves single-image predictions.
//!
//! ## Architecture
//!
//! - **config**: YAML documents, typed stage records, CLI
//! - **ingest**: resilient download and archive extraction
//! - **data**: image folders, batch iterators, augmentation
//! - **model**: the `Classifier` capability and the native `Network`
//! - **stages**: the four stage components, their runners and the driver
//! - **tracking**: file and MLflow experiment trackers
//! - **predict**: single-image inference and its HTTP front end
//! - **logging**: stdout and file sinks

pub mod config;
pub mod data;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod predict;
pub mod stages;
pub mod tracking;

pub use error::{Error, Result};

//! Training and evaluation of a CNN-LSTM classifier for human movement
//! sequences.

#![deny(unsafe_code, rust_2018_idioms, rust_2021_compatibility)]
#![warn(missing_docs)]

pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod model;
pub mod plot;
pub mod train;

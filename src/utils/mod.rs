//! Utilities outside the solving core

pub mod data_loader;

pub use data_loader::{frame_to_matrix, DataLoader};

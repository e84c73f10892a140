#![doc = include_str!("../README.md")]

mod config;
mod error;
mod generator;
mod registry;
mod segment;

pub use crate::config::*;
pub use crate::error::*;
pub use crate::generator::*;
pub use crate::registry::*;
pub use crate::segment::*;

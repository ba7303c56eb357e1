#![doc = include_str!("../README.md")]

mod bytes;
mod error;

pub mod calibration;
pub mod decom;
pub mod framing;
pub mod mib;
pub mod parameter;
pub mod spacepacket;
pub mod timecode;

pub use error::{Error, Result};

//! Color and proximity telemetry for a TCS3472 color sensor and a VL53L0X
//! time-of-flight sensor on two separate I2C buses.
//!
//! The acquisition unit samples both sensors, runs the auto-gain loop,
//! classifies the color and drives the proximity LED. The latest reading is
//! handed to the network reporter through a single-slot queue, so a slow or
//! hung HTTP request never holds up sensor acquisition.

#![cfg_attr(not(test), no_std)]

pub mod classify;
pub mod clock;
pub mod color;
pub mod config;
pub mod distance;
pub mod http;
pub mod indicator;
pub mod link;
pub mod pipeline;
pub mod queue;
pub mod reading;
pub mod report;

#[cfg(test)]
mod testing;

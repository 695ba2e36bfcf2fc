//! TeraPy core: measurement sequencing and post-processing for terahertz
//! time-domain spectroscopy.
//!
//! A measurement is described by a tree of events (see [`events`]). Shape
//! inference turns the tree into NaN-filled [`data_container::DataArray`]s,
//! and the [`worker`] runs the tree against the devices of a
//! [`config::CoreContext`] while reporting progress on the [`bus`].
//! Finished arrays go to the history, where [`filters`] banks post-process
//! them. Event trees, filter banks, devices and settings are persisted as XML
//! by [`serializer`]; arrays are written by the formats in [`io`].

pub mod bus;
pub mod config;
pub mod data_container;
pub mod devices;
pub mod error;
pub mod events;
pub mod filters;
pub mod io;
pub mod math_tools;
pub mod serializer;
pub mod units;
pub mod worker;

#[cfg(test)]
mod scenarios;

pub use error::{Result, TerapyError};

//! Scrape pipeline of the Modbus exporter.
//!
//! A scrape goes through the following stages:
//!
//! - [`workload`]: resolve a [`DeviceProfile`] into numerically addressed
//!   [`DataUnit`]s grouped by [`Device`].
//! - [`reader`]: connect to the target once per device group and read every
//!   unit, all-or-nothing.
//! - [`decode`]: turn raw register bytes into numbers according to data type,
//!   byte order and word order.
//! - [`collector`]: assemble labeled [`Sample`]s and hand them to a
//!   [`MetricsSink`].
//!
//! [`SafeConfig`] holds the current [`DeviceProfiles`] and lets a reload swap
//! them while scrapes are in flight.

pub mod collector;
pub mod decode;
pub mod duration;
pub mod error;
pub mod profile;
pub mod reader;
pub mod store;
pub mod transport;
pub mod workload;

pub use collector::{MetricsSink, Sample, SampleKind, ScrapeSummary, collect};
pub use error::{Result, ScrapeError};
pub use profile::{
    ByteOrder, DataType, DeviceProfile, DeviceProfiles, FunctionCode, RegisterDescriptor,
    UnknownVariant, WordOrder,
};
pub use store::SafeConfig;
pub use transport::{Payload, Session, SessionError, TcpTransport, Transport};
pub use workload::{DataUnit, Device, Workload, build_workload};

//! # Field Master Pro control library
//!
//! Remote control and trace capture for Anritsu Field Master Pro spectrum
//! analyzers over their SCPI-over-TCP remote interface (port 9001). The
//! library is shared between the `field-master` CLI and anything else that
//! wants programmatic access to the instrument.
//!
//! ## Crate structure
//!
//! - **`config`**: loading and validating settings from TOML files. See
//!   [`config::Settings`].
//! - **`error`**: the [`error::FmError`] enum for centralized error
//!   handling.
//! - **`instrument`**: the SCPI session client (real and mock) and the
//!   typed [`instrument::FieldMasterPro`] driver.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`parameter`**: the [`parameter::Parameter`] abstraction used for
//!   the instrument's settable quantities.
//! - **`sweep`**: single-sweep orchestration and CSV export.
//! - **`validation`**: small helpers for semantic configuration checks.

pub mod config;
pub mod error;
pub mod instrument;
pub mod logging;
pub mod parameter;
pub mod sweep;
pub mod validation;

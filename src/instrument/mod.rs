//! Instrument communication.
//!
//! Two layers: `scpi` owns the TCP session and the line protocol, and
//! `field_master` builds the typed Field Master Pro driver on top of it.

pub mod field_master;
pub mod scpi;

pub use field_master::{
    FieldMasterPro, SweepSetup, TraceData, TraceMode, TraceNumber, TraceType, TRACE_SLOTS,
};
pub use scpi::{MockScpiClient, ScpiClient, ScpiOps};

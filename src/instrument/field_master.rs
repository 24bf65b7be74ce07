//! Field Master Pro driver.
//!
//! Typed remote control for the Anritsu Field Master Pro spectrum analyzer
//! over its SCPI remote interface. The driver exposes:
//!
//! - the sweep setup as validated [`Parameter`]s (start/stop frequency,
//!   reference level, vertical scale, resolution bandwidth),
//! - trace management (type, mode, clearing) for the six trace slots,
//! - sweep control (abort, continuous on/off, single sweep launch),
//! - trace readout parsed into numeric series.
//!
//! Units follow the instrument front panel: frequencies in GHz at the API,
//! converted to Hz exactly once at the wire boundary; amplitudes in dBm and
//! dB/div; RBW in Hz.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::config::InstrumentSettings;
use crate::error::{AppResult, FmError};
use crate::instrument::scpi::{MockScpiClient, ScpiClient, ScpiOps};
use crate::parameter::Parameter;

// =============================================================================
// Trace identifiers and attributes
// =============================================================================

/// Number of trace slots on the instrument.
pub const TRACE_SLOTS: usize = 6;

/// A validated trace slot number (1..=6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceNumber(u8);

impl TraceNumber {
    /// Trace slot 1, the conventional slot for single-sweep captures.
    pub const ONE: TraceNumber = TraceNumber(1);

    /// Validate a raw slot number.
    pub fn new(n: u8) -> AppResult<Self> {
        if (1..=TRACE_SLOTS as u8).contains(&n) {
            Ok(TraceNumber(n))
        } else {
            Err(FmError::InvalidTraceNumber(n))
        }
    }

    /// All six slots in ascending order.
    pub fn all() -> impl Iterator<Item = TraceNumber> {
        (1..=TRACE_SLOTS as u8).map(TraceNumber)
    }

    /// The raw slot number.
    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for TraceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a trace slot accumulates sweep data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceType {
    /// Overwrite with each sweep (instrument mnemonic `NORMal`).
    ClearWrite,
    /// Keep the minimum across sweeps.
    MinHold,
    /// Keep the maximum across sweeps.
    MaxHold,
    /// Running average across sweeps.
    Average,
}

impl TraceType {
    /// The SCPI mnemonic for this type.
    pub fn mnemonic(self) -> &'static str {
        match self {
            TraceType::ClearWrite => "NORMal",
            TraceType::MinHold => "MINimum",
            TraceType::MaxHold => "MAXimum",
            TraceType::Average => "AVERage",
        }
    }
}

/// Whether a trace slot is updating, frozen, or cleared.
///
/// The instrument only knows updating (`TRACe{n}:UPDate 1`) and held
/// (`UPDate 0`) states; there is no true blank command. `Blank` is modeled
/// as held plus `TRACe:CLEar`, which is what the front panel does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
    /// Updated on every sweep.
    Active,
    /// Frozen at its current contents.
    Hold,
    /// Frozen and cleared.
    Blank,
}

/// One trace slot's samples in dBm. Empty when the slot is inactive.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceData {
    /// The slot this trace came from.
    pub number: TraceNumber,
    /// Amplitude samples in dBm, one per display point.
    pub samples: Vec<f64>,
}

impl TraceData {
    fn empty(number: TraceNumber) -> Self {
        Self {
            number,
            samples: Vec::new(),
        }
    }

    /// Whether the slot produced no data.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// =============================================================================
// Sweep setup
// =============================================================================

/// The main instrument parameters applied as one unit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SweepSetup {
    /// Start frequency (GHz).
    pub start_ghz: f64,
    /// Stop frequency (GHz).
    pub stop_ghz: f64,
    /// Reference level: the top amplitude limit (dBm).
    pub ref_level_dbm: f64,
    /// Vertical scale (dB/division).
    pub scale_db_per_div: f64,
    /// Resolution bandwidth (Hz).
    pub rbw_hz: f64,
}

// =============================================================================
// FieldMasterPro
// =============================================================================

/// Driver for the Anritsu Field Master Pro spectrum analyzer.
///
/// # Example
///
/// ```rust,ignore
/// let fmp = FieldMasterPro::with_mock().await?;
///
/// fmp.start_freq_ghz().set(2.0).await?;
/// fmp.stop_freq_ghz().set(4.5).await?;
///
/// fmp.set_trace_type(TraceNumber::ONE, TraceType::ClearWrite).await?;
/// fmp.set_trace_mode(TraceNumber::ONE, TraceMode::Active).await?;
///
/// fmp.start_sweep().await?;
/// let trace = fmp.trace(TraceNumber::ONE).await?;
/// ```
pub struct FieldMasterPro {
    /// SCPI client for communication
    client: Arc<dyn ScpiOps>,

    /// Start frequency (GHz)
    start_freq_ghz: Parameter<f64>,
    /// Stop frequency (GHz)
    stop_freq_ghz: Parameter<f64>,
    /// Reference level (dBm)
    ref_level_dbm: Parameter<f64>,
    /// Vertical scale (dB/division)
    scale_db_per_div: Parameter<f64>,
    /// Resolution bandwidth (Hz)
    rbw_hz: Parameter<f64>,
}

impl FieldMasterPro {
    /// Connect to the instrument and bring it to a known state.
    ///
    /// Validates the session with `*IDN?` and blanks all six traces, the
    /// same bring-up the front-panel preset performs.
    pub async fn connect(
        host: &str,
        port: u16,
        command_timeout: Duration,
        settle: Duration,
    ) -> AppResult<Arc<Self>> {
        let mut client = ScpiClient::connect(host, port).await?;
        client.set_timeout(command_timeout);
        client.set_settle(settle);
        Self::bring_up(Arc::new(client)).await
    }

    /// Create a driver backed by the in-memory mock instrument.
    pub async fn with_mock() -> AppResult<Arc<Self>> {
        tracing::info!("Creating mock Field Master Pro driver");
        Self::bring_up(Arc::new(MockScpiClient::new())).await
    }

    /// Build a driver from the `[instrument]` configuration section.
    pub async fn from_settings(settings: &InstrumentSettings) -> AppResult<Arc<Self>> {
        if settings.mock {
            Self::with_mock().await
        } else {
            Self::connect(
                &settings.host,
                settings.port,
                settings.command_timeout(),
                settings.settle(),
            )
            .await
        }
    }

    async fn bring_up(client: Arc<dyn ScpiOps>) -> AppResult<Arc<Self>> {
        let driver = Arc::new(Self::build(client));

        let idn = driver.identify().await?;
        tracing::info!("Instrument identified: {idn}");

        driver.blank_all_traces().await?;
        Ok(driver)
    }

    /// Build the driver around a SCPI client.
    fn build(client: Arc<dyn ScpiOps>) -> Self {
        let mut start_freq_ghz = Parameter::new("start_freq_ghz", 1.0)
            .with_description("Start frequency")
            .with_unit("GHz")
            .with_range(0.0, 54.0);

        let mut stop_freq_ghz = Parameter::new("stop_freq_ghz", 2.0)
            .with_description("Stop frequency")
            .with_unit("GHz")
            .with_range(0.0, 54.0);

        let mut ref_level_dbm = Parameter::new("ref_level_dbm", -10.0)
            .with_description("Reference level (top amplitude limit)")
            .with_unit("dBm")
            .with_range(-150.0, 30.0);

        let mut scale_db_per_div = Parameter::new("scale_db_per_div", 10.0)
            .with_description("Vertical scale")
            .with_unit("dB/div")
            .with_range(0.1, 20.0);

        let mut rbw_hz = Parameter::new("rbw_hz", 30_000.0)
            .with_description("Resolution bandwidth")
            .with_unit("Hz")
            .with_range(1.0, 20.0e6);

        Self::attach_start_freq(&mut start_freq_ghz, client.clone());
        Self::attach_stop_freq(&mut stop_freq_ghz, client.clone());
        Self::attach_ref_level(&mut ref_level_dbm, client.clone());
        Self::attach_scale(&mut scale_db_per_div, client.clone());
        Self::attach_rbw(&mut rbw_hz, client.clone());

        Self {
            client,
            start_freq_ghz,
            stop_freq_ghz,
            ref_level_dbm,
            scale_db_per_div,
            rbw_hz,
        }
    }

    // =========================================================================
    // Hardware callbacks
    // =========================================================================

    fn attach_start_freq(param: &mut Parameter<f64>, client: Arc<dyn ScpiOps>) {
        param.connect_to_hardware_write(move |ghz: f64| {
            let client = client.clone();
            Box::pin(async move { client.write(&format!("FREQ:STAR {}", ghz * 1.0e9)).await })
        });
    }

    fn attach_stop_freq(param: &mut Parameter<f64>, client: Arc<dyn ScpiOps>) {
        param.connect_to_hardware_write(move |ghz: f64| {
            let client = client.clone();
            Box::pin(async move { client.write(&format!("FREQ:STOP {}", ghz * 1.0e9)).await })
        });
    }

    fn attach_ref_level(param: &mut Parameter<f64>, client: Arc<dyn ScpiOps>) {
        param.connect_to_hardware_write(move |dbm: f64| {
            let client = client.clone();
            Box::pin(async move {
                client
                    .write(&format!("DISP:WIND:TRAC:Y:SCAL:RLEV {dbm}"))
                    .await
            })
        });
    }

    fn attach_scale(param: &mut Parameter<f64>, client: Arc<dyn ScpiOps>) {
        param.connect_to_hardware_write(move |db: f64| {
            let client = client.clone();
            Box::pin(async move {
                client
                    .write(&format!("DISP:WINDow:TRACe:Y:PDIVision {db}"))
                    .await
            })
        });
    }

    fn attach_rbw(param: &mut Parameter<f64>, client: Arc<dyn ScpiOps>) {
        param.connect_to_hardware_write(move |hz: f64| {
            let client = client.clone();
            Box::pin(async move { client.write(&format!("BAND:RES {hz} Hz")).await })
        });
    }

    // =========================================================================
    // Parameter accessors
    // =========================================================================

    /// Start frequency parameter (GHz).
    pub fn start_freq_ghz(&self) -> &Parameter<f64> {
        &self.start_freq_ghz
    }

    /// Stop frequency parameter (GHz).
    pub fn stop_freq_ghz(&self) -> &Parameter<f64> {
        &self.stop_freq_ghz
    }

    /// Reference level parameter (dBm).
    pub fn ref_level_dbm(&self) -> &Parameter<f64> {
        &self.ref_level_dbm
    }

    /// Vertical scale parameter (dB/div).
    pub fn scale_db_per_div(&self) -> &Parameter<f64> {
        &self.scale_db_per_div
    }

    /// Resolution bandwidth parameter (Hz).
    pub fn rbw_hz(&self) -> &Parameter<f64> {
        &self.rbw_hz
    }

    /// Apply the main instrument parameters in one call.
    pub async fn apply_setup(&self, setup: &SweepSetup) -> AppResult<()> {
        self.start_freq_ghz.set(setup.start_ghz).await?;
        self.stop_freq_ghz.set(setup.stop_ghz).await?;
        self.ref_level_dbm.set(setup.ref_level_dbm).await?;
        self.scale_db_per_div.set(setup.scale_db_per_div).await?;
        self.rbw_hz.set(setup.rbw_hz).await?;
        Ok(())
    }

    // =========================================================================
    // Hardware queries
    // =========================================================================

    /// Identify the instrument (`*IDN?`).
    pub async fn identify(&self) -> AppResult<String> {
        self.client.query("*IDN?").await
    }

    /// Read the start frequency from hardware (GHz).
    pub async fn query_start_freq_ghz(&self) -> AppResult<f64> {
        let ghz = self.client.query_f64("FREQ:STAR?").await? / 1.0e9;
        self.start_freq_ghz.cache(ghz);
        Ok(ghz)
    }

    /// Read the stop frequency from hardware (GHz).
    pub async fn query_stop_freq_ghz(&self) -> AppResult<f64> {
        let ghz = self.client.query_f64("FREQ:STOP?").await? / 1.0e9;
        self.stop_freq_ghz.cache(ghz);
        Ok(ghz)
    }

    /// Read the reference level from hardware (dBm).
    pub async fn query_ref_level_dbm(&self) -> AppResult<f64> {
        let dbm = self.client.query_f64("DISP:WIND:TRAC:Y:SCAL:RLEV?").await?;
        self.ref_level_dbm.cache(dbm);
        Ok(dbm)
    }

    /// Read the vertical scale from hardware (dB/div).
    pub async fn query_scale_db_per_div(&self) -> AppResult<f64> {
        let db = self
            .client
            .query_f64("DISP:WINDow:TRACe:Y:PDIVision?")
            .await?;
        self.scale_db_per_div.cache(db);
        Ok(db)
    }

    /// Read the resolution bandwidth from hardware (Hz).
    pub async fn query_rbw_hz(&self) -> AppResult<f64> {
        let hz = self.client.query_f64("BAND:RES?").await?;
        self.rbw_hz.cache(hz);
        Ok(hz)
    }

    /// Read the full sweep setup back from hardware.
    pub async fn current_setup(&self) -> AppResult<SweepSetup> {
        Ok(SweepSetup {
            start_ghz: self.query_start_freq_ghz().await?,
            stop_ghz: self.query_stop_freq_ghz().await?,
            ref_level_dbm: self.query_ref_level_dbm().await?,
            scale_db_per_div: self.query_scale_db_per_div().await?,
            rbw_hz: self.query_rbw_hz().await?,
        })
    }

    /// Number of points per trace on the display.
    pub async fn display_points(&self) -> AppResult<u32> {
        self.client.query_u32("DISP:POIN?").await
    }

    // =========================================================================
    // Trace management
    // =========================================================================

    /// Set how a trace slot accumulates sweep data.
    pub async fn set_trace_type(&self, number: TraceNumber, trace_type: TraceType) -> AppResult<()> {
        self.client
            .write(&format!("TRACe{number}:TYPE {}", trace_type.mnemonic()))
            .await
    }

    /// Set a trace slot's update mode.
    pub async fn set_trace_mode(&self, number: TraceNumber, mode: TraceMode) -> AppResult<()> {
        match mode {
            TraceMode::Active => self.client.write(&format!("TRACe{number}:UPDate 1")).await,
            TraceMode::Hold => self.client.write(&format!("TRACe{number}:UPDate 0")).await,
            TraceMode::Blank => {
                self.client.write(&format!("TRACe{number}:UPDate 0")).await?;
                self.client.write(&format!("TRACe:CLEar {number}")).await
            }
        }
    }

    /// Return every trace slot to clear/write type and blank it.
    pub async fn blank_all_traces(&self) -> AppResult<()> {
        for number in TraceNumber::all() {
            self.set_trace_type(number, TraceType::ClearWrite).await?;
            self.set_trace_mode(number, TraceMode::Blank).await?;
        }
        Ok(())
    }

    /// Number of sweeps a trace slot has accumulated.
    pub async fn sweep_count(&self, number: TraceNumber) -> AppResult<u32> {
        self.client
            .query_u32(&format!("TRACe{number}:SWEep:COUNt?"))
            .await
    }

    // =========================================================================
    // Sweep control
    // =========================================================================

    /// Abort any sweep in progress.
    pub async fn abort(&self) -> AppResult<()> {
        self.client.write("ABORT").await
    }

    /// Turn continuous sweep mode on or off.
    pub async fn set_continuous(&self, on: bool) -> AppResult<()> {
        let cmd = if on { "INIT:CONT ON" } else { "INIT:CONT OFF" };
        self.client.write(cmd).await
    }

    /// Start a measurement sweep.
    pub async fn start_sweep(&self) -> AppResult<()> {
        self.client.write("INIT").await
    }

    // =========================================================================
    // Trace readout
    // =========================================================================

    /// Fetch one trace slot's data.
    ///
    /// An inactive slot yields a warning and an empty trace, never an
    /// error, so fetching all six slots is always safe.
    pub async fn trace(&self, number: TraceNumber) -> AppResult<TraceData> {
        let response = self.client.query(&format!("TRACE:DATA? {number}")).await?;
        match parse_trace_payload(&response) {
            Some(samples) => Ok(TraceData { number, samples }),
            None => {
                tracing::warn!("Trace {number} is not active");
                Ok(TraceData::empty(number))
            }
        }
    }

    /// Fetch all six trace slots in order.
    pub async fn traces(&self) -> AppResult<Vec<TraceData>> {
        let mut all = Vec::with_capacity(TRACE_SLOTS);
        for number in TraceNumber::all() {
            all.push(self.trace(number).await?);
        }
        Ok(all)
    }
}

/// Parse a `TRACE:DATA?` response.
///
/// The payload is `<measurement-code>,<v1>,<v2>,...`; the leading code field
/// is dropped. Returns `None` when the response has no payload or contains
/// non-numeric samples, which is how the instrument answers for a slot that
/// is not active.
fn parse_trace_payload(response: &str) -> Option<Vec<f64>> {
    let (_code, samples) = response.split_once(',')?;
    samples
        .split(',')
        .map(|s| s.trim().parse::<f64>().ok())
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::scpi::{MOCK_DISPLAY_POINTS, MOCK_IDN};

    #[test]
    fn trace_numbers_are_validated() {
        assert!(TraceNumber::new(0).is_err());
        assert!(TraceNumber::new(7).is_err());
        assert_eq!(TraceNumber::new(3).unwrap().get(), 3);
        assert_eq!(TraceNumber::all().count(), TRACE_SLOTS);
    }

    #[test]
    fn trace_type_mnemonics() {
        assert_eq!(TraceType::ClearWrite.mnemonic(), "NORMal");
        assert_eq!(TraceType::MinHold.mnemonic(), "MINimum");
        assert_eq!(TraceType::MaxHold.mnemonic(), "MAXimum");
        assert_eq!(TraceType::Average.mnemonic(), "AVERage");
    }

    #[test]
    fn trace_payload_parsing() {
        assert_eq!(
            parse_trace_payload("NORMal,-70.5,-68.2,-71.0"),
            Some(vec![-70.5, -68.2, -71.0])
        );
        // No payload: inactive slot.
        assert_eq!(parse_trace_payload(""), None);
        // Code field only, no samples.
        assert_eq!(parse_trace_payload("NORMal,"), None);
        // Garbage samples.
        assert_eq!(parse_trace_payload("NORMal,abc,1.0"), None);
    }

    #[tokio::test]
    async fn mock_driver_identifies() {
        let fmp = FieldMasterPro::with_mock().await.unwrap();
        assert_eq!(fmp.identify().await.unwrap(), MOCK_IDN);
    }

    #[tokio::test]
    async fn apply_setup_round_trips_through_hardware() {
        let fmp = FieldMasterPro::with_mock().await.unwrap();

        let setup = SweepSetup {
            start_ghz: 2.0,
            stop_ghz: 4.5,
            ref_level_dbm: -20.0,
            scale_db_per_div: 5.0,
            rbw_hz: 100_000.0,
        };
        fmp.apply_setup(&setup).await.unwrap();

        assert_eq!(fmp.current_setup().await.unwrap(), setup);
        // Cached values track the applied setup.
        assert_eq!(fmp.start_freq_ghz().get(), 2.0);
        assert_eq!(fmp.rbw_hz().get(), 100_000.0);
    }

    #[tokio::test]
    async fn out_of_range_setup_is_rejected_before_the_wire() {
        let fmp = FieldMasterPro::with_mock().await.unwrap();

        let before = fmp.query_start_freq_ghz().await.unwrap();
        assert!(fmp.start_freq_ghz().set(99.0).await.is_err());
        assert_eq!(fmp.query_start_freq_ghz().await.unwrap(), before);
    }

    #[tokio::test]
    async fn bring_up_blanks_all_traces() {
        let fmp = FieldMasterPro::with_mock().await.unwrap();

        for trace in fmp.traces().await.unwrap() {
            assert!(trace.is_empty());
        }
    }

    #[tokio::test]
    async fn single_sweep_fills_active_trace() {
        let fmp = FieldMasterPro::with_mock().await.unwrap();

        fmp.set_trace_type(TraceNumber::ONE, TraceType::ClearWrite)
            .await
            .unwrap();
        fmp.set_trace_mode(TraceNumber::ONE, TraceMode::Active)
            .await
            .unwrap();

        assert_eq!(fmp.sweep_count(TraceNumber::ONE).await.unwrap(), 0);
        fmp.start_sweep().await.unwrap();
        assert_eq!(fmp.sweep_count(TraceNumber::ONE).await.unwrap(), 1);

        let trace = fmp.trace(TraceNumber::ONE).await.unwrap();
        assert_eq!(trace.samples.len(), MOCK_DISPLAY_POINTS as usize);

        // The other slots stayed blank.
        let two = TraceNumber::new(2).unwrap();
        assert!(fmp.trace(two).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blanking_clears_a_filled_trace() {
        let fmp = FieldMasterPro::with_mock().await.unwrap();

        fmp.set_trace_mode(TraceNumber::ONE, TraceMode::Active)
            .await
            .unwrap();
        fmp.start_sweep().await.unwrap();
        assert!(!fmp.trace(TraceNumber::ONE).await.unwrap().is_empty());

        fmp.set_trace_mode(TraceNumber::ONE, TraceMode::Blank)
            .await
            .unwrap();
        assert!(fmp.trace(TraceNumber::ONE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn display_points_reports_the_trace_length() {
        let fmp = FieldMasterPro::with_mock().await.unwrap();
        assert_eq!(fmp.display_points().await.unwrap(), MOCK_DISPLAY_POINTS);
    }
}

//! SCPI over TCP communication for the Field Master Pro.
//!
//! The analyzer exposes a line-based SCPI dialect on TCP port 9001 (the
//! classic telnet-style remote interface). This module provides the async
//! client for that session: connection management, command/query operations
//! and response parsing, plus a mock client that simulates enough of the
//! instrument for tests and offline development.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::error::{AppResult, FmError};

/// Remote command port on Anritsu analyzers.
pub const DEFAULT_PORT: u16 = 9001;

/// Default per-query response timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default settle delay after a fire-and-forget command, in milliseconds.
pub const DEFAULT_SETTLE_MS: u64 = 50;

// =============================================================================
// ScpiOps
// =============================================================================

/// Object-safe facade over SCPI client operations (allows mock injection).
#[async_trait]
pub trait ScpiOps: Send + Sync {
    /// Send a command without expecting a response.
    async fn write(&self, command: &str) -> AppResult<()>;

    /// Send a query and read one line of response, trimmed.
    async fn query(&self, query: &str) -> AppResult<String>;

    /// Query a floating-point value.
    async fn query_f64(&self, query: &str) -> AppResult<f64> {
        let response = self.query(query).await?;
        response.parse::<f64>().map_err(|_| FmError::Protocol {
            query: query.to_string(),
            response,
        })
    }

    /// Query an unsigned integer value.
    async fn query_u32(&self, query: &str) -> AppResult<u32> {
        let response = self.query(query).await?;
        response.parse::<u32>().map_err(|_| FmError::Protocol {
            query: query.to_string(),
            response,
        })
    }
}

// =============================================================================
// ScpiClient
// =============================================================================

/// Async SCPI client for the analyzer's TCP remote interface.
///
/// All traffic is serialized through a mutex: the protocol has no framing
/// beyond newlines, so one command must be fully answered before the next
/// goes out.
pub struct ScpiClient {
    stream: Mutex<BufReader<TcpStream>>,
    timeout: Duration,
    settle: Duration,
}

impl ScpiClient {
    /// Connect to the instrument at `host:port`.
    ///
    /// Applies a 5 s connection timeout and disables Nagle's algorithm.
    pub async fn connect(host: &str, port: u16) -> AppResult<Self> {
        let addr = format!("{host}:{port}");

        let stream = timeout(Duration::from_secs(5), TcpStream::connect(&addr))
            .await
            .map_err(|_| FmError::Instrument(format!("Connection timeout to {addr}")))??;

        stream.set_nodelay(true)?;

        tracing::info!("Connected to analyzer at {addr}");

        Ok(Self {
            stream: Mutex::new(BufReader::new(stream)),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
        })
    }

    /// Set the per-query response timeout.
    pub fn set_timeout(&mut self, duration: Duration) {
        self.timeout = duration;
    }

    /// Set the settle delay applied after fire-and-forget commands.
    pub fn set_settle(&mut self, duration: Duration) {
        self.settle = duration;
    }

    async fn send(stream: &mut BufReader<TcpStream>, command: &str) -> AppResult<()> {
        let line = format!("{command}\n");
        stream.get_mut().write_all(line.as_bytes()).await?;
        stream.get_mut().flush().await?;
        Ok(())
    }

    /// Send a command without expecting a response.
    ///
    /// Set commands are not acknowledged by the instrument; a short settle
    /// delay gives it time to apply the value before the next command.
    pub async fn write(&self, command: &str) -> AppResult<()> {
        let mut stream = self.stream.lock().await;

        tracing::debug!("SCPI write: {command:?}");
        Self::send(&mut stream, command).await?;

        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    /// Send a query and read the response line.
    pub async fn query(&self, query: &str) -> AppResult<String> {
        let mut stream = self.stream.lock().await;

        // Drop anything a previous command left behind.
        Self::flush_input_buffer(&mut stream).await;

        tracing::debug!("SCPI query: {query:?}");
        Self::send(&mut stream, query).await?;

        let mut response = String::new();
        match timeout(self.timeout, stream.read_line(&mut response)).await {
            Ok(Ok(0)) => Err(FmError::Instrument(
                "Connection closed by instrument".to_string(),
            )),
            Ok(Ok(_)) => {
                let trimmed = response.trim().to_string();
                tracing::debug!("SCPI response: {trimmed:?}");
                Ok(trimmed)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(FmError::CommandTimeout(query.to_string())),
        }
    }

    /// Clear any pending data from the input buffer.
    async fn flush_input_buffer(stream: &mut BufReader<TcpStream>) {
        // Consume whatever sits in the BufReader's internal buffer.
        let buffered = stream.buffer().len();
        if buffered > 0 {
            tracing::debug!("Flushing {buffered} buffered bytes");
            stream.consume(buffered);
        }

        // Then drain anything already delivered to the socket.
        let mut peek_buf = [0u8; 256];
        loop {
            match timeout(
                Duration::from_millis(10),
                stream.get_mut().peek(&mut peek_buf),
            )
            .await
            {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => {
                    let mut discard = vec![0u8; n];
                    let _ = stream.get_mut().try_read(&mut discard);
                    tracing::debug!("Flushed {n} stale bytes from stream");
                }
                Ok(Err(_)) => break,
            }
        }
    }
}

#[async_trait]
impl ScpiOps for ScpiClient {
    async fn write(&self, command: &str) -> AppResult<()> {
        self.write(command).await
    }

    async fn query(&self, query: &str) -> AppResult<String> {
        self.query(query).await
    }
}

// =============================================================================
// MockScpiClient
// =============================================================================

/// Identification string reported by the mock instrument.
pub const MOCK_IDN: &str = "Anritsu,MS2090A,MOCK0001,V2024.8.1";

/// Number of display points reported by the mock instrument.
pub const MOCK_DISPLAY_POINTS: u32 = 501;

const TRACE_SLOTS: usize = 6;

#[derive(Debug, Clone)]
struct TraceSlot {
    trace_type: String,
    active: bool,
    sweeps: u32,
    data: Vec<f64>,
}

impl Default for TraceSlot {
    fn default() -> Self {
        Self {
            trace_type: "NORMal".to_string(),
            active: false,
            sweeps: 0,
            data: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct MockState {
    start_hz: f64,
    stop_hz: f64,
    rbw_hz: f64,
    ref_level_dbm: f64,
    scale_db_per_div: f64,
    continuous: bool,
    slots: [TraceSlot; TRACE_SLOTS],
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            start_hz: 1.0e9,
            stop_hz: 2.0e9,
            rbw_hz: 30_000.0,
            ref_level_dbm: -10.0,
            scale_db_per_div: 10.0,
            continuous: false,
            slots: Default::default(),
        }
    }
}

/// Mock SCPI client simulating a Field Master Pro, for testing without
/// hardware.
///
/// Supports the command subset the driver uses: frequency span, RBW,
/// amplitude scaling, trace type/mode, sweep control and trace readout.
/// Sweeping an active trace synthesizes a noise floor with a single peak
/// at mid-span.
pub struct MockScpiClient {
    state: Mutex<MockState>,
}

impl Default for MockScpiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockScpiClient {
    /// Create a mock instrument with power-on defaults.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
        }
    }

    /// Send a command without expecting a response.
    pub async fn write(&self, command: &str) -> AppResult<()> {
        tracing::debug!("Mock SCPI write: {command}");
        let mut state = self.state.lock().await;

        let (head, arg) = match command.split_once(' ') {
            Some((head, arg)) => (head, arg.trim()),
            None => (command, ""),
        };

        if let Some((slot, op)) = parse_trace_command(head) {
            match op {
                "UPDate" => state.slots[slot].active = arg == "1",
                "TYPE" => state.slots[slot].trace_type = arg.to_string(),
                _ => tracing::warn!("Unknown mock trace command: {command}"),
            }
            return Ok(());
        }

        match head {
            "FREQ:STAR" => state.start_hz = parse_arg(command, arg)?,
            "FREQ:STOP" => state.stop_hz = parse_arg(command, arg)?,
            // Argument carries a unit suffix, e.g. "30000 Hz".
            "BAND:RES" => {
                let value = arg.split_whitespace().next().unwrap_or("");
                state.rbw_hz = parse_arg(command, value)?;
            }
            "DISP:WIND:TRAC:Y:SCAL:RLEV" => state.ref_level_dbm = parse_arg(command, arg)?,
            "DISP:WINDow:TRACe:Y:PDIVision" => state.scale_db_per_div = parse_arg(command, arg)?,
            "TRACe:CLEar" => {
                let slot = parse_slot(command, arg)?;
                state.slots[slot].data.clear();
                state.slots[slot].sweeps = 0;
            }
            "ABORT" => {}
            "INIT:CONT" => state.continuous = arg.eq_ignore_ascii_case("ON"),
            "INIT" => Self::run_sweep(&mut state),
            _ => tracing::warn!("Unknown mock command: {command}"),
        }
        Ok(())
    }

    /// Send a query and return the simulated response.
    pub async fn query(&self, query: &str) -> AppResult<String> {
        tracing::debug!("Mock SCPI query: {query}");
        let mut state = self.state.lock().await;

        // In continuous mode the instrument sweeps on its own between
        // queries; emulate that with one sweep per query.
        if state.continuous {
            Self::run_sweep(&mut state);
        }

        if let Some(rest) = query.strip_prefix("TRACE:DATA?") {
            let slot = parse_slot(query, rest.trim())?;
            return Ok(Self::trace_payload(&state.slots[slot]));
        }

        if let Some((slot, op)) = parse_trace_command(query.trim_end_matches('?')) {
            if op == "SWEep:COUNt" {
                return Ok(state.slots[slot].sweeps.to_string());
            }
        }

        match query {
            "*IDN?" => Ok(MOCK_IDN.to_string()),
            "FREQ:STAR?" => Ok(format!("{}", state.start_hz)),
            "FREQ:STOP?" => Ok(format!("{}", state.stop_hz)),
            "BAND:RES?" => Ok(format!("{}", state.rbw_hz)),
            "DISP:WIND:TRAC:Y:SCAL:RLEV?" => Ok(format!("{}", state.ref_level_dbm)),
            "DISP:WINDow:TRACe:Y:PDIVision?" => Ok(format!("{}", state.scale_db_per_div)),
            "DISP:POIN?" => Ok(MOCK_DISPLAY_POINTS.to_string()),
            _ => Err(FmError::Instrument(format!("Unknown mock query: {query}"))),
        }
    }

    /// Synthesize one sweep for every active trace slot.
    fn run_sweep(state: &mut MockState) {
        let points = MOCK_DISPLAY_POINTS as usize;
        let floor = state.ref_level_dbm - 60.0;
        let mut rng = rand::thread_rng();

        for slot in state.slots.iter_mut().filter(|s| s.active) {
            slot.data = (0..points)
                .map(|i| {
                    let noise: f64 = rng.gen_range(-2.0..2.0);
                    // One carrier at mid-span, 4% of the span wide.
                    let x = (i as f64 / (points - 1) as f64 - 0.5) / 0.04;
                    let peak = 30.0 * (-x * x).exp();
                    floor + noise + peak
                })
                .collect();
            slot.sweeps += 1;
        }
    }

    /// Render a slot as the instrument would: a leading measurement code
    /// field, then the comma-separated samples. Inactive slots answer with
    /// an empty line.
    fn trace_payload(slot: &TraceSlot) -> String {
        if !slot.active || slot.data.is_empty() {
            return String::new();
        }
        let samples = slot
            .data
            .iter()
            .map(|v| format!("{v:.2}"))
            .collect::<Vec<_>>()
            .join(",");
        format!("{},{samples}", slot.trace_type)
    }
}

#[async_trait]
impl ScpiOps for MockScpiClient {
    async fn write(&self, command: &str) -> AppResult<()> {
        self.write(command).await
    }

    async fn query(&self, query: &str) -> AppResult<String> {
        self.query(query).await
    }
}

/// Split a `TRACe{n}:<op>` command head into a zero-based slot index and the
/// operation mnemonic.
fn parse_trace_command(head: &str) -> Option<(usize, &str)> {
    let rest = head.strip_prefix("TRACe")?;
    let (digit, op) = rest.split_once(':')?;
    let n: usize = digit.parse().ok()?;
    if (1..=TRACE_SLOTS).contains(&n) {
        Some((n - 1, op))
    } else {
        None
    }
}

fn parse_arg(command: &str, arg: &str) -> AppResult<f64> {
    arg.parse::<f64>()
        .map_err(|_| FmError::Instrument(format!("Mock: bad argument in '{command}'")))
}

fn parse_slot(command: &str, arg: &str) -> AppResult<usize> {
    let n: usize = arg
        .parse()
        .map_err(|_| FmError::Instrument(format!("Mock: bad trace number in '{command}'")))?;
    if (1..=TRACE_SLOTS).contains(&n) {
        Ok(n - 1)
    } else {
        Err(FmError::Instrument(format!(
            "Mock: trace number out of range in '{command}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_identifies_itself() {
        let client = MockScpiClient::new();
        assert_eq!(client.query("*IDN?").await.unwrap(), MOCK_IDN);
    }

    #[tokio::test]
    async fn mock_round_trips_frequency_span() {
        let client = MockScpiClient::new();

        client.write("FREQ:STAR 2000000000").await.unwrap();
        client.write("FREQ:STOP 4500000000").await.unwrap();

        let start = ScpiOps::query_f64(&client, "FREQ:STAR?").await.unwrap();
        let stop = ScpiOps::query_f64(&client, "FREQ:STOP?").await.unwrap();
        assert_eq!(start, 2.0e9);
        assert_eq!(stop, 4.5e9);
    }

    #[tokio::test]
    async fn mock_rbw_strips_unit_suffix() {
        let client = MockScpiClient::new();
        client.write("BAND:RES 100000 Hz").await.unwrap();
        let rbw = ScpiOps::query_f64(&client, "BAND:RES?").await.unwrap();
        assert_eq!(rbw, 100_000.0);
    }

    #[tokio::test]
    async fn inactive_trace_answers_empty() {
        let client = MockScpiClient::new();
        assert_eq!(client.query("TRACE:DATA? 3").await.unwrap(), "");
    }

    #[tokio::test]
    async fn sweep_fills_active_traces_only() {
        let client = MockScpiClient::new();

        client.write("TRACe1:UPDate 1").await.unwrap();
        client.write("INIT").await.unwrap();

        let count = ScpiOps::query_u32(&client, "TRACe1:SWEep:COUNt?")
            .await
            .unwrap();
        assert_eq!(count, 1);

        let active = client.query("TRACE:DATA? 1").await.unwrap();
        assert!(active.contains(','));

        let idle = client.query("TRACE:DATA? 2").await.unwrap();
        assert!(idle.is_empty());

        let idle_count = ScpiOps::query_u32(&client, "TRACe2:SWEep:COUNt?")
            .await
            .unwrap();
        assert_eq!(idle_count, 0);
    }

    #[tokio::test]
    async fn trace_clear_resets_slot() {
        let client = MockScpiClient::new();

        client.write("TRACe1:UPDate 1").await.unwrap();
        client.write("INIT").await.unwrap();
        client.write("TRACe:CLEar 1").await.unwrap();

        let count = ScpiOps::query_u32(&client, "TRACe1:SWEep:COUNt?")
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn unknown_query_is_an_error() {
        let client = MockScpiClient::new();
        assert!(client.query("SYST:BOGUS?").await.is_err());
    }

    #[test]
    fn trace_command_parsing() {
        assert_eq!(parse_trace_command("TRACe1:UPDate"), Some((0, "UPDate")));
        assert_eq!(
            parse_trace_command("TRACe6:SWEep:COUNt"),
            Some((5, "SWEep:COUNt"))
        );
        assert_eq!(parse_trace_command("TRACe7:UPDate"), None);
        assert_eq!(parse_trace_command("FREQ:STAR"), None);
    }
}

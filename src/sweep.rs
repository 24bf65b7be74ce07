//! Single-sweep capture.
//!
//! Orchestrates one complete measurement: arm a trace slot, launch a sweep,
//! wait for it to finish, then pull every trace together with the frequency
//! axis it was measured on. The result is a plain numeric capture suitable
//! for CSV export or downstream plotting.

use std::io::Write;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{sleep, Instant};

use crate::error::{AppResult, FmError};
use crate::instrument::field_master::{
    FieldMasterPro, TraceData, TraceMode, TraceNumber, TraceType,
};

/// Options controlling the capture loop.
#[derive(Debug, Clone)]
pub struct SweepOptions {
    /// How often to poll the sweep counter.
    pub poll_interval: Duration,
    /// Overall deadline for the first completed sweep.
    pub timeout: Duration,
    /// The slot armed for the capture and polled for completion.
    pub poll_trace: TraceNumber,
    /// Arm the poll slot (clear/write + active) before sweeping. Disable
    /// when the trace configuration was set up by hand beforehand.
    pub arm_poll_trace: bool,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            poll_trace: TraceNumber::ONE,
            arm_poll_trace: true,
        }
    }
}

/// One completed sweep: frequency axis plus all six trace slots.
#[derive(Debug, Clone)]
pub struct SweepCapture {
    /// When the capture completed.
    pub timestamp: DateTime<Utc>,
    /// Frequency axis in Hz, one entry per display point.
    pub frequencies_hz: Vec<f64>,
    /// All trace slots in order; inactive slots are empty.
    pub traces: Vec<TraceData>,
}

impl SweepCapture {
    /// Write the capture as CSV: a frequency column plus one column per
    /// non-empty trace.
    ///
    /// Rows zip to the shortest series, so a display point count that
    /// disagrees with a trace length by one never produces a malformed
    /// file.
    pub fn to_csv<W: Write>(&self, writer: &mut W) -> AppResult<()> {
        let included: Vec<&TraceData> = self.traces.iter().filter(|t| !t.is_empty()).collect();

        let mut header = String::from("frequency_hz");
        for trace in &included {
            header.push_str(&format!(",trace{}", trace.number));
        }
        writeln!(writer, "{header}")?;

        let rows = included
            .iter()
            .map(|t| t.samples.len())
            .fold(self.frequencies_hz.len(), usize::min);

        for i in 0..rows {
            let mut line = format!("{}", self.frequencies_hz[i]);
            for trace in &included {
                line.push_str(&format!(",{}", trace.samples[i]));
            }
            writeln!(writer, "{line}")?;
        }
        Ok(())
    }
}

/// Run one measurement sweep and collect every trace.
///
/// The poll slot is armed as clear/write + active, continuous sweep is
/// turned off, and a single sweep is launched. Completion is detected by
/// polling the slot's sweep counter until it is nonzero; waiting longer
/// than `options.timeout` fails with [`FmError::SweepTimeout`].
pub async fn run_single_sweep(
    fmp: &FieldMasterPro,
    options: &SweepOptions,
) -> AppResult<SweepCapture> {
    if options.arm_poll_trace {
        fmp.set_trace_type(options.poll_trace, TraceType::ClearWrite)
            .await?;
        fmp.set_trace_mode(options.poll_trace, TraceMode::Active)
            .await?;
    }

    fmp.abort().await?;
    fmp.set_continuous(false).await?;
    fmp.start_sweep().await?;

    let deadline = Instant::now() + options.timeout;
    loop {
        let count = fmp.sweep_count(options.poll_trace).await?;
        if count > 0 {
            tracing::debug!("Sweep complete (count={count})");
            break;
        }
        if Instant::now() >= deadline {
            return Err(FmError::SweepTimeout(options.timeout));
        }
        sleep(options.poll_interval).await;
    }

    let points = fmp.display_points().await? as usize;
    let start_hz = fmp.query_start_freq_ghz().await? * 1.0e9;
    let stop_hz = fmp.query_stop_freq_ghz().await? * 1.0e9;

    Ok(SweepCapture {
        timestamp: Utc::now(),
        frequencies_hz: linspace(start_hz, stop_hz, points),
        traces: fmp.traces().await?,
    })
}

/// `n` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::scpi::MOCK_DISPLAY_POINTS;

    #[test]
    fn linspace_endpoints_are_exact_enough() {
        let axis = linspace(1.0e9, 2.0e9, 501);
        assert_eq!(axis.len(), 501);
        assert_eq!(axis[0], 1.0e9);
        assert!((axis[500] - 2.0e9).abs() < 1.0);
    }

    #[test]
    fn linspace_degenerate_lengths() {
        assert!(linspace(0.0, 1.0, 0).is_empty());
        assert_eq!(linspace(5.0, 9.0, 1), vec![5.0]);
    }

    #[test]
    fn csv_zips_to_shortest_series() {
        let capture = SweepCapture {
            timestamp: Utc::now(),
            frequencies_hz: vec![1.0, 2.0, 3.0],
            traces: vec![
                TraceData {
                    number: TraceNumber::ONE,
                    samples: vec![-70.0, -71.0],
                },
                TraceData {
                    number: TraceNumber::new(2).unwrap(),
                    samples: Vec::new(),
                },
            ],
        };

        let mut out = Vec::new();
        capture.to_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        // Empty trace 2 is excluded; rows stop at the shortest series.
        assert_eq!(lines[0], "frequency_hz,trace1");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "1,-70");
    }

    #[tokio::test]
    async fn capture_against_mock_instrument() {
        let fmp = FieldMasterPro::with_mock().await.unwrap();
        let options = SweepOptions {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(100),
            ..SweepOptions::default()
        };

        let capture = run_single_sweep(&fmp, &options).await.unwrap();

        assert_eq!(capture.frequencies_hz.len(), MOCK_DISPLAY_POINTS as usize);
        assert_eq!(capture.traces.len(), 6);
        assert_eq!(
            capture.traces[0].samples.len(),
            MOCK_DISPLAY_POINTS as usize
        );
        for trace in &capture.traces[1..] {
            assert!(trace.is_empty());
        }
    }

    #[tokio::test]
    async fn capture_times_out_when_no_sweep_completes() {
        let fmp = FieldMasterPro::with_mock().await.unwrap();

        // Poll an idle slot without arming it: its counter never moves.
        let options = SweepOptions {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_millis(5),
            poll_trace: TraceNumber::new(6).unwrap(),
            arm_poll_trace: false,
        };

        let result = run_single_sweep(&fmp, &options).await;
        assert!(matches!(result, Err(FmError::SweepTimeout(_))));
    }
}

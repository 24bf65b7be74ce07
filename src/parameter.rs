//! Parameter<T> - declarative management of instrument settings.
//!
//! Every settable quantity on the analyzer (start frequency, reference
//! level, ...) is wrapped in a [`Parameter`]. A parameter carries metadata
//! (name, unit, description), validation constraints, a cached value that
//! observers can watch, and an optional hardware-write callback that pushes
//! accepted values to the instrument.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut rbw = Parameter::new("rbw_hz", 30_000.0)
//!     .with_unit("Hz")
//!     .with_range(1.0, 20.0e6);
//!
//! rbw.connect_to_hardware_write(move |hz| {
//!     let client = client.clone();
//!     Box::pin(async move { client.write(&format!("BAND:RES {hz} Hz")).await })
//! });
//!
//! // Validates, writes to the instrument, then updates the cached value.
//! rbw.set(100_000.0).await?;
//! ```

use std::fmt::Debug;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::error::{AppResult, FmError};

// =============================================================================
// Constraints
// =============================================================================

/// Validation constraints applied before a value is accepted.
#[derive(Clone)]
pub enum Constraints<T> {
    /// No constraints
    None,

    /// Inclusive numeric range
    Range { min: T, max: T },

    /// Allowed discrete values
    Choices(Vec<T>),
}

impl<T: PartialOrd + PartialEq> Constraints<T> {
    /// Validate a candidate value against the constraints.
    pub fn validate(&self, name: &str, value: &T) -> AppResult<()> {
        match self {
            Constraints::None => Ok(()),

            Constraints::Range { min, max } => {
                if value < min || value > max {
                    Err(FmError::ParameterOutOfRange(name.to_string()))
                } else {
                    Ok(())
                }
            }

            Constraints::Choices(choices) => {
                if choices.iter().any(|c| c == value) {
                    Ok(())
                } else {
                    Err(FmError::ParameterInvalidChoice(name.to_string()))
                }
            }
        }
    }
}

impl<T: Debug> Debug for Constraints<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constraints::None => write!(f, "None"),
            Constraints::Range { min, max } => f
                .debug_struct("Range")
                .field("min", min)
                .field("max", max)
                .finish(),
            Constraints::Choices(choices) => f.debug_tuple("Choices").field(choices).finish(),
        }
    }
}

impl<T> Default for Constraints<T> {
    fn default() -> Self {
        Constraints::None
    }
}

// =============================================================================
// Parameter<T>
// =============================================================================

type HardwareWriter<T> = Arc<dyn Fn(T) -> BoxFuture<'static, AppResult<()>> + Send + Sync>;

/// Typed instrument parameter with a cached, observable value.
///
/// Calling [`Parameter::set`] validates the value, writes it to the
/// instrument (when a hardware callback is connected) and only then updates
/// the cache, so a failed write never leaves the cache out of sync with
/// the hardware.
pub struct Parameter<T>
where
    T: Clone + Send + Sync + PartialEq + PartialOrd + Debug,
{
    /// Parameter name (unique identifier)
    name: String,

    /// Human-readable description
    description: Option<String>,

    /// Unit of measurement (e.g. "GHz", "dBm", "dB/div")
    unit: Option<String>,

    /// Cached value, observable via watch channel
    value_rx: watch::Receiver<T>,
    value_tx: watch::Sender<T>,

    /// Hardware write callback. When set, `set()` pushes the value to the
    /// instrument before updating the cache.
    hardware_writer: Option<HardwareWriter<T>>,

    /// Validation constraints
    constraints: Constraints<T>,

    /// Read-only flag (prevents `set()` from modifying the value)
    read_only: bool,
}

impl<T> Parameter<T>
where
    T: Clone + Send + Sync + PartialEq + PartialOrd + Debug + 'static,
{
    /// Create a new parameter with an initial cached value.
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        let (value_tx, value_rx) = watch::channel(initial);

        Self {
            name: name.into(),
            description: None,
            unit: None,
            value_rx,
            value_tx,
            hardware_writer: None,
            constraints: Constraints::None,
            read_only: false,
        }
    }

    /// Set the parameter description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the unit of measurement.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Constrain the parameter to an inclusive numeric range.
    pub fn with_range(mut self, min: T, max: T) -> Self {
        self.constraints = Constraints::Range { min, max };
        self
    }

    /// Constrain the parameter to a set of discrete values.
    pub fn with_choices(mut self, choices: Vec<T>) -> Self {
        self.constraints = Constraints::Choices(choices);
        self
    }

    /// Make the parameter read-only.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Connect the hardware write callback.
    ///
    /// After this, `set()` writes to the instrument before updating the
    /// cached value. If the write fails the cache is not updated.
    pub fn connect_to_hardware_write(
        &mut self,
        writer: impl Fn(T) -> BoxFuture<'static, AppResult<()>> + Send + Sync + 'static,
    ) {
        self.hardware_writer = Some(Arc::new(writer));
    }

    /// Get the current cached value.
    pub fn get(&self) -> T {
        self.value_rx.borrow().clone()
    }

    /// Set the value: validate, write to hardware, update the cache.
    pub async fn set(&self, value: T) -> AppResult<()> {
        if self.read_only {
            return Err(FmError::ParameterReadOnly);
        }

        self.constraints.validate(&self.name, &value)?;

        if let Some(writer) = &self.hardware_writer {
            writer(value.clone()).await?;
        }

        // The parameter holds its own receiver, so send cannot fail.
        self.value_tx.send_replace(value);
        Ok(())
    }

    /// Overwrite the cached value without touching hardware.
    ///
    /// Used when the value has been read back from the instrument and is
    /// authoritative by definition; constraints are not applied.
    pub fn cache(&self, value: T) {
        self.value_tx.send_replace(value);
    }

    /// Subscribe to value changes.
    ///
    /// Returns a watch receiver that notifies whenever the cached value
    /// changes. Multiple subscribers can observe independently.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.value_rx.clone()
    }

    /// Parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter description, if any.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Unit of measurement, if any.
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Whether the parameter rejects `set()`.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The validation constraints.
    pub fn constraints(&self) -> &Constraints<T> {
        &self.constraints
    }
}

impl<T> Debug for Parameter<T>
where
    T: Clone + Send + Sync + PartialEq + PartialOrd + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("value", &*self.value_rx.borrow())
            .field("unit", &self.unit)
            .field("constraints", &self.constraints)
            .field("read_only", &self.read_only)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

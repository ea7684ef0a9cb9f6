use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PeripheralConfig {
    pub id: String,
    pub r#type: String, // "timer", "interrupt_flags", "status"
    pub base_address: u64,
    /// Interrupt vector raised by this peripheral, e.g. "timer0_ovf"
    #[serde(default)]
    pub irq: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, serde_yaml::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChipDescriptor {
    pub name: String,
    pub arch: String, // e.g. "avr5"
    pub peripherals: Vec<PeripheralConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SystemManifest {
    pub name: String,
    pub chip: String, // Reference to chip file path, relative to the manifest
    #[serde(default = "default_clock")]
    pub clock: String, // e.g. "8MHz"
    #[serde(default = "default_prescaler")]
    pub prescaler: u16,
    #[serde(default = "default_handler_cycles")]
    pub handler_cycles: u32,
}

fn default_clock() -> String {
    "1MHz".to_string()
}

fn default_prescaler() -> u16 {
    64
}

fn default_handler_cycles() -> u32 {
    1
}

impl ChipDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open chip descriptor at {:?}", path.as_ref()))?;
        serde_yaml::from_reader(f).context("Failed to parse Chip Descriptor")
    }
}

impl SystemManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open system manifest at {:?}", path.as_ref()))?;
        serde_yaml::from_reader(f).context("Failed to parse System Manifest")
    }

    pub fn clock_hz(&self) -> Result<u32> {
        parse_frequency(&self.clock)
            .with_context(|| format!("Invalid clock '{}' in manifest '{}'", self.clock, self.name))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TestInputs {
    /// System manifest; the built-in ATmega8 layout is used when absent.
    #[serde(default)]
    pub system: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TestLimits {
    pub max_cycles: u64,
    #[serde(default)]
    pub wall_time_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxCycles,
    WallTime,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct InvocationRange {
    pub expected: u64,
    #[serde(default)]
    pub tolerance: u64,
}

impl InvocationRange {
    pub fn contains(&self, count: u64) -> bool {
        count.abs_diff(self.expected) <= self.tolerance
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct HandlerInvocationsAssertion {
    pub handler_invocations: InvocationRange,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct NoCoalescedAssertion {
    pub no_coalesced_overflows: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StopReasonAssertion {
    pub expected_stop_reason: StopReason,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum TestAssertion {
    HandlerInvocations(HandlerInvocationsAssertion),
    NoCoalescedOverflows(NoCoalescedAssertion),
    ExpectedStopReason(StopReasonAssertion),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TestScript {
    pub schema_version: String,
    #[serde(default = "default_inputs")]
    pub inputs: TestInputs,
    pub limits: TestLimits,
    #[serde(default)]
    pub assertions: Vec<TestAssertion>,
}

fn default_inputs() -> TestInputs {
    TestInputs { system: None }
}

impl TestScript {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open test script at {:?}", path.as_ref()))?;
        let script: Self =
            serde_yaml::from_reader(f).context("Failed to parse Test Script YAML")?;
        script.validate()?;
        Ok(script)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }

        if let Some(system) = &self.inputs.system {
            if system.trim().is_empty() {
                anyhow::bail!("Input 'system' path cannot be empty");
            }
        }

        if self.limits.max_cycles == 0 {
            anyhow::bail!("Limit 'max_cycles' must be greater than zero");
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrequencyError {
    #[error("empty frequency")]
    Empty,
    #[error("invalid frequency number '{0}'")]
    InvalidNumber(String),
    #[error("unknown frequency unit '{0}'")]
    UnknownUnit(String),
    #[error("frequency must be between 1 Hz and 4294967295 Hz")]
    OutOfRange,
}

/// Parses "8MHz", "32.768 kHz", "1000000" (Hz) and similar into whole hertz.
pub fn parse_frequency(freq_str: &str) -> std::result::Result<u32, FrequencyError> {
    let s = freq_str.trim();
    if s.is_empty() {
        return Err(FrequencyError::Empty);
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| FrequencyError::InvalidNumber(number.to_string()))?;

    let scale = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "hz" => 1.0,
        "khz" => 1_000.0,
        "mhz" => 1_000_000.0,
        other => return Err(FrequencyError::UnknownUnit(other.to_string())),
    };

    let hz = (value * scale).round();
    if hz < 1.0 || hz > u32::MAX as f64 {
        return Err(FrequencyError::OutOfRange);
    }
    Ok(hz as u32)
}

/*!
Configuration management for the AstroPix DAQ tool.
*/

use anyhow::{bail, Context, Result};
use astropix::protocol::{DEFAULT_CHIP_VERSION, DEFAULT_COLS, DEFAULT_ROWS, DEFAULT_SAMPLE_CLOCK_PERIOD_NS, MAX_THRESHOLD_VOLTS};
use astropix::{BitOrder, ExtractOptions, Geometry, HitDecoder, RegisterGroup, RegisterMap};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub chip: ChipConfig,
    pub readout: ReadoutConfig,
    pub voltages: VoltageConfig,
    #[serde(default)]
    pub registers: RegisterOverrides,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            chip: ChipConfig::default(),
            readout: ReadoutConfig::default(),
            voltages: VoltageConfig::default(),
            registers: RegisterOverrides::from_map(&RegisterMap::default()),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Validated pixel matrix geometry
    pub fn geometry(&self) -> Result<Geometry> {
        Geometry::new(self.chip.rows, self.chip.cols)
            .with_context(|| format!("Invalid geometry for {}{}", self.chip.name, self.chip.version))
    }

    /// Default register map with the configured overrides applied
    pub fn build_register_map(&self) -> Result<RegisterMap> {
        let mut map = RegisterMap::new(self.geometry()?);
        for (group, overrides) in self.registers.groups() {
            map.apply_overrides(group, overrides.iter().map(|(name, value)| (name, *value)))
                .with_context(|| format!("Invalid [registers.{}] config", group))?;
        }
        Ok(map)
    }

    /// Decoder matching the readout settings
    pub fn hit_decoder(&self) -> HitDecoder {
        let bit_order = BitOrder::from_reversed(self.readout.reverse_bitorder);
        HitDecoder::new(self.chip.sample_clock_period_ns)
            .with_extract_options(ExtractOptions::new(bit_order))
            .with_hit_logging(self.readout.log_hits)
    }

    /// Comparator threshold as a voltage board setting
    pub fn threshold_volts(&self) -> Result<f64> {
        let volts = astropix::threshold_volts(self.voltages.threshold_mv);
        if volts > MAX_THRESHOLD_VOLTS {
            bail!(
                "Threshold voltage out of range: {} mV gives {:.3} V, maximum is {} V",
                self.voltages.threshold_mv,
                volts,
                MAX_THRESHOLD_VOLTS
            );
        }
        Ok(volts)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Chip identification and geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChipConfig {
    /// Chip family name
    pub name: String,

    /// Chip version, 1 needs a dummy vector before each config write
    pub version: u8,

    /// Pixel rows
    pub rows: usize,

    /// Pixel columns
    pub cols: usize,

    /// Sample clock period used for ToT conversion
    pub sample_clock_period_ns: f64,
}

impl Default for ChipConfig {
    fn default() -> Self {
        Self {
            name: "astropix".to_string(),
            version: DEFAULT_CHIP_VERSION,
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            sample_clock_period_ns: DEFAULT_SAMPLE_CLOCK_PERIOD_NS,
        }
    }
}

/// Readout decoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadoutConfig {
    /// Reverse the bit order of every readout byte (normal link mode)
    pub reverse_bitorder: bool,

    /// Decode failures tolerated before a run is aborted
    pub max_decode_errors: u32,

    /// Log every decoded hit
    pub log_hits: bool,

    /// Readouts buffered between the reader thread and the decoder
    pub channel_buffer_size: usize,
}

impl Default for ReadoutConfig {
    fn default() -> Self {
        Self {
            reverse_bitorder: true,
            max_decode_errors: 0,
            log_hits: false,
            channel_buffer_size: 1000,
        }
    }
}

/// Voltage board settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoltageConfig {
    /// Comparator threshold in mV
    pub threshold_mv: f64,
}

impl Default for VoltageConfig {
    fn default() -> Self {
        Self { threshold_mv: 100.0 }
    }
}

/// Register overrides by group, name -> value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterOverrides {
    #[serde(default)]
    pub digital: IndexMap<String, i64>,
    #[serde(default)]
    pub bias: IndexMap<String, i64>,
    #[serde(default)]
    pub dac: IndexMap<String, i64>,
}

impl RegisterOverrides {
    /// Every digital, bias and DAC value of `map`
    pub fn from_map(map: &RegisterMap) -> Self {
        let table = |group: RegisterGroup| -> IndexMap<String, i64> {
            map.group(group)
                .iter()
                .map(|entry| (entry.name().to_string(), entry.value() as i64))
                .collect()
        };

        Self {
            digital: table(RegisterGroup::Digital),
            bias: table(RegisterGroup::Bias),
            dac: table(RegisterGroup::Dac),
        }
    }

    fn groups(&self) -> [(RegisterGroup, &IndexMap<String, i64>); 3] {
        [
            (RegisterGroup::Digital, &self.digital),
            (RegisterGroup::Bias, &self.bias),
            (RegisterGroup::Dac, &self.dac),
        ]
    }
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_PROMPT: &str = "# ";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemoryRange {
    pub base: u8,
    pub size: String, // e.g. "240B"
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PeripheralConfig {
    pub id: String,
    pub r#type: String, // "keyboard" or "display"
    pub base_port: u8,
    #[serde(default)]
    pub config: HashMap<String, serde_yaml::Value>,
}

impl PeripheralConfig {
    /// Reads an unsigned integer from the free-form `config` map.
    pub fn config_u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(|v| v.as_u64())
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }

    pub fn config_bool(&self, key: &str) -> Option<bool> {
        self.config.get(key).and_then(|v| v.as_bool())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BoardDescriptor {
    pub name: String,
    pub ram: MemoryRange,
    pub peripherals: Vec<PeripheralConfig>,
}

impl Default for BoardDescriptor {
    /// The stock puc8 board: 240 bytes of data memory with the display and
    /// keyboard registers at the top of the address space.
    fn default() -> Self {
        let mut display = HashMap::new();
        display.insert("busy_cycles".to_string(), serde_yaml::Value::from(4u64));
        display.insert("scrollback".to_string(), serde_yaml::Value::from("4KiB"));

        Self {
            name: "puc8".to_string(),
            ram: MemoryRange {
                base: 0x00,
                size: "240B".to_string(),
            },
            peripherals: vec![
                PeripheralConfig {
                    id: "display".to_string(),
                    r#type: "display".to_string(),
                    base_port: 0xFC,
                    config: display,
                },
                PeripheralConfig {
                    id: "keyboard".to_string(),
                    r#type: "keyboard".to_string(),
                    base_port: 0xFE,
                    config: HashMap::new(),
                },
            ],
        }
    }
}

impl BoardDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open board descriptor at {:?}", path.as_ref()))?;
        serde_yaml::from_reader(f).context("Failed to parse Board Descriptor")
    }

    pub fn peripheral_of_type(&self, kind: &str) -> Option<&PeripheralConfig> {
        self.peripherals.iter().find(|p| p.r#type == kind)
    }
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SystemManifest {
    pub name: String,
    pub board: String, // Path to the board descriptor, relative to the manifest
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default)]
    pub prompt_addr: u8,
}

impl Default for SystemManifest {
    fn default() -> Self {
        Self {
            name: "terminal".to_string(),
            board: String::new(),
            prompt: default_prompt(),
            prompt_addr: 0,
        }
    }
}

impl SystemManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open system manifest at {:?}", path.as_ref()))?;
        let manifest: Self =
            serde_yaml::from_reader(f).context("Failed to parse System Manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.prompt.as_bytes().contains(&0) {
            anyhow::bail!("Prompt may not contain a NUL byte (it terminates the string)");
        }
        if !self.prompt.is_ascii() {
            anyhow::bail!("Prompt must be ASCII, got {:?}", self.prompt);
        }
        Ok(())
    }

    /// Loads the manifest and the board descriptor it references.
    pub fn load_with_board<P: AsRef<Path>>(path: P) -> Result<(Self, BoardDescriptor)> {
        let manifest = Self::from_file(&path)?;
        let board_path = path
            .as_ref()
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&manifest.board);
        let board = BoardDescriptor::from_file(&board_path)?;
        Ok((manifest, board))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FirmwareKind {
    #[default]
    Terminal,
    Selftest,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TestInputs {
    #[serde(default)]
    pub firmware: FirmwareKind,
    pub system: Option<String>,
    /// Keystrokes queued on the keyboard before the run starts.
    #[serde(default)]
    pub keys: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TestLimits {
    pub max_steps: u64,
    #[serde(default)]
    pub wall_time_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MaxSteps,
    WallTime,
    PortViolation,
    /// A string or data segment ran outside data memory.
    MemoryFault,
    ErrorHalt,
    Finished,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DisplayContainsAssertion {
    pub display_contains: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ScreenEqualsAssertion {
    pub screen_equals: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StopReasonAssertion {
    pub expected_stop_reason: StopReason,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum TestAssertion {
    DisplayContains(DisplayContainsAssertion),
    ScreenEquals(ScreenEqualsAssertion),
    ExpectedStopReason(StopReasonAssertion),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct TestScript {
    pub schema_version: String,
    pub inputs: TestInputs,
    pub limits: TestLimits,
    #[serde(default)]
    pub assertions: Vec<TestAssertion>,
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
                anyhow::bail!("Input 'system' path cannot be empty when given");
            }
        }

        if self.inputs.firmware == FirmwareKind::Selftest && !self.inputs.keys.is_empty() {
            anyhow::bail!("Input 'keys' is only meaningful for the terminal firmware");
        }

        if self.limits.max_steps == 0 {
            anyhow::bail!("Limit 'max_steps' must be greater than zero");
        }

        Ok(())
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}

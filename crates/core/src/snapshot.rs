use crate::FirmwareState;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Serialize, Debug)]
pub struct MachineSnapshot {
    pub firmware: String,
    #[serde(flatten)]
    pub state: FirmwareState,
    pub steps: u64,
    pub cycles: u64,
    pub program: serde_json::Value,
    pub peripherals: HashMap<String, serde_json::Value>,
}

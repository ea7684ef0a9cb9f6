use crate::vector::Vector;
use crate::Lifecycle;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Serialize, Deserialize, Debug)]
pub struct MachineSnapshot {
    pub cycles: u64,
    pub elapsed_ns: u64,
    pub frequency_hz: u32,
    pub lifecycle: Lifecycle,
    pub cpu: CpuSnapshot,
    pub peripherals: HashMap<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct CpuSnapshot {
    pub sreg: u8,
    pub global_interrupts: bool,
    pub in_service: Option<Vector>,
}

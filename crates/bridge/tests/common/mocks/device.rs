use cpu_bridge::soc::{BusStatus, Device};

/// A register file of 32-bit little-endian registers.
#[derive(Debug)]
pub struct RegisterBlock {
    base: u64,
    regs: Vec<u32>,
}

impl RegisterBlock {
    pub fn new(base: u64, count: usize) -> Self {
        Self {
            base,
            regs: vec![0; count],
        }
    }
}

impl Device for RegisterBlock {
    fn name(&self) -> &str {
        "REGS"
    }

    fn address_range(&self) -> (u64, u64) {
        (self.base, self.regs.len() as u64 * 4)
    }

    fn read(&mut self, offset: u64, data: &mut [u8]) -> BusStatus {
        if data.len() != 4 || offset % 4 != 0 {
            return BusStatus::DeviceError;
        }
        data.copy_from_slice(&self.regs[(offset / 4) as usize].to_le_bytes());
        BusStatus::Ok
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> BusStatus {
        if data.len() != 4 || offset % 4 != 0 {
            return BusStatus::DeviceError;
        }
        self.regs[(offset / 4) as usize] = u32::from_le_bytes(data.try_into().unwrap());
        BusStatus::Ok
    }
}

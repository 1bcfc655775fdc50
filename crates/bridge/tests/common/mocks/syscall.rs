use std::sync::{Arc, Mutex};

use cpu_bridge::syscall::{SyscallArg, SyscallError, SyscallHandler};

/// Shared log of handler names in delivery order.
pub type OrderLog = Arc<Mutex<Vec<&'static str>>>;

/// Handler that records each delivery and optionally fails.
#[derive(Debug)]
pub struct RecordingHandler {
    pub name: &'static str,
    pub calls: Mutex<Vec<i32>>,
    fail: bool,
    order: Option<OrderLog>,
}

impl RecordingHandler {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            calls: Mutex::new(Vec::new()),
            fail: false,
            order: None,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn with_order(mut self, order: OrderLog) -> Self {
        self.order = Some(order);
        self
    }

    pub fn calls(&self) -> Vec<i32> {
        self.calls.lock().unwrap().clone()
    }
}

impl SyscallHandler for RecordingHandler {
    fn handle_syscall(&self, callno: i32, _arg: &SyscallArg) -> Result<(), SyscallError> {
        self.calls.lock().unwrap().push(callno);
        if let Some(order) = &self.order {
            order.lock().unwrap().push(self.name);
        }
        if self.fail {
            Err(SyscallError::Failed(format!("{} rejects {callno}", self.name)))
        } else {
            Ok(())
        }
    }
}

// packages/engine/src/trap/signal.rs
//! Exit request raised in place of ending the host process

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised by the exit handler and carried unchanged to the boundary.
/// Handler ranges inside the subsystem never catch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[error("subsystem requested exit with code {code}")]
pub struct TrapSignal {
    pub code: i32,
}

impl TrapSignal {
    pub fn new(code: i32) -> Self {
        Self { code }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_display() {
        let signal = TrapSignal::new(2);
        assert_eq!(signal.to_string(), "subsystem requested exit with code 2");
        assert!(!signal.is_success());
        assert!(TrapSignal::new(0).is_success());
    }
}

// packages/engine/src/trap/boundary.rs
//! Classification of an invocation result at the host boundary

use crate::runtime::interpreter::ExecError;
use crate::runtime::value::Value;
use crate::trap::signal::TrapSignal;
use std::error::Error as StdError;
use thiserror::Error;

/// Exit code reported for a crash
pub const CRASH_EXIT_CODE: i32 = 1;

/// Failure that escaped the subsystem without a trap
#[derive(Debug, Error)]
#[error("subsystem crashed in {entry}")]
pub struct SubsystemFailure {
    pub entry: String,
    #[source]
    pub cause: ExecError,
}

impl SubsystemFailure {
    /// This failure followed by every source beneath it
    pub fn chain(&self) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(error) = current {
            chain.push(error.to_string());
            current = error.source();
        }
        chain
    }
}

#[derive(Debug)]
pub enum Outcome {
    /// Returned normally, or trapped with code 0
    Success(Value),
    /// Trapped with a nonzero code
    ControlledFailure(i32),
    Crash(SubsystemFailure),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Success(_) => 0,
            Outcome::ControlledFailure(code) => *code,
            Outcome::Crash(_) => CRASH_EXIT_CODE,
        }
    }

    /// One-word label used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::ControlledFailure(_) => "controlled_failure",
            Outcome::Crash(_) => "crash",
        }
    }
}

/// First trap signal in `error`'s source chain
pub fn find_trap(error: &(dyn StdError + 'static)) -> Option<TrapSignal> {
    let mut current = Some(error);
    while let Some(error) = current {
        if let Some(signal) = error.downcast_ref::<TrapSignal>() {
            return Some(*signal);
        }
        if let Some(signal) = error.downcast_ref::<ExecError>().and_then(ExecError::trap) {
            return Some(signal);
        }
        if let Some(signal) = error.downcast_ref::<Box<ExecError>>().and_then(|e| e.trap()) {
            return Some(signal);
        }
        current = error.source();
    }
    None
}

/// Map the result of invoking `entry` to an [`Outcome`].
///
/// A trap anywhere in the failure decides the outcome by its code. Any
/// other failure is a crash that keeps the original error as its source.
pub fn classify(entry: impl Into<String>, result: Result<Value, ExecError>) -> Outcome {
    match result {
        Ok(value) => Outcome::Success(value),
        Err(error) => match find_trap(&error) {
            Some(signal) if signal.is_success() => Outcome::Success(Value::Void),
            Some(signal) => Outcome::ControlledFailure(signal.code),
            None => Outcome::Crash(SubsystemFailure {
                entry: entry.into(),
                cause: error,
            }),
        },
    }
}

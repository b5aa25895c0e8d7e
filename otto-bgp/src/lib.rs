pub mod bgpq4;
pub mod collector;
pub mod config;
pub mod discovery;
pub mod entrypoints;
pub mod event;
pub mod guardrails;
pub mod inventory;
pub mod irr_proxy;
pub mod netconf;
pub mod notify;
pub mod parser;
pub mod pipeline;
pub mod rpki;
pub mod safety;
pub mod util;

/// Process exit codes, per the external-interfaces contract.
///
/// `main` maps these to `std::process::ExitCode`; library code never calls
/// `std::process::exit` directly so every path stays testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    Success = 0,
    General = 1,
    Usage = 2,
    SafetyCheckFailed = 3,
    NetconfConnectionFailed = 4,
    PolicyValidationFailed = 5,
    CriticalBgpSessionImpact = 6,
    RollbackFailed = 7,
    AutonomousOperationBlocked = 8,
    HostKeyVerificationFailed = 12,
    CommandInjectionAttempt = 13,
    GuardrailViolation = 16,
    InputValidationFailed = 21,
    Sigint = 130,
    Sigterm = 143,
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(value: ExitCode) -> Self {
        std::process::ExitCode::from(value as u8)
    }
}

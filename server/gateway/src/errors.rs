use thiserror::Error;

/// Surfaced kinds from §7 that the MMDVM server itself needs to branch on.
/// Everything else in the error taxonomy is a drop-silently / log-and-continue
/// case handled inline without a typed error.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("unknown or expired session for repeater {0}")]
    UnknownSession(u32),

    #[error("session state mismatch for repeater {0}")]
    StateMismatch(u32),

    #[error("remote address mismatch for repeater {0}")]
    AddressMismatch(u32),

    #[error("authentication failure for repeater {0}")]
    AuthFailed(u32),

    #[error("control error: {0}")]
    Control(#[from] dmrswitch_control::ControlError),
}

use thiserror::Error;

pub type RoutingResult<T> = Result<T, RoutingError>;

/// Surfaced routing-core failures (§7). Everything else in the taxonomy —
/// malformed frames, unknown sessions, destination-not-found — is handled
/// by dropping the packet after a `debug!`/`warn!` log, not by propagating
/// one of these; nothing in the hot path is fatal.
#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("unknown destination {1} (group_call={0})")]
    UnknownDestination(bool, u32),

    #[error("control store error: {0}")]
    Control(#[from] dmrswitch_control::ControlError),
}

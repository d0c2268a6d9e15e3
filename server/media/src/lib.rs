pub mod errors;
pub mod parrot;
pub mod router;
pub mod subscriptions;
pub mod topics;
pub mod tracker;

pub use errors::{RoutingError, RoutingResult};
pub use parrot::Parrot;
pub use router::Hub;
pub use subscriptions::SubscriptionManager;
pub use tracker::{CallTracker, StreamKey, INACTIVITY_TIMEOUT};

pub mod errors;
pub mod ids;
pub mod model;
pub mod repo;

pub use errors::{ControlError, ControlResult};
pub use ids::{CallId, PrivateDestination, RepeaterId, TalkgroupId, UserId, PARROT_ID, UNLINK_ID};
pub use model::{Call, CallEvent, Repeater, RepeaterSummary, Talkgroup, TalkgroupSummary, User, UserSummary};
pub use repo::{ControlRepo, PgControlRepo};

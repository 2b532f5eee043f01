//! Command abstractions.

use uuid::Uuid;

use crate::event::EventContext;
use crate::identity::Identity;

/// A request to change one aggregate, issued on behalf of an authenticated
/// caller.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// Stable command name, e.g. `auction.update`. Used as a span field.
    fn command_type(&self) -> &'static str;

    /// Unique id of this command; the causation id of its events.
    fn command_id(&self) -> Uuid;

    /// Correlation id carried into every event the command produces.
    fn correlation_id(&self) -> Uuid;

    /// The caller the command runs for.
    fn actor(&self) -> &Identity;

    /// Ids to stamp onto the events this command produces.
    fn event_context(&self) -> EventContext {
        EventContext {
            correlation_id: self.correlation_id(),
            causation_id: self.command_id(),
        }
    }
}

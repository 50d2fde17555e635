pub mod orchestrator;
pub mod parameter;
pub mod subscription;
pub mod volume;

pub use orchestrator::{Orchestrator, RoutingDecision};
pub use parameter::ParameterStore;
pub use subscription::{Subscription, SubscriptionRegistry};
pub use volume::VolumePolicy;

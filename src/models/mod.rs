pub mod billing_event;
pub mod plan;
pub mod tenant;

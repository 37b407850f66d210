//! External scheduling policy interface: wire protocol and gateway.

pub mod gateway;
pub mod protocol;

pub use gateway::{PolicyGateway, PolicyTransport, ZmqPolicyTransport};
pub use protocol::{InvocationType, JobDecision, PolicyReply};

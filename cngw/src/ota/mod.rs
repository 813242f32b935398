//! OTA firmware delivery toward the mainboard.

pub mod policy;
pub mod sender;
pub mod session;
pub mod signals;

pub use policy::{BundlingPolicy, TransportClass};
pub use sender::{OtaSender, SenderConfig};
pub use session::{BinaryState, OtaBinary, OtaSession, OtaState};
pub use signals::{FlowGate, OtaSignals, StatusMailbox};

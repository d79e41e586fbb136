//! Job state owned by the monitor: the keyed registry and the notification slot.

mod notifier;
mod registry;

pub(crate) use notifier::Notifier;
pub(crate) use registry::Registry;

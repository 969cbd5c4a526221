//! Process-global stack registry
//!
//! Named stacks register here so operators can list running executions
//! and signal them by uuid. Anonymous stacks stay out of the registry.
//! Registration happens when the name attribute is set and the entry is
//! removed when the stack is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use lazy_static::lazy_static;

use super::stack::{SharedCounters, Signal, SignalSlot};

/// Registry entry for a named stack
#[derive(Clone)]
pub struct StackDescriptor {
    pub uuid: String,
    pub name: String,
    pub creation_time_ms: i64,
    pub(crate) signal: Arc<SignalSlot>,
    pub(crate) counters: Arc<SharedCounters>,
}

/// Point-in-time view of a registered stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackInfo {
    pub uuid: String,
    pub name: String,
    pub creation_time_ms: i64,
    pub current_ops: u64,
}

lazy_static! {
    static ref REGISTRY: Mutex<HashMap<String, StackDescriptor>> = Mutex::new(HashMap::new());
}

fn registry() -> MutexGuard<'static, HashMap<String, StackDescriptor>> {
    REGISTRY.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn register(descriptor: StackDescriptor) {
    registry().insert(descriptor.uuid.clone(), descriptor);
}

pub(crate) fn unregister(uuid: &str) {
    registry().remove(uuid);
}

/// Snapshot of every registered stack
pub fn stacks() -> Vec<StackInfo> {
    let mut infos: Vec<StackInfo> = registry()
        .values()
        .map(|descriptor| StackInfo {
            uuid: descriptor.uuid.clone(),
            name: descriptor.name.clone(),
            creation_time_ms: descriptor.creation_time_ms,
            current_ops: descriptor.counters.current_ops(),
        })
        .collect();
    infos.sort_by(|a, b| a.creation_time_ms.cmp(&b.creation_time_ms));
    infos
}

/// Signal a registered stack by uuid. Returns false when no stack with
/// that uuid is registered.
pub fn signal(uuid: &str, signal: Signal) -> bool {
    match registry().get(uuid) {
        Some(descriptor) => {
            descriptor.signal.raise(signal);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StackConfig;
    use crate::script::library::FunctionLibrary;
    use crate::script::stack::{Attribute, MemoryStack};
    use crate::script::ATTR_NAME;

    #[test]
    fn test_registration_lifecycle() {
        let mut stack = MemoryStack::new(
            None,
            None,
            &StackConfig::default(),
            Arc::new(FunctionLibrary::new()),
        );
        let uuid = stack.uuid().to_string();
        assert!(!stacks().iter().any(|info| info.uuid == uuid));

        stack
            .set_attribute(ATTR_NAME, Some(Attribute::Str("runner-1".to_string())))
            .unwrap();
        let info = stacks()
            .into_iter()
            .find(|info| info.uuid == uuid)
            .expect("stack should be registered");
        assert_eq!(info.name, "runner-1");

        assert!(signal(&uuid, Signal::Stop));
        drop(stack);
        assert!(!stacks().iter().any(|info| info.uuid == uuid));
        assert!(!signal(&uuid, Signal::Stop));
    }
}

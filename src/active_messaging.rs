//! Registration of actions: function pointers callable with a raw byte
//! buffer.
//!
//! The substrate does not schedule anything itself -- a tasking layer or an
//! active-message queue delivers payloads and calls
//! [`exec_action`]; actions are free to use the global-memory and pattern
//! APIs as long as they run outside a collective region.
//!
//! Actions register themselves at link time:
//!
//! ```
//! use tessera::ActionRegistration;
//!
//! fn bump_counter(payload: &[u8]) {
//!     let amount: u64 = tessera::deserialize(payload, false).unwrap();
//!     // ...
//! }
//!
//! inventory::submit! {
//!     ActionRegistration { name: "bump_counter", func: bump_counter }
//! }
//! ```

use crate::error::{TesseraError, TesseraResult};
use std::collections::HashMap;

/// A link-time registered action.
pub struct ActionRegistration {
    /// Process-wide unique action name.
    pub name: &'static str,
    /// The handler; receives the raw payload.
    pub func: fn(&[u8]),
}

inventory::collect!(ActionRegistration);

lazy_static! {
    static ref ACTIONS: HashMap<&'static str, fn(&[u8])> = {
        let mut actions = HashMap::new();
        for registration in inventory::iter::<ActionRegistration> {
            actions.insert(registration.name, registration.func);
        }
        actions
    };
}

/// Execute the registered action `name` with `payload`. Fails with
/// `NotFound` for unregistered names.
pub fn exec_action(name: &str, payload: &[u8]) -> TesseraResult<()> {
    match ACTIONS.get(name) {
        Some(func) => {
            func(payload);
            Ok(())
        }
        None => Err(TesseraError::NotFound(format!("action '{}'", name))),
    }
}

/// Names of all registered actions, unordered.
pub fn registered_actions() -> impl Iterator<Item = &'static str> {
    ACTIONS.keys().copied()
}

/// An owned action payload that serializes as raw bytes.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ActionBuffer {
    #[serde(with = "serde_bytes")]
    bytes: Vec<u8>,
}

impl ActionBuffer {
    /// Encode a value into an action payload.
    pub fn encode<T: serde::Serialize>(value: &T) -> TesseraResult<ActionBuffer> {
        Ok(ActionBuffer {
            bytes: crate::serialize(value, false)
                .map_err(|e| TesseraError::invalid(e.to_string()))?,
        })
    }

    /// Decode the payload back into a value.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> TesseraResult<T> {
        crate::deserialize(&self.bytes, false).map_err(|e| TesseraError::invalid(e.to_string()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for ActionBuffer {
    fn from(bytes: Vec<u8>) -> ActionBuffer {
        ActionBuffer { bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static SUM: AtomicU64 = AtomicU64::new(0);

    fn accumulate(payload: &[u8]) {
        let value: u64 = crate::deserialize(payload, false).unwrap();
        SUM.fetch_add(value, Ordering::SeqCst);
    }

    inventory::submit! {
        ActionRegistration { name: "test_accumulate", func: accumulate }
    }

    #[test]
    fn exec_registered_action() {
        let payload = crate::serialize(&7u64, false).unwrap();
        exec_action("test_accumulate", &payload).unwrap();
        exec_action("test_accumulate", &payload).unwrap();
        assert_eq!(SUM.load(Ordering::SeqCst), 14);
        assert!(registered_actions().any(|name| name == "test_accumulate"));
    }

    #[test]
    fn unknown_action_not_found() {
        assert!(matches!(
            exec_action("no_such_action", &[]),
            Err(TesseraError::NotFound(_))
        ));
    }

    #[test]
    fn action_buffer_roundtrip() {
        let buffer = ActionBuffer::encode(&(1u32, 2u32)).unwrap();
        let (a, b): (u32, u32) = buffer.decode().unwrap();
        assert_eq!((a, b), (1, 2));
    }
}

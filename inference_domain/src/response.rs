//! ResponseNode and EmitListener: the output-side contract that forwards
//! results to registered external connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, Weak};

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ResponseData {
    pub string_data: String,
    pub length: u64,
    #[serde(with = "base64_bytes")]
    pub binary_data: Vec<u8>,
}

mod base64_bytes {
    // Binary payloads are carried as plain bytes internally; wire encoding
    // (base64 for JSON, raw bytes for protobuf) is a transport concern
    // handled by the frontends, not here. This module exists purely so
    // `ResponseData` stays `Serialize`/`Deserialize` without pulling a
    // base64 crate into the domain for a path that's infrastructure-owned.
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        serde::Deserialize::deserialize(deserializer)
    }
}

/// `{status, message, responses}`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Response {
    pub status: i32,
    pub message: String,
    pub responses: HashMap<String, ResponseData>,
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            message: message.into(),
            responses: HashMap::new(),
        }
    }

    pub fn with_status(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            responses: HashMap::new(),
        }
    }
}

/// One registered external connection. `on_emit` is called for every
/// `emitOutput`; `on_finish` is called exactly once, after the engine has
/// observed `streamNum` completions.
pub trait EmitListener: Send + Sync {
    fn on_emit(&self, response: &Response);
    fn on_finish(&self);
}

/// Per-stream completion counter plus the registered listener set for one
/// ResponseNode. `streamNum` completions (one `addEmitFinishFlag`
/// per stream's terminal blob) triggers exactly one `emitFinish`.
pub struct ResponseAccumulator {
    stream_num: u32,
    completions: AtomicU32,
    listeners: Mutex<Vec<Weak<dyn EmitListener>>>,
    finished: AtomicU32,
}

impl ResponseAccumulator {
    pub fn new(stream_num: u32) -> Self {
        Self {
            stream_num,
            completions: AtomicU32::new(0),
            listeners: Mutex::new(Vec::new()),
            finished: AtomicU32::new(0),
        }
    }

    pub fn register_emit_listener(&self, listener: Weak<dyn EmitListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub fn clear_all_emit_listeners(&self) {
        self.listeners.lock().unwrap().clear();
    }

    pub fn emit_output(&self, response: Response) {
        for listener in self.listeners.lock().unwrap().iter() {
            if let Some(listener) = listener.upgrade() {
                listener.on_emit(&response);
            }
        }
    }

    pub fn add_emit_finish_flag(&self) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_emit_finish(&self) -> bool {
        self.completions.load(Ordering::SeqCst) >= self.stream_num
    }

    /// Calls `on_finish` on every still-alive listener exactly once, even if
    /// invoked more than once by a caller.
    pub fn emit_finish(&self) {
        if self.finished.fetch_add(1, Ordering::SeqCst) != 0 {
            return;
        }
        for listener in self.listeners.lock().unwrap().iter() {
            if let Some(listener) = listener.upgrade() {
                listener.on_finish();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Recorder {
        finish_count: std::sync::atomic::AtomicU32,
    }
    impl EmitListener for Recorder {
        fn on_emit(&self, _response: &Response) {}
        fn on_finish(&self) {
            self.finish_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn is_emit_finish_once_stream_num_completions_observed() {
        let acc = ResponseAccumulator::new(3);
        acc.add_emit_finish_flag();
        acc.add_emit_finish_flag();
        assert!(!acc.is_emit_finish());
        acc.add_emit_finish_flag();
        assert!(acc.is_emit_finish());
    }

    #[test]
    fn emit_finish_runs_exactly_once() {
        let acc = ResponseAccumulator::new(1);
        let listener = Arc::new(Recorder {
            finish_count: std::sync::atomic::AtomicU32::new(0),
        });
        let trait_obj: Arc<dyn EmitListener> = listener.clone();
        acc.register_emit_listener(Arc::downgrade(&trait_obj));
        acc.emit_finish();
        acc.emit_finish();
        assert_eq!(listener.finish_count.load(Ordering::SeqCst), 1);
    }
}

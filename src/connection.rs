use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::commands::CmdLine;

/// Capability interface the engine uses to read and mutate per-client state.
///
/// The engine does not own the connection's lifecycle; the accept loop does.
/// Implementations use interior mutability (`&self` methods) because a
/// connection is shared between its reader task and the engine.
pub trait Connection: Send + Sync {
    fn write(&self, bytes: &[u8]) -> std::io::Result<usize>;
    fn close(&self);
    fn remote_address(&self) -> String;

    fn set_password(&self, password: String);
    fn password(&self) -> String;

    // Subscribed channels live on the connection, not in the engine.
    fn subscribe(&self, channel: &str);
    fn unsubscribe(&self, channel: &str);
    fn subscribe_count(&self) -> usize;
    fn channels(&self) -> Vec<String>;

    fn in_multi_state(&self) -> bool;
    fn set_multi_state(&self, in_multi: bool);
    fn queued_cmd_lines(&self) -> Vec<CmdLine>;
    fn enqueue_cmd(&self, cmd_line: CmdLine);
    fn clear_queued_cmds(&self);
    fn watching(&self) -> HashMap<String, u32>;
    fn add_watching(&self, key: String, version: u32);
    fn clear_watching(&self);
    fn add_tx_error(&self, error: String);
    fn tx_errors(&self) -> Vec<String>;
    fn clear_tx_errors(&self);

    fn db_index(&self) -> usize;
    fn select_db(&self, index: usize);

    fn set_slave(&self);
    fn is_slave(&self) -> bool;
    fn set_master(&self);
    fn is_master(&self) -> bool;

    fn name(&self) -> String;
}

/// In-memory [`Connection`] for tests and embedding. Written bytes accumulate
/// in a buffer the caller can inspect.
#[derive(Default)]
pub struct FakeConnection {
    written: Mutex<Vec<u8>>,
    closed: AtomicBool,
    password: Mutex<String>,
    channels: Mutex<Vec<String>>,
    in_multi: AtomicBool,
    queue: Mutex<Vec<CmdLine>>,
    watching: Mutex<HashMap<String, u32>>,
    tx_errors: Mutex<Vec<String>>,
    db_index: AtomicUsize,
    slave: AtomicBool,
    master: AtomicBool,
}

impl FakeConnection {
    pub fn new() -> FakeConnection {
        FakeConnection::default()
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connection for FakeConnection {
    fn write(&self, bytes: &[u8]) -> std::io::Result<usize> {
        self.written.lock().unwrap().extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn remote_address(&self) -> String {
        "fake:0".to_string()
    }

    fn set_password(&self, password: String) {
        *self.password.lock().unwrap() = password;
    }

    fn password(&self) -> String {
        self.password.lock().unwrap().clone()
    }

    fn subscribe(&self, channel: &str) {
        let mut channels = self.channels.lock().unwrap();
        if !channels.iter().any(|c| c == channel) {
            channels.push(channel.to_string());
        }
    }

    fn unsubscribe(&self, channel: &str) {
        self.channels.lock().unwrap().retain(|c| c != channel);
    }

    fn subscribe_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }

    fn channels(&self) -> Vec<String> {
        self.channels.lock().unwrap().clone()
    }

    fn in_multi_state(&self) -> bool {
        self.in_multi.load(Ordering::SeqCst)
    }

    fn set_multi_state(&self, in_multi: bool) {
        self.in_multi.store(in_multi, Ordering::SeqCst);
    }

    fn queued_cmd_lines(&self) -> Vec<CmdLine> {
        self.queue.lock().unwrap().clone()
    }

    fn enqueue_cmd(&self, cmd_line: CmdLine) {
        self.queue.lock().unwrap().push(cmd_line);
    }

    fn clear_queued_cmds(&self) {
        self.queue.lock().unwrap().clear();
    }

    fn watching(&self) -> HashMap<String, u32> {
        self.watching.lock().unwrap().clone()
    }

    fn add_watching(&self, key: String, version: u32) {
        self.watching.lock().unwrap().insert(key, version);
    }

    fn clear_watching(&self) {
        self.watching.lock().unwrap().clear();
    }

    fn add_tx_error(&self, error: String) {
        self.tx_errors.lock().unwrap().push(error);
    }

    fn tx_errors(&self) -> Vec<String> {
        self.tx_errors.lock().unwrap().clone()
    }

    fn clear_tx_errors(&self) {
        self.tx_errors.lock().unwrap().clear();
    }

    fn db_index(&self) -> usize {
        self.db_index.load(Ordering::SeqCst)
    }

    fn select_db(&self, index: usize) {
        self.db_index.store(index, Ordering::SeqCst);
    }

    fn set_slave(&self) {
        self.slave.store(true, Ordering::SeqCst);
    }

    fn is_slave(&self) -> bool {
        self.slave.load(Ordering::SeqCst)
    }

    fn set_master(&self) {
        self.master.store(true, Ordering::SeqCst);
    }

    fn is_master(&self) -> bool {
        self.master.load(Ordering::SeqCst)
    }

    fn name(&self) -> String {
        "fake".to_string()
    }
}

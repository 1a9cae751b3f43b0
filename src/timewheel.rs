use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval_at, Duration, Instant};
use tracing::{debug, error};

/// A delayed-job callback. Runs on its own task; a panic is caught and logged
/// at the dispatch boundary, never propagated into the wheel loop.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Add {
        delay: Duration,
        key: String,
        job: Job,
    },
    Remove(String),
    Stop,
}

/// A hashed time wheel: a fixed ring of slots advanced by one position per
/// tick. A job is placed in the slot the pointer will occupy `delay` from now;
/// jobs spanning more than one revolution carry a `circle` count that is
/// decremented on each pass until the visit that fires them.
///
/// All slot and index mutation happens inside a single actor task, so the
/// internal state needs no locking. Firing is at-least-once with tick
/// granularity: the achieved delay is `ticks * interval` rounded down to whole
/// ticks, plus dispatch latency.
///
/// The handle is cheap to clone; all clones feed the same wheel.
#[derive(Clone)]
pub struct TimeWheel {
    tx: UnboundedSender<Message>,
    state: std::sync::Arc<Mutex<Option<(Wheel, UnboundedReceiver<Message>)>>>,
}

struct Task {
    circle: usize,
    key: String,
    job: Job,
}

struct Location {
    slot: usize,
    id: u64,
}

struct Wheel {
    interval: Duration,
    // One map per slot, keyed by job id, so cancellation is O(1).
    slots: Vec<HashMap<u64, Task>>,
    locations: HashMap<String, Location>,
    current_slot: usize,
    next_id: u64,
}

impl TimeWheel {
    pub fn new(interval: Duration, slot_count: usize) -> TimeWheel {
        assert!(slot_count > 0, "time wheel needs at least one slot");

        let (tx, rx) = mpsc::unbounded_channel();
        let wheel = Wheel {
            interval,
            slots: (0..slot_count).map(|_| HashMap::new()).collect(),
            locations: HashMap::new(),
            current_slot: 0,
            next_id: 0,
        };

        TimeWheel {
            tx,
            state: std::sync::Arc::new(Mutex::new(Some((wheel, rx)))),
        }
    }

    /// Spawns the actor loop. Jobs added before `start` are queued and
    /// scheduled on the first turn of the loop. Starting twice is a no-op.
    pub fn start(&self) {
        let taken = self.state.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some((wheel, rx)) = taken {
            tokio::spawn(run(wheel, rx));
        }
    }

    /// Halts the loop. Pending jobs never fire; in-flight callbacks finish on
    /// their own tasks.
    pub fn stop(&self) {
        let _ = self.tx.send(Message::Stop);
    }

    /// Schedules `job` to run once, approximately `delay` from now. A
    /// non-empty `key` names the job so it can be cancelled or rescheduled:
    /// re-adding an already-scheduled key cancels the prior job first
    /// (last-write-wins). Jobs with an empty key cannot be cancelled.
    pub fn add_job(&self, delay: Duration, key: impl Into<String>, job: Job) {
        let _ = self.tx.send(Message::Add {
            delay,
            key: key.into(),
            job,
        });
    }

    /// Cancels the job scheduled under `key`. Best-effort and idempotent:
    /// an empty, unknown, or already-fired key is a silent no-op.
    pub fn remove_job(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        let _ = self.tx.send(Message::Remove(key.to_string()));
    }
}

async fn run(mut wheel: Wheel, mut rx: UnboundedReceiver<Message>) {
    let mut ticker = interval_at(Instant::now() + wheel.interval, wheel.interval);
    loop {
        tokio::select! {
            // Drain control messages before advancing the pointer, so a job
            // added or removed "now" is placed relative to the current slot.
            biased;
            msg = rx.recv() => match msg {
                Some(Message::Add { delay, key, job }) => wheel.add_task(delay, key, job),
                Some(Message::Remove(key)) => wheel.remove_task(&key),
                Some(Message::Stop) | None => {
                    debug!("time wheel stopped");
                    return;
                }
            },
            _ = ticker.tick() => wheel.on_tick(),
        }
    }
}

impl Wheel {
    fn on_tick(&mut self) {
        let tasks = std::mem::take(&mut self.slots[self.current_slot]);
        let slot = self.current_slot;
        self.current_slot = (self.current_slot + 1) % self.slots.len();

        for (id, mut task) in tasks {
            if task.circle > 0 {
                task.circle -= 1;
                self.slots[slot].insert(id, task);
                continue;
            }

            if !task.key.is_empty() {
                self.locations.remove(&task.key);
            }

            // One job's latency or panic must not block the rest of the slot.
            tokio::spawn(async move {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(task.job)) {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(key = %task.key, "scheduled job panicked: {}", reason);
                }
            });
        }
    }

    fn add_task(&mut self, delay: Duration, key: String, job: Job) {
        if !key.is_empty() && self.locations.contains_key(&key) {
            self.remove_task(&key);
        }

        let (position, circle) = self.position_and_circle(delay);
        let id = self.next_id;
        self.next_id += 1;

        if !key.is_empty() {
            self.locations
                .insert(key.clone(), Location { slot: position, id });
        }
        self.slots[position].insert(id, Task { circle, key, job });
    }

    fn remove_task(&mut self, key: &str) {
        if let Some(location) = self.locations.remove(key) {
            self.slots[location.slot].remove(&location.id);
        }
    }

    // Whole-second granularity, matching the tick: 2500ms at a 1s interval is
    // 2 ticks, so the job fires on the pointer's next visit to slot current+2.
    fn position_and_circle(&self, delay: Duration) -> (usize, usize) {
        let interval_secs = self.interval.as_secs().max(1);
        let ticks = (delay.as_secs() / interval_secs) as usize;

        let circle = ticks / self.slots.len();
        let position = (self.current_slot + ticks) % self.slots.len();
        (position, circle)
    }
}

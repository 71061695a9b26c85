//! Uptime and stored-size reporting for an external status UI.
//!
//! Shard transfers push "bytes added" events into a bounded channel; a
//! one-second tick renders the running totals into human-readable strings and
//! hands them to whatever sink is wired in.

use {
    std::time::{Duration, Instant},
    tokio::sync::mpsc,
};

const EVENT_BUFFER: usize = 64;
const TICK: Duration = Duration::from_secs(1);

/// Consumer of rendered status lines. The real dashboard lives outside this
/// process; [`LogSink`] stands in for it.
pub trait StatusSink: Send {
    fn update(&mut self, uptime: &str, stored: &str);
}

pub struct LogSink;

impl StatusSink for LogSink {
    fn update(&mut self, uptime: &str, stored: &str) {
        tracing::debug!(%uptime, %stored, "status");
    }
}

/// Cheap handle for reporting stored bytes from anywhere in the engine.
#[derive(Clone)]
pub struct StatusHandle {
    events: mpsc::Sender<i64>,
}

impl StatusHandle {
    pub fn add_bytes(&self, bytes: i64) {
        // a full buffer only costs us a stale size display
        if self.events.try_send(bytes).is_err() {
            tracing::debug!(bytes, "status channel full, dropping size event");
        }
    }
}

pub struct StatusEmitter {
    events: mpsc::Receiver<i64>,
    sink: Box<dyn StatusSink>,
}

pub fn channel(sink: Box<dyn StatusSink>) -> (StatusHandle, StatusEmitter) {
    let (events, receiver) = mpsc::channel(EVENT_BUFFER);
    (
        StatusHandle { events },
        StatusEmitter {
            events: receiver,
            sink,
        },
    )
}

impl StatusEmitter {
    /// Runs until every [`StatusHandle`] is gone.
    pub async fn run(mut self) {
        let started = Instant::now();
        let mut stored: i64 = 0;
        let mut tick = tokio::time::interval(TICK);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.sink.update(
                        &humanize_duration(started.elapsed()),
                        &humanize_size(stored),
                    );
                }
                event = self.events.recv() => match event {
                    Some(bytes) => stored = stored.saturating_add(bytes),
                    None => return,
                },
            }
        }
    }
}

/// `N day(s) N hour(s) N minute(s) N second(s)`, dropping leading units that
/// are still zero.
pub fn humanize_duration(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let unit = |n: u64, name: &str| {
        if n > 1 {
            format!("{n} {name}s")
        } else {
            format!("{n} {name}")
        }
    };

    let mut out = unit(total % 60, "second");
    let minutes = total / 60;
    if minutes == 0 {
        return out;
    }
    out = format!("{} {}", unit(minutes % 60, "minute"), out);
    let hours = minutes / 60;
    if hours == 0 {
        return out;
    }
    out = format!("{} {}", unit(hours % 24, "hour"), out);
    let days = hours / 24;
    if days == 0 {
        return out;
    }
    format!("{} {}", unit(days, "day"), out)
}

/// Steps through B/KB/MB/GB at 1024.
pub fn humanize_size(bytes: i64) -> String {
    const STEP: f64 = 1024.0;
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    for unit in ["KB", "MB"] {
        value /= STEP;
        if value < STEP {
            return format!("{value:.2} {unit}");
        }
    }
    format!("{:.2} GB", value / STEP)
}

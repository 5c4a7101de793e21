//! Asynchronous re-measure timer.
//!
//! Hosts do not re-measure a container when only a child's content
//! finishes loading, so after realizing elements without sizing info
//! the layout polls: a dedicated timer thread fires the host's
//! dispatcher on a back-off schedule (8 ticks, 100 ms growing by 1.5x
//! per tick, about five seconds in total). The thread parks on a
//! control channel and is shut down on drop.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{RecvTimeoutError, Sender};
use tracing::{debug, trace};

/// Total ticks per schedule.
pub const TICK_COUNT: u32 = 8;

/// First interval of the schedule.
pub const INITIAL_INTERVAL: Duration = Duration::from_millis(100);

/// Growth factor applied to each subsequent interval.
pub const INTERVAL_GROWTH: f64 = 1.5;

type Dispatcher = Arc<dyn Fn() + Send + Sync>;

enum Command {
    Start { tick: u32, dispatcher: Dispatcher },
    Stop,
    Shutdown,
}

/// Control handle for the timer thread.
pub struct RemeasureTimer {
    command_tx: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl RemeasureTimer {
    pub fn new() -> Self {
        let (command_tx, command_rx) = flume::unbounded::<Command>();

        let worker = thread::Builder::new()
            .name("linedflow-remeasure".into())
            .spawn(move || {
                let mut armed: Option<(u32, Dispatcher)> = None;
                loop {
                    match armed.take() {
                        None => match command_rx.recv() {
                            Ok(Command::Start { tick, dispatcher }) if tick < TICK_COUNT => {
                                armed = Some((tick, dispatcher));
                            }
                            Ok(Command::Start { .. }) | Ok(Command::Stop) => {}
                            Ok(Command::Shutdown) | Err(_) => break,
                        },
                        Some((tick, dispatcher)) => {
                            match command_rx.recv_timeout(interval_for(tick)) {
                                Ok(Command::Start { tick, dispatcher }) if tick < TICK_COUNT => {
                                    armed = Some((tick, dispatcher));
                                }
                                Ok(Command::Start { .. }) | Ok(Command::Stop) => {}
                                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                                Err(RecvTimeoutError::Timeout) => {
                                    trace!(tick, "re-measure tick");
                                    dispatcher();
                                    let next = tick + 1;
                                    if next < TICK_COUNT {
                                        armed = Some((next, dispatcher));
                                    }
                                }
                            }
                        }
                    }
                }
                debug!("re-measure timer thread stopped");
            })
            .expect("failed to spawn re-measure timer thread");

        Self {
            command_tx,
            worker: Some(worker),
        }
    }

    /// Arms (or re-arms) the schedule at `tick`. Tick 0 restarts the
    /// full back-off.
    pub fn start(&self, tick: u32, dispatcher: Dispatcher) {
        let _ = self.command_tx.send(Command::Start { tick, dispatcher });
    }

    /// Disarms the schedule without stopping the thread.
    pub fn stop(&self) {
        let _ = self.command_tx.send(Command::Stop);
    }
}

impl Default for RemeasureTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RemeasureTimer {
    fn drop(&mut self) {
        let _ = self.command_tx.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn interval_for(tick: u32) -> Duration {
    Duration::from_secs_f64(INITIAL_INTERVAL.as_secs_f64() * INTERVAL_GROWTH.powi(tick as i32))
}

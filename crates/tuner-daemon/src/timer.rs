//! Scheduling for the sleep timer: a deferred stop and a periodic tick, owned
//! and aborted together.  The timer state itself lives in
//! `tuner_player::SleepTimer`.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::core::DaemonEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Tick { generation: u64 },
    Expired { generation: u64 },
}

#[derive(Default)]
pub struct SleepTimerTasks {
    stop: Option<AbortHandle>,
    tick: Option<AbortHandle>,
}

impl SleepTimerTasks {
    /// Replaces any running pair.
    pub fn schedule(
        &mut self,
        generation: u64,
        delay: Duration,
        tick_interval: Duration,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) {
        self.cancel();

        let stop_tx = event_tx.clone();
        self.stop = Some(
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = stop_tx
                    .send(DaemonEvent::SleepTimer(TimerEvent::Expired { generation }))
                    .await;
            })
            .abort_handle(),
        );

        self.tick = Some(
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(tick_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    interval.tick().await;
                    let evt = DaemonEvent::SleepTimer(TimerEvent::Tick { generation });
                    if event_tx.send(evt).await.is_err() {
                        break;
                    }
                }
            })
            .abort_handle(),
        );
        debug!("sleep timer {}: scheduled in {:?}", generation, delay);
    }

    pub fn cancel(&mut self) {
        for task in [self.stop.take(), self.tick.take()].into_iter().flatten() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop.is_some() || self.tick.is_some()
    }
}

impl Drop for SleepTimerTasks {
    fn drop(&mut self) {
        self.cancel();
    }
}

//! The auto-lock timer.
//!
//! A small actor holding a resettable deadline on its stack. Unlock arms
//! it, each handled message resets it, and when it fires it sends the
//! lock signal. It runs from worker startup, so an alarm can fire (and
//! lock) even before session restoration has finished.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info};

#[derive(Copy, Clone, Debug)]
pub enum TimerCmd {
    /// A user-driven message arrived; push the deadline out.
    Activity,
    /// Arm (or re-arm) with a new delay.
    Arm(Duration),
    /// Stop the countdown (explicit lock, or auto-lock disabled).
    Disarm,
}

pub struct AutoLockTimer {
    cmd_rx: mpsc::Receiver<TimerCmd>,
    lock_tx: mpsc::Sender<()>,
}

fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365)
}

impl AutoLockTimer {
    pub fn new(
        cmd_rx: mpsc::Receiver<TimerCmd>,
        lock_tx: mpsc::Sender<()>,
    ) -> Self {
        Self { cmd_rx, lock_tx }
    }

    pub async fn run(mut self) {
        let mut armed: Option<Duration> = None;
        let sleep = time::sleep_until(far_future());
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                () = &mut sleep, if armed.is_some() => {
                    info!("auto-lock timer fired");
                    armed = None;
                    sleep.as_mut().reset(far_future());
                    if self.lock_tx.send(()).await.is_err() {
                        break;
                    }
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(TimerCmd::Activity) => {
                        if let Some(duration) = armed {
                            sleep.as_mut().reset(Instant::now() + duration);
                        }
                    }
                    Some(TimerCmd::Arm(duration)) => {
                        debug!(?duration, "auto-lock armed");
                        armed = Some(duration);
                        sleep.as_mut().reset(Instant::now() + duration);
                    }
                    Some(TimerCmd::Disarm) => {
                        debug!("auto-lock disarmed");
                        armed = None;
                    }
                    None => break,
                },
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Rig {
        cmd_tx: mpsc::Sender<TimerCmd>,
        lock_rx: mpsc::Receiver<()>,
        _task: tokio::task::JoinHandle<()>,
    }

    fn rig() -> Rig {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (lock_tx, lock_rx) = mpsc::channel(8);
        let task = tokio::spawn(AutoLockTimer::new(cmd_rx, lock_tx).run());
        Rig {
            cmd_tx,
            lock_rx,
            _task: task,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let mut rig = rig();
        rig.cmd_tx
            .send(TimerCmd::Arm(Duration::from_secs(60)))
            .await
            .unwrap();
        time::advance(Duration::from_secs(61)).await;
        rig.lock_rx.recv().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn activity_resets_deadline() {
        let mut rig = rig();
        rig.cmd_tx
            .send(TimerCmd::Arm(Duration::from_secs(60)))
            .await
            .unwrap();
        time::advance(Duration::from_secs(45)).await;
        rig.cmd_tx.send(TimerCmd::Activity).await.unwrap();
        time::advance(Duration::from_secs(45)).await;
        // 90s total elapsed, but only 45s since the last activity.
        assert!(rig.lock_rx.try_recv().is_err());
        time::advance(Duration::from_secs(16)).await;
        rig.lock_rx.recv().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_cancels() {
        let mut rig = rig();
        rig.cmd_tx
            .send(TimerCmd::Arm(Duration::from_secs(60)))
            .await
            .unwrap();
        rig.cmd_tx.send(TimerCmd::Disarm).await.unwrap();
        time::advance(Duration::from_secs(3600)).await;
        assert!(rig.lock_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_fire_unarmed() {
        let mut rig = rig();
        time::advance(Duration::from_secs(3600)).await;
        assert!(rig.lock_rx.try_recv().is_err());
    }
}

//! # Power Module
//!
//! Debounced display power management driven by presence events.
//!
//! The display is switched on as soon as someone is present and switched off
//! only after nobody has been seen for the configured delay. Every `AWAY`
//! restarts that countdown; at most one countdown exists at a time.
//!
//! Power commands run in their own tasks. The in-memory state follows only
//! confirmed command results, so a failed switch is retried by the next
//! qualifying event.

pub mod command;

use std::sync::Arc;

use chrono::{DateTime, Local};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::error::Result;
use crate::event::{Event, Presence};

pub use command::{CommandLine, DisplayPower, ShellDisplayPower};

/// delay used when none is configured
pub const DEFAULT_OFF_DELAY: Duration = Duration::from_secs(60);

/// Which way a power command switches the display.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    fn is_on(self) -> bool {
        self == Switch::On
    }
}

/// Point-in-time view of the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PowerSnapshot {
    pub display_on: bool,
    pub timer_pending: bool,
    pub command_in_flight: Option<Switch>,
    /// local time of the last confirmed switch
    pub changed_at: Option<DateTime<Local>>,
}

struct PendingOff {
    id: u64,
    task: Option<JoinHandle<()>>,
}

/// Power state machine. Every method is called with the controller lock held
/// and returns the command to issue, if any.
struct PowerState {
    display_on: bool,
    in_flight: Option<Switch>,
    /// a PRESENT arrived while the display was being switched off
    wake_after_off: bool,
    /// the off-timer fired while the display was being switched on
    off_after_on: bool,
    pending_off: Option<PendingOff>,
    next_timer_id: u64,
    changed_at: Option<DateTime<Local>>,
}

impl PowerState {
    fn new() -> Self {
        PowerState {
            display_on: true,
            in_flight: None,
            wake_after_off: false,
            off_after_on: false,
            pending_off: None,
            next_timer_id: 0,
            changed_at: None,
        }
    }

    fn cancel_pending(&mut self) {
        self.off_after_on = false;
        if let Some(pending) = self.pending_off.take() {
            debug!("Cancelling off-timer {}", pending.id);
            if let Some(task) = pending.task {
                task.abort();
            }
        }
    }

    fn present(&mut self) -> Option<Switch> {
        self.cancel_pending();
        match self.in_flight {
            Some(Switch::Off) => {
                self.wake_after_off = true;
                None
            }
            Some(Switch::On) => None,
            None if !self.display_on => self.begin(Switch::On),
            None => None,
        }
    }

    /// Returns the id of the timer to arm, if any.
    fn away(&mut self) -> Option<u64> {
        self.cancel_pending();
        self.wake_after_off = false;
        let will_be_on = match self.in_flight {
            Some(switch) => switch.is_on(),
            None => self.display_on,
        };
        if !will_be_on {
            return None;
        }
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        self.pending_off = Some(PendingOff { id, task: None });
        Some(id)
    }

    fn timer_fired(&mut self, id: u64) -> Option<Switch> {
        if self.pending_off.as_ref().map(|p| p.id) != Some(id) {
            debug!("Off-timer {id} fired after cancellation");
            return None;
        }
        self.pending_off = None;
        match self.in_flight {
            Some(Switch::On) => {
                debug!("Off-timer {id} fired during power-on, switching off afterwards");
                self.off_after_on = true;
                None
            }
            Some(Switch::Off) => None,
            None if self.display_on => self.begin(Switch::Off),
            None => None,
        }
    }

    fn completed(&mut self, switch: Switch, succeeded: bool) -> Option<Switch> {
        self.in_flight = None;
        if succeeded {
            self.display_on = switch.is_on();
            self.changed_at = Some(Local::now());
        }
        match switch {
            Switch::Off if std::mem::take(&mut self.wake_after_off) && !self.display_on => {
                self.begin(Switch::On)
            }
            Switch::On if std::mem::take(&mut self.off_after_on) && self.display_on => {
                self.begin(Switch::Off)
            }
            _ => None,
        }
    }

    fn begin(&mut self, switch: Switch) -> Option<Switch> {
        self.in_flight = Some(switch);
        Some(switch)
    }

    fn snapshot(&self) -> PowerSnapshot {
        PowerSnapshot {
            display_on: self.display_on,
            timer_pending: self.pending_off.is_some() || self.off_after_on,
            command_in_flight: self.in_flight,
            changed_at: self.changed_at,
        }
    }
}

struct Shared {
    state: Mutex<PowerState>,
    display: Arc<dyn DisplayPower>,
    off_delay: Duration,
}

impl Shared {
    fn issue(self: &Arc<Self>, switch: Switch) {
        info!("Switching display {switch:?}");
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let result: Result<()> = shared.display.set_power(switch.is_on()).await;
            let succeeded = match result {
                Ok(()) => {
                    info!("Display is now {switch:?}");
                    true
                }
                Err(e) => {
                    warn!("Display switch {switch:?} failed: {e}");
                    false
                }
            };
            let next = shared.state.lock().completed(switch, succeeded);
            if let Some(next) = next {
                shared.issue(next);
            }
        });
    }

    fn arm(self: &Arc<Self>, state: &mut PowerState, id: u64) {
        let shared = Arc::clone(self);
        let delay = self.off_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let switch = shared.state.lock().timer_fired(id);
            if let Some(switch) = switch {
                shared.issue(switch);
            }
        });
        if let Some(pending) = state.pending_off.as_mut() {
            pending.task = Some(task);
        }
        info!("Display goes off in {delay:?} unless someone shows up");
    }
}

/// Owns the display power state and its off-timer.
#[derive(Clone)]
pub struct PowerController {
    shared: Arc<Shared>,
}

impl PowerController {
    /// The display is assumed on at construction.
    pub fn new(display: Arc<dyn DisplayPower>, off_delay: Duration) -> Self {
        PowerController {
            shared: Arc::new(Shared {
                state: Mutex::new(PowerState::new()),
                display,
                off_delay,
            }),
        }
    }

    /// Feeds one event. Gestures leave the power state alone.
    pub fn handle_event(&self, event: &Event) {
        let Some(presence) = event.presence() else {
            return;
        };
        let mut state = self.shared.state.lock();
        match presence {
            Presence::Present => {
                if let Some(switch) = state.present() {
                    self.shared.issue(switch);
                }
            }
            Presence::Away => {
                if let Some(id) = state.away() {
                    self.shared.arm(&mut state, id);
                }
            }
            Presence::Other(value) => {
                debug!("Unknown presence value {value:?}");
                state.cancel_pending();
            }
        }
    }

    pub fn snapshot(&self) -> PowerSnapshot {
        self.shared.state.lock().snapshot()
    }

    /// Cancels a pending off-timer.
    pub fn shutdown(&self) {
        self.shared.state.lock().cancel_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use async_trait::async_trait;
    use command::MockDisplayPower;
    use mockall::predicate::eq;
    use std::collections::VecDeque;

    const DELAY: Duration = Duration::from_secs(60);

    /// Records every switch; pops scripted failures first.
    #[derive(Default)]
    struct RecordingDisplay {
        calls: Mutex<Vec<bool>>,
        failures: Mutex<VecDeque<bool>>,
    }

    impl RecordingDisplay {
        fn calls(&self) -> Vec<bool> {
            self.calls.lock().clone()
        }

        fn fail_next(&self, on: bool) {
            self.failures.lock().push_back(on);
        }
    }

    #[async_trait]
    impl DisplayPower for RecordingDisplay {
        async fn set_power(&self, on: bool) -> Result<()> {
            self.calls.lock().push(on);
            let mut failures = self.failures.lock();
            if failures.front() == Some(&on) {
                failures.pop_front();
                return Err(RelayError::power_command("display", "exit status: 1"));
            }
            Ok(())
        }
    }

    fn controller() -> (PowerController, Arc<RecordingDisplay>) {
        let display = Arc::new(RecordingDisplay::default());
        let controller = PowerController::new(display.clone(), DELAY);
        (controller, display)
    }

    fn away() -> Event {
        Event::Presence(Presence::Away)
    }

    fn present() -> Event {
        Event::Presence(Presence::Present)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_on() {
        let (controller, display) = controller();
        let snapshot = controller.snapshot();
        assert!(snapshot.display_on);
        assert!(!snapshot.timer_pending);
        assert!(snapshot.changed_at.is_none());

        controller.handle_event(&present());
        settle().await;
        assert!(display.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_away_then_present_round_trip() {
        let (controller, display) = controller();

        controller.handle_event(&away());
        assert!(controller.snapshot().timer_pending);
        tokio::time::sleep(DELAY + Duration::from_secs(1)).await;

        assert_eq!(display.calls(), vec![false]);
        let snapshot = controller.snapshot();
        assert!(!snapshot.display_on);
        assert!(!snapshot.timer_pending);
        assert!(snapshot.changed_at.is_some());

        controller.handle_event(&present());
        settle().await;
        assert_eq!(display.calls(), vec![false, true]);
        assert!(controller.snapshot().display_on);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_away_restarts_countdown() {
        let (controller, display) = controller();

        controller.handle_event(&away());
        tokio::time::sleep(Duration::from_secs(40)).await;
        controller.handle_event(&away());
        tokio::time::sleep(Duration::from_secs(40)).await;
        controller.handle_event(&away());

        // 80s after the first AWAY, still nothing
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(display.calls().is_empty());
        assert!(controller.snapshot().timer_pending);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(display.calls(), vec![false]);

        tokio::time::sleep(DELAY * 3).await;
        assert_eq!(display.calls(), vec![false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_present_cancels_countdown() {
        let (controller, display) = controller();

        controller.handle_event(&away());
        tokio::time::sleep(Duration::from_secs(30)).await;
        controller.handle_event(&present());
        assert!(!controller.snapshot().timer_pending);

        tokio::time::sleep(DELAY * 2).await;
        assert!(display.calls().is_empty());
        assert!(controller.snapshot().display_on);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gesture_does_not_touch_countdown() {
        let (controller, display) = controller();

        controller.handle_event(&away());
        tokio::time::sleep(Duration::from_secs(30)).await;
        controller.handle_event(&Event::Gesture("LEFT".to_string()));
        assert!(controller.snapshot().timer_pending);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(display.calls(), vec![false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_presence_cancels_countdown() {
        let (controller, display) = controller();

        controller.handle_event(&away());
        controller.handle_event(&Event::Presence(Presence::Other("UNKNOWN".to_string())));
        tokio::time::sleep(DELAY * 2).await;
        assert!(display.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_away_while_off_arms_nothing() {
        let (controller, display) = controller();

        controller.handle_event(&away());
        tokio::time::sleep(DELAY + Duration::from_secs(1)).await;
        controller.handle_event(&away());
        assert!(!controller.snapshot().timer_pending);

        tokio::time::sleep(DELAY * 2).await;
        assert_eq!(display.calls(), vec![false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_off_keeps_display_on_and_retries() {
        let (controller, display) = controller();
        display.fail_next(false);

        controller.handle_event(&away());
        tokio::time::sleep(DELAY + Duration::from_secs(1)).await;
        let snapshot = controller.snapshot();
        assert!(snapshot.display_on);
        assert!(snapshot.changed_at.is_none());

        controller.handle_event(&away());
        tokio::time::sleep(DELAY + Duration::from_secs(1)).await;
        assert_eq!(display.calls(), vec![false, false]);
        assert!(!controller.snapshot().display_on);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_on_is_retried_by_next_present() {
        let (controller, display) = controller();

        controller.handle_event(&away());
        tokio::time::sleep(DELAY + Duration::from_secs(1)).await;
        display.fail_next(true);

        controller.handle_event(&present());
        settle().await;
        assert!(!controller.snapshot().display_on);

        controller.handle_event(&present());
        settle().await;
        assert_eq!(display.calls(), vec![false, true, true]);
        assert!(controller.snapshot().display_on);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_countdown() {
        let (controller, display) = controller();

        controller.handle_event(&away());
        controller.shutdown();
        controller.shutdown();
        tokio::time::sleep(DELAY * 2).await;
        assert!(display.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_off_command_with_mock() {
        let mut display = MockDisplayPower::new();
        display
            .expect_set_power()
            .with(eq(false))
            .times(1)
            .returning(|_| Ok(()));
        let controller = PowerController::new(Arc::new(display), DELAY);

        for _ in 0..3 {
            controller.handle_event(&away());
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        tokio::time::sleep(DELAY).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!controller.snapshot().display_on);
    }

    /// Power-on takes a while; power-off is immediate.
    #[derive(Default)]
    struct SlowOnDisplay {
        calls: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl DisplayPower for SlowOnDisplay {
        async fn set_power(&self, on: bool) -> Result<()> {
            self.calls.lock().push(on);
            if on {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_expiring_during_power_on_still_switches_off() {
        let display = Arc::new(SlowOnDisplay::default());
        let controller = PowerController::new(display.clone(), Duration::from_secs(1));

        controller.handle_event(&away());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!controller.snapshot().display_on);

        controller.handle_event(&present());
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.handle_event(&away());

        // countdown ran out while the power-on was still running
        tokio::time::sleep(Duration::from_secs(2)).await;
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.command_in_flight, Some(Switch::On));
        assert!(snapshot.timer_pending);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(*display.calls.lock(), vec![false, true, false]);
        let snapshot = controller.snapshot();
        assert!(!snapshot.display_on);
        assert!(!snapshot.timer_pending);
    }

    #[test]
    fn test_timer_during_power_on_owes_power_off() {
        let mut state = PowerState::new();
        state.display_on = false;
        assert_eq!(state.present(), Some(Switch::On));
        let id = state.away().unwrap();

        assert_eq!(state.timer_fired(id), None);
        assert!(state.snapshot().timer_pending);
        assert_eq!(state.completed(Switch::On, true), Some(Switch::Off));
        assert_eq!(state.completed(Switch::Off, true), None);
        assert!(!state.display_on);
    }

    #[test]
    fn test_present_clears_owed_power_off() {
        let mut state = PowerState::new();
        state.display_on = false;
        state.present();
        let id = state.away().unwrap();
        state.timer_fired(id);

        assert_eq!(state.present(), None);
        assert_eq!(state.completed(Switch::On, true), None);
        assert!(state.display_on);
        assert!(!state.snapshot().timer_pending);
    }

    #[test]
    fn test_failed_power_on_drops_owed_power_off() {
        let mut state = PowerState::new();
        state.display_on = false;
        state.present();
        let id = state.away().unwrap();
        state.timer_fired(id);

        assert_eq!(state.completed(Switch::On, false), None);
        assert!(!state.display_on);
        assert!(!state.off_after_on);
    }

    #[test]
    fn test_late_timer_is_ignored() {
        let mut state = PowerState::new();
        let first = state.away().unwrap();
        let second = state.away().unwrap();
        assert_ne!(first, second);

        assert_eq!(state.timer_fired(first), None);
        assert_eq!(state.timer_fired(second), Some(Switch::Off));
        // cancelling after the timer started its command is a no-op
        state.cancel_pending();
        assert_eq!(state.in_flight, Some(Switch::Off));
    }

    #[test]
    fn test_present_during_power_off_wakes_afterwards() {
        let mut state = PowerState::new();
        let id = state.away().unwrap();
        assert_eq!(state.timer_fired(id), Some(Switch::Off));

        assert_eq!(state.present(), None);
        assert_eq!(state.completed(Switch::Off, true), Some(Switch::On));
        assert_eq!(state.completed(Switch::On, true), None);
        assert!(state.display_on);
    }

    #[test]
    fn test_away_during_power_on_arms_timer() {
        let mut state = PowerState::new();
        state.display_on = false;
        assert_eq!(state.present(), Some(Switch::On));
        assert!(state.away().is_some());
        assert_eq!(state.completed(Switch::On, true), None);
        assert!(state.pending_off.is_some());
    }
}

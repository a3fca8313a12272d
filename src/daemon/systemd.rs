// src/daemon/systemd.rs

//! sd_notify support for edenfs
//!
//! The unit template declares `Type=notify`, so `systemctl --user start`
//! only returns, and the unit only reaches `active (running)`, once the
//! daemon sends `READY=1`. Under a watchdog (`WatchdogSec=`) the daemon
//! pings at half of `WATCHDOG_USEC`.
//!
//! Without `NOTIFY_SOCKET` in the environment every call is a no-op, which
//! is the normal case for `eden start --foreground` and background starts.

use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Main loop wakeup when no watchdog is configured
const IDLE_WAKEUP: Duration = Duration::from_secs(60);

/// One `KEY=VALUE` assignment of the notify protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyState<'a> {
    Ready,
    Stopping,
    Status(&'a str),
    MainPid(u32),
    Watchdog,
}

impl fmt::Display for NotifyState<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyState::Ready => f.write_str("READY=1"),
            NotifyState::Stopping => f.write_str("STOPPING=1"),
            NotifyState::Status(message) => write!(f, "STATUS={}", message),
            NotifyState::MainPid(pid) => write!(f, "MAINPID={}", pid),
            NotifyState::Watchdog => f.write_str("WATCHDOG=1"),
        }
    }
}

#[cfg(feature = "systemd")]
fn send(states: &[NotifyState<'_>]) -> bool {
    let converted: Vec<sd_notify::NotifyState> = states
        .iter()
        .map(|state| match state {
            NotifyState::Ready => sd_notify::NotifyState::Ready,
            NotifyState::Stopping => sd_notify::NotifyState::Stopping,
            NotifyState::Status(message) => sd_notify::NotifyState::Status(message),
            NotifyState::MainPid(pid) => sd_notify::NotifyState::MainPid(*pid),
            NotifyState::Watchdog => sd_notify::NotifyState::Watchdog,
        })
        .collect();

    // NOTIFY_SOCKET stays set: watchdog pings follow READY
    match sd_notify::notify(false, &converted) {
        Ok(()) => true,
        Err(e) => {
            warn!("sd_notify failed: {}", e);
            false
        }
    }
}

#[cfg(not(feature = "systemd"))]
fn send(_states: &[NotifyState<'_>]) -> bool {
    false
}

/// Ping interval for a `WATCHDOG_USEC` value
pub fn watchdog_interval(watchdog_usec: Option<&str>) -> Option<Duration> {
    let usec = watchdog_usec?.trim().parse::<u64>().ok()?;
    (usec > 0).then(|| Duration::from_micros(usec) / 2)
}

/// Keeps track of when the next watchdog ping is due
#[derive(Debug)]
pub struct Watchdog {
    interval: Duration,
    last_ping: Instant,
}

impl Watchdog {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_ping: Instant::now(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a ping is due at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        now.duration_since(self.last_ping) >= self.interval
    }

    fn pinged(&mut self, now: Instant) {
        self.last_ping = now;
    }
}

/// Notification state of the running daemon
#[derive(Debug)]
pub struct SystemdNotifier {
    enabled: bool,
    watchdog: Option<Watchdog>,
}

impl SystemdNotifier {
    /// Notifier for this process, enabled when systemd set `NOTIFY_SOCKET`
    pub fn from_env() -> Self {
        if std::env::var_os("NOTIFY_SOCKET").is_none() {
            return Self::disabled();
        }
        let watchdog = watchdog_interval(std::env::var("WATCHDOG_USEC").ok().as_deref());
        debug!("Running under systemd, watchdog interval {:?}", watchdog);
        Self {
            enabled: true,
            watchdog: watchdog.map(Watchdog::new),
        }
    }

    /// Notifier that sends nothing
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            watchdog: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn notify(&self, states: &[NotifyState<'_>]) {
        if self.enabled && send(states) {
            let sent: Vec<String> = states.iter().map(ToString::to_string).collect();
            debug!("sd_notify: {}", sent.join(" "));
        }
    }

    /// Report readiness along with the main pid and a status line
    pub fn ready(&self, status: &str) {
        self.notify(&[
            NotifyState::Ready,
            NotifyState::MainPid(std::process::id()),
            NotifyState::Status(status),
        ]);
    }

    pub fn status(&self, message: &str) {
        self.notify(&[NotifyState::Status(message)]);
    }

    pub fn stopping(&self) {
        self.notify(&[NotifyState::Stopping, NotifyState::Status("shutting down")]);
    }

    /// Ping the watchdog if a ping is due
    pub fn tick(&mut self) {
        let now = Instant::now();
        let due = self.watchdog.as_ref().is_some_and(|w| w.is_due(now));
        if due {
            self.notify(&[NotifyState::Watchdog]);
            if let Some(watchdog) = self.watchdog.as_mut() {
                watchdog.pinged(now);
            }
        }
    }

    /// How long the main loop may sleep between ticks
    pub fn wakeup_interval(&self) -> Duration {
        self.watchdog.as_ref().map_or(IDLE_WAKEUP, Watchdog::interval)
    }
}

use std::time::Instant;

use crate::config::HeartbeatConfig;

/// What the engine should do on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeartbeatAction {
    Idle,
    SendPing,
    /// Too many consecutive pongs were missed.
    Expired { missed: u8 },
}

/// Ping/pong bookkeeping for one connection.
#[derive(Debug, Clone)]
pub(crate) struct Heartbeat {
    config: HeartbeatConfig,
    last_ping: Instant,
    awaiting_pong: bool,
    force_ping: bool,
    missed: u8,
}

impl Heartbeat {
    pub(crate) fn new(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            last_ping: now,
            awaiting_pong: false,
            force_ping: false,
            missed: 0,
        }
    }

    pub(crate) fn reset(&mut self, now: Instant) {
        self.last_ping = now;
        self.awaiting_pong = false;
        self.force_ping = false;
        self.missed = 0;
    }

    /// Checks the pong deadline first, then whether a ping is due.
    ///
    /// A missed pong schedules an immediate re-ping, so the returned action
    /// is `SendPing` unless the miss limit was reached.
    pub(crate) fn poll(&mut self, now: Instant) -> HeartbeatAction {
        let since_ping = now.saturating_duration_since(self.last_ping);

        if self.awaiting_pong && since_ping > self.config.pong_timeout {
            self.awaiting_pong = false;
            self.missed = self.missed.saturating_add(1);
            tracing::debug!(missed = self.missed, "pong timeout");

            let limit = self.config.disconnect_timeout_count;
            if limit > 0 && self.missed >= limit {
                return HeartbeatAction::Expired {
                    missed: self.missed,
                };
            }
            self.force_ping = true;
        }

        if self.force_ping || (!self.awaiting_pong && since_ping >= self.config.interval) {
            return HeartbeatAction::SendPing;
        }
        HeartbeatAction::Idle
    }

    pub(crate) fn on_ping_sent(&mut self, now: Instant) {
        self.last_ping = now;
        self.awaiting_pong = true;
        self.force_ping = false;
    }

    pub(crate) fn on_pong(&mut self) {
        self.awaiting_pong = false;
        self.missed = 0;
    }

    #[cfg(test)]
    pub(crate) fn missed(&self) -> u8 {
        self.missed
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn config(count: u8) -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(3),
            disconnect_timeout_count: count,
        }
    }

    #[test]
    fn test_ping_after_interval() {
        let t0 = Instant::now();
        let mut hb = Heartbeat::new(config(2), t0);

        assert_eq!(hb.poll(t0 + Duration::from_secs(14)), HeartbeatAction::Idle);
        assert_eq!(hb.poll(t0 + Duration::from_secs(15)), HeartbeatAction::SendPing);

        hb.on_ping_sent(t0 + Duration::from_secs(15));
        assert_eq!(hb.poll(t0 + Duration::from_secs(17)), HeartbeatAction::Idle);

        hb.on_pong();
        assert_eq!(hb.poll(t0 + Duration::from_secs(29)), HeartbeatAction::Idle);
        assert_eq!(hb.poll(t0 + Duration::from_secs(30)), HeartbeatAction::SendPing);
    }

    #[test]
    fn test_missed_pongs_expire() {
        let t0 = Instant::now();
        let mut hb = Heartbeat::new(config(2), t0);

        hb.on_ping_sent(t0);
        let t1 = t0 + Duration::from_millis(3_001);
        assert_eq!(hb.poll(t1), HeartbeatAction::SendPing, "re-ping after first miss");
        assert_eq!(hb.missed(), 1);

        hb.on_ping_sent(t1);
        let t2 = t1 + Duration::from_millis(3_001);
        assert_eq!(hb.poll(t2), HeartbeatAction::Expired { missed: 2 });
    }

    #[test]
    fn test_pong_resets_miss_count() {
        let t0 = Instant::now();
        let mut hb = Heartbeat::new(config(2), t0);

        hb.on_ping_sent(t0);
        let t1 = t0 + Duration::from_secs(4);
        assert_eq!(hb.poll(t1), HeartbeatAction::SendPing);
        hb.on_ping_sent(t1);
        hb.on_pong();
        assert_eq!(hb.missed(), 0);

        hb.on_ping_sent(t1 + Duration::from_secs(15));
        assert_eq!(
            hb.poll(t1 + Duration::from_secs(19)),
            HeartbeatAction::SendPing
        );
        assert_eq!(hb.missed(), 1);
    }

    #[test]
    fn test_zero_count_never_expires() {
        let t0 = Instant::now();
        let mut hb = Heartbeat::new(config(0), t0);

        let mut now = t0;
        for _ in 0..10 {
            hb.on_ping_sent(now);
            now += Duration::from_secs(4);
            assert_eq!(hb.poll(now), HeartbeatAction::SendPing);
        }
        assert_eq!(hb.missed(), 10);
    }
}

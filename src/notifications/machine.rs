//! Connection state machine of the realtime channel.
//!
//! [`ChannelMachine::reduce`] is the only place where the channel's state
//! changes. It performs no I/O; the driver in `channel.rs` carries out the
//! returned [`Effect`] and feeds the outcome back in as the next [`Input`].

use std::time::Duration;

/// Close code sent by either side for a deliberate, clean shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// No close frame was received (dropped connection, failed dial).
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Server refused the credential: token missing, invalid or expired.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
/// Server accepted the credential but the user may not subscribe.
pub const CLOSE_FORBIDDEN: u16 = 4003;

/// Close codes after which reconnecting with the same token cannot help.
pub fn is_auth_rejection(code: u16) -> bool {
    matches!(code, CLOSE_UNAUTHORIZED | CLOSE_FORBIDDEN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Closed on purpose; nothing scheduled.
    ClosedClean,
    /// Closed because the server rejected the credential; nothing scheduled.
    ClosedRejected,
    /// Dropped; a reconnect is scheduled.
    ClosedRetryable,
    /// Gave up after the maximum number of reconnects.
    ClosedFatal,
}

impl ConnectionState {
    /// True if the channel will not do anything further on its own.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::ClosedClean
                | ConnectionState::ClosedRejected
                | ConnectionState::ClosedFatal
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Connect,
    Opened,
    Closed(u16),
    RetryElapsed,
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    Dial,
    ScheduleReconnect { attempt: u32, delay: Duration },
    Rejected { code: u16 },
    Fatal { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct ChannelMachine {
    state: ConnectionState,
    attempts: u32,
    max_attempts: u32,
    retry_delay: Duration,
}

impl ChannelMachine {
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        ChannelMachine {
            state: ConnectionState::ClosedClean,
            attempts: 0,
            max_attempts,
            retry_delay,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive reconnects since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reduce(&mut self, input: Input) -> Effect {
        use ConnectionState::*;

        match (self.state, input) {
            (Connecting | Open, Input::Connect) => Effect::None,
            (_, Input::Connect) => {
                self.attempts = 0;
                self.state = Connecting;
                Effect::Dial
            }

            (Connecting, Input::Opened) => {
                self.attempts = 0;
                self.state = Open;
                Effect::None
            }
            (_, Input::Opened) => Effect::None,

            (Connecting | Open, Input::Closed(code)) => self.on_close(code),
            (_, Input::Closed(_)) => Effect::None,

            (ClosedRetryable, Input::RetryElapsed) => {
                self.state = Connecting;
                Effect::Dial
            }
            (_, Input::RetryElapsed) => Effect::None,

            (_, Input::Disconnect) => {
                self.state = ClosedClean;
                Effect::None
            }
        }
    }

    fn on_close(&mut self, code: u16) -> Effect {
        if code == CLOSE_NORMAL {
            self.state = ConnectionState::ClosedClean;
            return Effect::None;
        }
        if is_auth_rejection(code) {
            self.state = ConnectionState::ClosedRejected;
            return Effect::Rejected { code };
        }

        self.attempts += 1;
        if self.attempts > self.max_attempts {
            self.state = ConnectionState::ClosedFatal;
            return Effect::Fatal {
                attempts: self.max_attempts,
            };
        }
        self.state = ConnectionState::ClosedRetryable;
        Effect::ScheduleReconnect {
            attempt: self.attempts,
            delay: self.retry_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(3_000);

    fn connected() -> ChannelMachine {
        let mut m = ChannelMachine::new(5, DELAY);
        assert_eq!(m.reduce(Input::Connect), Effect::Dial);
        assert_eq!(m.reduce(Input::Opened), Effect::None);
        assert_eq!(m.state(), ConnectionState::Open);
        m
    }

    #[test]
    fn clean_close_does_not_reconnect() {
        let mut m = connected();
        assert_eq!(m.reduce(Input::Closed(CLOSE_NORMAL)), Effect::None);
        assert_eq!(m.state(), ConnectionState::ClosedClean);
        assert_eq!(m.reduce(Input::RetryElapsed), Effect::None);
    }

    #[test]
    fn auth_rejection_is_terminal() {
        for code in [CLOSE_UNAUTHORIZED, CLOSE_FORBIDDEN] {
            let mut m = connected();
            assert_eq!(m.reduce(Input::Closed(code)), Effect::Rejected { code });
            assert_eq!(m.state(), ConnectionState::ClosedRejected);
            assert!(m.state().is_terminal());
        }
    }

    #[test]
    fn sixth_abnormal_close_is_fatal() {
        let mut m = connected();
        for attempt in 1..=5 {
            assert_eq!(
                m.reduce(Input::Closed(CLOSE_ABNORMAL)),
                Effect::ScheduleReconnect {
                    attempt,
                    delay: DELAY
                }
            );
            assert_eq!(m.state(), ConnectionState::ClosedRetryable);
            assert_eq!(m.reduce(Input::RetryElapsed), Effect::Dial);
            assert_eq!(m.state(), ConnectionState::Connecting);
        }

        assert_eq!(
            m.reduce(Input::Closed(CLOSE_ABNORMAL)),
            Effect::Fatal { attempts: 5 }
        );
        assert_eq!(m.state(), ConnectionState::ClosedFatal);
        assert_eq!(m.reduce(Input::RetryElapsed), Effect::None);
        assert_eq!(m.reduce(Input::Closed(CLOSE_ABNORMAL)), Effect::None);
    }

    #[test]
    fn successful_open_resets_attempts() {
        let mut m = connected();
        for _ in 0..4 {
            m.reduce(Input::Closed(CLOSE_ABNORMAL));
            m.reduce(Input::RetryElapsed);
        }
        assert_eq!(m.attempts(), 4);
        m.reduce(Input::Opened);
        assert_eq!(m.attempts(), 0);

        assert!(matches!(
            m.reduce(Input::Closed(1011)),
            Effect::ScheduleReconnect { attempt: 1, .. }
        ));
    }

    #[test]
    fn disconnect_cancels_pending_reconnect() {
        let mut m = connected();
        m.reduce(Input::Closed(CLOSE_ABNORMAL));
        assert_eq!(m.reduce(Input::Disconnect), Effect::None);
        assert_eq!(m.state(), ConnectionState::ClosedClean);
        assert_eq!(m.reduce(Input::RetryElapsed), Effect::None);
    }

    #[test]
    fn disconnect_while_open_is_clean() {
        let mut m = connected();
        assert_eq!(m.reduce(Input::Disconnect), Effect::None);
        assert_eq!(m.state(), ConnectionState::ClosedClean);
        // The close frame echo arrives after we already moved on.
        assert_eq!(m.reduce(Input::Closed(CLOSE_NORMAL)), Effect::None);
    }

    #[test]
    fn explicit_connect_after_fatal_starts_over() {
        let mut m = ChannelMachine::new(0, DELAY);
        m.reduce(Input::Connect);
        assert_eq!(
            m.reduce(Input::Closed(CLOSE_ABNORMAL)),
            Effect::Fatal { attempts: 0 }
        );
        assert_eq!(m.reduce(Input::Connect), Effect::Dial);
        assert_eq!(m.attempts(), 0);
        assert_eq!(m.reduce(Input::Connect), Effect::None);
    }
}

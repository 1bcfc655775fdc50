//! Generic-timer channels.
//!
//! Each core has one one-shot deadline per channel. The engine arms a channel with
//! `notify`, the kernel fires due channels between quanta, and firing or cancelling clears
//! the deadline.

use std::fmt;

use crate::common::constants::TIMER_CHANNELS;

/// A generic-timer channel; the discriminant is the event id the engine uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerChannel {
    /// Non-secure physical timer.
    Physical = 0,
    /// Virtual timer.
    Virtual = 1,
    /// Hypervisor timer.
    Hypervisor = 2,
    /// Secure physical timer.
    Secure = 3,
}

impl TimerChannel {
    /// Every channel in event-id order.
    pub const ALL: [Self; TIMER_CHANNELS] =
        [Self::Physical, Self::Virtual, Self::Hypervisor, Self::Secure];

    /// Index into per-channel tables.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Event id used by [`crate::engine::Environment::notify`].
    pub const fn event_id(self) -> u64 {
        self as u64
    }

    /// Output interrupt line raised when the channel fires.
    pub const fn line(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u64> for TimerChannel {
    type Error = u64;

    fn try_from(id: u64) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(Self::Physical),
            1 => Ok(Self::Virtual),
            2 => Ok(Self::Hypervisor),
            3 => Ok(Self::Secure),
            other => Err(other),
        }
    }
}

impl fmt::Display for TimerChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Physical => "physical",
            Self::Virtual => "virtual",
            Self::Hypervisor => "hypervisor",
            Self::Secure => "secure",
        };
        f.write_str(name)
    }
}

/// A pending timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerEvent {
    /// Channel to fire.
    pub channel: TimerChannel,
    /// Absolute deadline in picoseconds.
    pub deadline_ps: u64,
}

/// Deadlines for every channel of one core.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TimerSet {
    deadlines: [Option<u64>; TIMER_CHANNELS],
}

impl TimerSet {
    /// Arms `channel` at `deadline_ps`, replacing and returning any earlier deadline.
    pub fn arm(&mut self, channel: TimerChannel, deadline_ps: u64) -> Option<u64> {
        self.deadlines[channel.index()].replace(deadline_ps)
    }

    /// Disarms `channel`; returns the deadline that was pending, if any.
    pub fn cancel(&mut self, channel: TimerChannel) -> Option<u64> {
        self.deadlines[channel.index()].take()
    }

    /// Deadline pending on `channel`.
    pub const fn pending(&self, channel: TimerChannel) -> Option<u64> {
        self.deadlines[channel.index()]
    }

    /// Earliest pending timer.
    pub fn next(&self) -> Option<TimerEvent> {
        TimerChannel::ALL
            .iter()
            .filter_map(|&channel| {
                self.pending(channel).map(|deadline_ps| TimerEvent {
                    channel,
                    deadline_ps,
                })
            })
            .min_by_key(|e| (e.deadline_ps, e.channel))
    }

    /// Disarms and returns every timer due at `now_ps`, earliest first.
    pub fn take_due(&mut self, now_ps: u64) -> Vec<TimerEvent> {
        let mut due: Vec<TimerEvent> = TimerChannel::ALL
            .iter()
            .filter_map(|&channel| match self.pending(channel) {
                Some(deadline_ps) if deadline_ps <= now_ps => {
                    let _ = self.cancel(channel);
                    Some(TimerEvent {
                        channel,
                        deadline_ps,
                    })
                }
                _ => None,
            })
            .collect();
        due.sort_by_key(|e| (e.deadline_ps, e.channel));
        due
    }
}

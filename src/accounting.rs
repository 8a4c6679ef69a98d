//! Connection accounting.
//!
//! Tracks past duplex/simplex connections in rolling 30-minute-slot
//! bitmasks and answers the policy questions the protocol driver asks
//! before opening a connection: quota room, minimum/maximum transmit
//! intervals, and the per-minute rate limit.

use std::sync::Mutex;

use once_cell::sync::Lazy;

use crate::config::CONFIG;
use crate::props::{
    PropStore, PROP_COMM_MAX_CONNECTIONS, PROP_COMM_MAX_DUP_EVENTS, PROP_COMM_MAX_SIM_EVENTS,
    PROP_COMM_MAX_XMIT_RATE, PROP_COMM_MIN_XMIT_DELAY, PROP_COMM_MIN_XMIT_RATE,
};
use crate::transport::TransportMedia;

/// Maximum bucket count: 8 * 30 minutes = 4 hours.
pub const MAX_MASK_SIZE: usize = 8;

/// Production floor on the absolute inter-connection delay, seconds.
const MIN_XMIT_DELAY: u32 = 60;
/// Production floor on the minimum connection interval, seconds.
const MIN_XMIT_RATE: u32 = 60;

/// Bucketed history of connection start minutes. Bit *k* of bucket *b*
/// means "a connection started `30*b + k` minutes ago".
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionMask {
    shift_time: u32,
    last_conn_time: u32,
    mask: [u32; MAX_MASK_SIZE],
}

impl ConnectionMask {
    /// Time of the most recent marked connection (0 = never).
    pub fn last_connection_time(&self) -> u32 {
        self.last_conn_time
    }

    /// Shifts the bit stream left by `minutes`, carrying across buckets
    /// and masking each bucket to 30 bits.
    fn shift_minutes(&mut self, mut minutes: u32, mask_len: usize) {
        if minutes == 0 {
            return;
        }
        if minutes >= (mask_len as u32) * 30 {
            self.mask = [0; MAX_MASK_SIZE];
            return;
        }
        while minutes > 0 {
            let step = minutes.min(30);
            let mut carry = 0u32;
            for bucket in self.mask.iter_mut().take(mask_len) {
                let out = (*bucket >> (30 - step)) & ((1u32 << step) - 1);
                *bucket = ((*bucket << step) | carry) & 0x3FFF_FFFF;
                carry = out;
            }
            minutes -= step;
        }
    }

    /// Shifts by the whole minutes elapsed since the last shift.
    fn shift_elapsed(&mut self, now: u32, mask_len: usize) {
        let delta = now.saturating_sub(self.shift_time);
        let minutes = delta / 60;
        if minutes == 0 {
            return;
        }
        self.shift_time = now - (delta % 60);
        self.shift_minutes(minutes, mask_len);
    }

    /// Connections within the masked window.
    fn count(&mut self, now: u32, mask_len: usize) -> u32 {
        self.shift_elapsed(now, mask_len);
        self.mask
            .iter()
            .take(mask_len)
            .map(|b| b.count_ones())
            .sum()
    }

    /// Marks a connection in the current minute. Returns `false` when the
    /// current-minute bit was already set (two connections in the same
    /// minute violate the absolute minimum delay); the connection is not
    /// double-counted.
    fn mark(&mut self, now: u32, mask_len: usize) -> bool {
        self.last_conn_time = now;
        self.shift_elapsed(now, mask_len);
        if self.mask[0] & 1 != 0 {
            false
        } else {
            self.mask[0] |= 1;
            true
        }
    }
}

/// The duplex/simplex connection-mask pair with the policy queries.
#[derive(Debug, Default)]
pub struct Accounting {
    duplex: ConnectionMask,
    simplex: ConnectionMask,
}

/// The process-wide accounting state.
pub static ACCOUNTING: Lazy<Mutex<Accounting>> = Lazy::new(|| Mutex::new(Accounting::default()));

impl Accounting {
    /// Creates cleared masks.
    pub fn new() -> Accounting {
        Accounting::default()
    }

    /// Mask length in 30-minute buckets, from the configured quota
    /// window rounded to the nearest half hour.
    fn mask_len(props: &PropStore) -> usize {
        let window_min = props.get_u32_at(PROP_COMM_MAX_CONNECTIONS, 2, 60);
        (((window_min + 15) / 30) as usize).clamp(1, MAX_MASK_SIZE)
    }

    fn last_connection_time(&self) -> u32 {
        self.duplex
            .last_conn_time
            .max(self.simplex.last_conn_time)
    }

    fn timer_expired(timer: u32, interval: u32, now: u32) -> bool {
        timer == 0 || now.saturating_sub(timer) >= interval
    }

    /// Marks a duplex connection. File transports never connect duplex;
    /// serial transports bypass accounting.
    pub fn mark_duplex(&mut self, props: &PropStore, now: u32, media: TransportMedia) -> bool {
        match media {
            TransportMedia::File => false,
            TransportMedia::Serial => true,
            _ => self.duplex.mark(now, Self::mask_len(props)),
        }
    }

    /// Marks a simplex connection. Serial transports never connect
    /// simplex; file transports bypass accounting.
    pub fn mark_simplex(&mut self, props: &PropStore, now: u32, media: TransportMedia) -> bool {
        match media {
            TransportMedia::File => true,
            TransportMedia::Serial => false,
            _ => self.simplex.mark(now, Self::mask_len(props)),
        }
    }

    /// Whether connection quotas are in effect at all.
    pub fn has_quota(props: &PropStore, media: TransportMedia) -> bool {
        match media {
            TransportMedia::File | TransportMedia::Serial => false,
            _ => props.get_u32_at(PROP_COMM_MAX_CONNECTIONS, 2, 60) > 0,
        }
    }

    /// Whether the total (simplex + duplex) connection count is under
    /// the configured cap.
    pub fn under_total_quota(
        &mut self,
        props: &PropStore,
        now: u32,
        media: TransportMedia,
    ) -> bool {
        match media {
            TransportMedia::File | TransportMedia::Serial => true,
            _ => {
                if !Self::has_quota(props, media) {
                    return true;
                }
                let max_total = props.get_u32_at(PROP_COMM_MAX_CONNECTIONS, 0, 1);
                if max_total == 0 {
                    return false;
                }
                let len = Self::mask_len(props);
                let total = self.simplex.count(now, len) + self.duplex.count(now, len);
                total < max_total
            }
        }
    }

    /// Whether the duplex connection count is under the duplex cap
    /// (itself capped by the total cap).
    pub fn under_duplex_quota(
        &mut self,
        props: &PropStore,
        now: u32,
        media: TransportMedia,
    ) -> bool {
        match media {
            TransportMedia::File => false,
            TransportMedia::Serial => true,
            _ => {
                if !Self::supports_duplex(props, media) {
                    return false;
                }
                if !Self::has_quota(props, media) {
                    return true;
                }
                let max_total = props.get_u32_at(PROP_COMM_MAX_CONNECTIONS, 0, 1);
                if max_total == 0 {
                    return false;
                }
                let max_duplex = props.get_u32_at(PROP_COMM_MAX_CONNECTIONS, 1, 1).min(max_total);
                if max_duplex == 0 {
                    return false;
                }
                let len = Self::mask_len(props);
                self.duplex.count(now, len) < max_duplex
            }
        }
    }

    /// Whether duplex connections are enabled.
    pub fn supports_duplex(props: &PropStore, media: TransportMedia) -> bool {
        match media {
            TransportMedia::File => false,
            TransportMedia::Serial => true,
            _ => {
                props.get_u32(PROP_COMM_MAX_DUP_EVENTS, 1) > 0
                    && props.get_u32_at(PROP_COMM_MAX_CONNECTIONS, 1, 1) > 0
            }
        }
    }

    /// Whether simplex connections are enabled.
    pub fn supports_simplex(props: &PropStore, media: TransportMedia) -> bool {
        match media {
            TransportMedia::File => true,
            TransportMedia::Serial => false,
            _ => {
                props.get_u32(PROP_COMM_MAX_SIM_EVENTS, 1) > 0
                    && props.get_u32_at(PROP_COMM_MAX_CONNECTIONS, 0, 1)
                        > props.get_u32_at(PROP_COMM_MAX_CONNECTIONS, 1, 1)
            }
        }
    }

    /// Whether the absolute minimum delay since the last connection of
    /// either kind has expired.
    pub fn absolute_delay_expired(
        &self,
        props: &PropStore,
        now: u32,
        media: TransportMedia,
    ) -> bool {
        match media {
            TransportMedia::File | TransportMedia::Serial => true,
            _ => {
                let mut delay = props.get_u32(PROP_COMM_MIN_XMIT_DELAY, 1800);
                if delay < MIN_XMIT_DELAY && !CONFIG.debug() {
                    delay = MIN_XMIT_DELAY;
                }
                Self::timer_expired(self.last_connection_time(), delay, now)
            }
        }
    }

    /// Whether the minimum interval between connections has expired.
    pub fn min_interval_expired(
        &self,
        props: &PropStore,
        now: u32,
        media: TransportMedia,
    ) -> bool {
        match media {
            TransportMedia::File | TransportMedia::Serial => true,
            _ => {
                let mut rate = props.get_u32(PROP_COMM_MIN_XMIT_RATE, 7200);
                if rate < MIN_XMIT_RATE && !CONFIG.debug() {
                    rate = MIN_XMIT_RATE;
                }
                Self::timer_expired(self.last_connection_time(), rate, now)
            }
        }
    }

    /// Whether the maximum interval without a duplex connection has
    /// expired (forces a check-in with the server). Never expires before
    /// the first duplex connection.
    pub fn max_interval_expired(
        &self,
        props: &PropStore,
        now: u32,
        media: TransportMedia,
    ) -> bool {
        match media {
            TransportMedia::File | TransportMedia::Serial => false,
            _ => {
                let rate = props.get_u32(PROP_COMM_MAX_XMIT_RATE, 86_400);
                self.duplex.last_conn_time != 0
                    && now.saturating_sub(self.duplex.last_conn_time) >= rate
            }
        }
    }
}

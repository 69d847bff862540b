//! RT-safe logging from the audio thread, grounded on
//! `knaster_core::log::ArLogMessage`/`ArLogReceiver`: a chain of small,
//! `Copy` messages pushed through a preallocated `rtrb` ring buffer and
//! terminated by `End`, so the audio thread never allocates or blocks to
//! report something.
//!
//! Everywhere off the audio thread (pre-process, post-process, client
//! threads) uses the ordinary `log` crate instead.

use core::fmt::Display;

/// One link in a log message chain. A full message is any number of these
/// followed by [`RtLogMessage::End`].
#[derive(Clone, Copy, Debug)]
pub enum RtLogMessage {
    Str(&'static str),
    Float(f64),
    Unsigned(u64),
    Signed(i64),
    /// A frame-accurate timestamp, in samples since the engine started.
    FrameTime(u64),
    /// Marks the end of a message chain.
    End,
}
impl RtLogMessage {
    pub fn is_end(&self) -> bool {
        matches!(self, RtLogMessage::End)
    }
}
impl Display for RtLogMessage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RtLogMessage::Str(s) => write!(f, "{s}"),
            RtLogMessage::Float(v) => write!(f, "{v}"),
            RtLogMessage::Unsigned(v) => write!(f, "{v}"),
            RtLogMessage::Signed(v) => write!(f, "{v}"),
            RtLogMessage::FrameTime(v) => write!(f, "t={v}"),
            RtLogMessage::End => write!(f, "<end>"),
        }
    }
}
impl From<&'static str> for RtLogMessage {
    fn from(value: &'static str) -> Self {
        RtLogMessage::Str(value)
    }
}
impl From<f32> for RtLogMessage {
    fn from(value: f32) -> Self {
        RtLogMessage::Float(value as f64)
    }
}
impl From<u64> for RtLogMessage {
    fn from(value: u64) -> Self {
        RtLogMessage::Unsigned(value)
    }
}
impl From<usize> for RtLogMessage {
    fn from(value: usize) -> Self {
        RtLogMessage::Unsigned(value as u64)
    }
}

/// Sends [`RtLogMessage`] chains from the audio thread without allocating.
pub enum RtLogSender {
    RingBuffer(rtrb::Producer<RtLogMessage>),
    /// Fallback used outside of a real audio thread (tests, non-RT tools):
    /// forwards straight to the `log` crate.
    Log,
}
impl RtLogSender {
    pub fn non_rt() -> Self {
        RtLogSender::Log
    }
    pub fn send(&mut self, message: RtLogMessage) {
        match self {
            RtLogSender::RingBuffer(p) => {
                let _ = p.push(message);
            }
            RtLogSender::Log => log::warn!("{message}"),
        }
    }
}

/// Receives [`RtLogMessage`] chains pushed by an [`RtLogSender::RingBuffer`],
/// reassembling full chains (possibly split across two `recv` calls) for the
/// post-processor thread to forward to `log`.
pub struct RtLogReceiver {
    consumer: rtrb::Consumer<RtLogMessage>,
}
impl RtLogReceiver {
    /// Creates a connected sender/receiver pair with room for `capacity`
    /// in-flight message fragments.
    pub fn new(capacity: usize) -> (RtLogSender, Self) {
        let (tx, rx) = rtrb::RingBuffer::new(capacity);
        (RtLogSender::RingBuffer(tx), Self { consumer: rx })
    }

    /// Drains whatever is currently queued, calling `handler` once per
    /// complete message chain (i.e. up to and including an `End`).
    pub fn recv(&mut self, mut handler: impl FnMut(&[RtLogMessage])) {
        let mut chain = smallvec::SmallVec::<[RtLogMessage; 8]>::new();
        while let Ok(msg) = self.consumer.pop() {
            let is_end = msg.is_end();
            chain.push(msg);
            if is_end {
                handler(&chain);
                chain.clear();
            }
        }
    }
}

/// Send a chain of [`RtLogMessage`]s through an [`RtLogSender`], appending
/// the terminating `End` automatically.
#[macro_export]
macro_rules! rt_log {
    ($sender:expr; $($msg:expr),* $(,)?) => {{
        use $crate::log::RtLogMessage;
        $( $sender.send(RtLogMessage::from($msg)); )*
        $sender.send(RtLogMessage::End);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_round_trips_through_ring_buffer() {
        let (mut tx, mut rx) = RtLogReceiver::new(64);
        rt_log!(tx; "block underrun on", 3u64, 0.5f32);
        let mut seen = 0;
        rx.recv(|chain| {
            seen += 1;
            assert!(chain.last().unwrap().is_end());
            assert_eq!(chain.len(), 4);
        });
        assert_eq!(seen, 1);
    }
}

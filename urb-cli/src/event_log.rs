//! Delivery event log
//!
//! Events are accumulated in memory and written out once, at shutdown:
//!
//! ```text
//! b <seq>            broadcast (or send) of message <seq>
//! d <source> <seq>   delivery of message <seq> from <source>
//! ```

use parking_lot::Mutex;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;
use urb::ProcessId;

/// In-memory event log shared by the sending and delivering threads
#[derive(Debug, Default)]
pub struct EventLog {
    lines: Mutex<String>,
}

impl EventLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the broadcast of message `seq`
    pub fn log_broadcast(&self, seq: u32) {
        let _ = writeln!(self.lines.lock(), "b {}", seq);
    }

    /// Record the delivery of message `seq` from `source`
    pub fn log_delivery(&self, source: ProcessId, seq: u32) {
        let _ = writeln!(self.lines.lock(), "d {} {}", source, seq);
    }

    /// Send messages `1..=count`, logging each one as it goes out
    ///
    /// Stops early once `stop` returns true or a send fails. Events logged up
    /// to that point stay in the log. Returns how many messages were sent.
    pub fn send_logged<E>(
        &self,
        count: u32,
        mut stop: impl FnMut() -> bool,
        mut send: impl FnMut(u32) -> Result<(), E>,
    ) -> Result<u32, E> {
        for seq in 1..=count {
            if stop() {
                return Ok(seq - 1);
            }
            self.log_broadcast(seq);
            send(seq)?;
        }
        Ok(count)
    }

    /// Everything logged so far
    pub fn contents(&self) -> String {
        self.lines.lock().clone()
    }

    /// Write the log to `path`, replacing any existing file
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        fs::write(path, self.lines.lock().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_line_format() {
        let log = EventLog::new();
        log.log_broadcast(1);
        log.log_delivery(3, 1);
        log.log_broadcast(2);

        assert_eq!(log.contents(), "b 1\nd 3 1\nb 2\n");
    }

    #[test]
    fn test_send_logged_stops_on_request() {
        let log = EventLog::new();
        let sent = Cell::new(0);

        let result: Result<u32, ()> = log.send_logged(
            10,
            || sent.get() == 2,
            |_seq| {
                sent.set(sent.get() + 1);
                Ok(())
            },
        );

        assert_eq!(result, Ok(2));
        assert_eq!(log.contents(), "b 1\nb 2\n");
    }

    #[test]
    fn test_send_failure_keeps_logged_events() {
        let path = std::env::temp_dir().join(format!("urb-send-fail-{}.out", std::process::id()));
        let log = EventLog::new();
        log.log_delivery(2, 1);

        let result = log.send_logged(
            5,
            || false,
            |seq| if seq == 3 { Err("link closed") } else { Ok(()) },
        );

        assert_eq!(result, Err("link closed"));
        log.write_to_file(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "d 2 1\nb 1\nb 2\nb 3\n");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_write_to_file() {
        let path = std::env::temp_dir().join(format!("urb-event-log-{}.out", std::process::id()));
        let log = EventLog::new();
        log.log_delivery(1, 7);

        log.write_to_file(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "d 1 7\n");
        let _ = fs::remove_file(&path);
    }
}

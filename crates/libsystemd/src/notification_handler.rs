//! `sd_notify` readiness protocol, contract only: parsing the newline-
//! separated `KEY=VALUE` datagram a supervised process sends, without the
//! socket transport behind it. The teacher's notify/stdout/stderr listener
//! threads belonged to the multi-threaded `RuntimeInfo` design this crate
//! replaced with the spec §5 single-threaded loop; wiring this parser to a
//! `NOTIFY_SOCKET` fd registered with [`crate::event_loop::EventLoop`] is
//! left to that external collaborator (spec §1 Non-goals name the PAM/
//! audit/plymouth side channels, not this one, but the socket's own
//! lifecycle is still out of scope for this crate's unit-manager core).
//!
//! Field names and semantics match `sd_notify(3)`.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notification {
    pub ready: bool,
    pub reloading: bool,
    pub stopping: bool,
    pub status: Option<String>,
    pub errno: Option<i32>,
    pub main_pid: Option<i32>,
    pub watchdog: bool,
    pub watchdog_usec: Option<u64>,
}

/// Parse one `sd_notify` datagram. Unrecognized keys are ignored rather
/// than rejected — the protocol is explicitly extensible.
pub fn parse(datagram: &[u8]) -> Notification {
    let text = String::from_utf8_lossy(datagram);
    let mut n = Notification::default();
    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else { continue };
        match key {
            "READY" => n.ready = value == "1",
            "RELOADING" => n.reloading = value == "1",
            "STOPPING" => n.stopping = value == "1",
            "STATUS" => n.status = Some(value.to_owned()),
            "ERRNO" => n.errno = value.parse().ok(),
            "MAINPID" => n.main_pid = value.parse().ok(),
            "WATCHDOG" => n.watchdog = value == "1",
            "WATCHDOG_USEC" => n.watchdog_usec = value.parse().ok(),
            _ => {}
        }
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ready_and_status() {
        let n = parse(b"READY=1\nSTATUS=Processing requests...\n");
        assert!(n.ready);
        assert_eq!(n.status.as_deref(), Some("Processing requests..."));
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let n = parse(b"FDSTORE=1\nREADY=1\n");
        assert!(n.ready);
    }

    #[test]
    fn test_parse_mainpid_and_errno() {
        let n = parse(b"MAINPID=1234\nERRNO=5\n");
        assert_eq!(n.main_pid, Some(1234));
        assert_eq!(n.errno, Some(5));
    }
}

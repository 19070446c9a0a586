//! Monotonic time and the platform probes the pool needs at connect time.

use std::net::IpAddr;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

/// A monotonic clock returning seconds as a float, matching `pymongo`'s
/// `pymongo.monotonic.time()` contract so idle-age and liveness-interval
/// arithmetic reads the same way.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// The real clock, backed by a process-wide monotonic epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        epoch().elapsed().as_secs_f64()
    }
}

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// A manually-advanced clock for deterministic idle-eviction and
/// liveness-interval tests without real sleeps.
#[derive(Debug, Default)]
pub struct FakeClock(Mutex<f64>);

impl FakeClock {
    pub fn new() -> Self {
        FakeClock(Mutex::new(0.0))
    }

    pub fn advance(&self, secs: f64) {
        *self.0.lock().unwrap() += secs;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> f64 {
        *self.0.lock().unwrap()
    }
}

/// RFC 6066 §3: IPv4 and IPv6 literals are not valid SNI hostnames, so SNI
/// must be suppressed for them. Also used to decide whether `localhost`-only
/// shortcuts in the connector apply.
pub fn is_ip_literal(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok()
}

/// Set the close-on-exec flag on a freshly created socket so it is not
/// inherited across `fork`+`exec`. A no-op on platforms without `fcntl`.
#[cfg(unix)]
pub fn set_close_on_exec(fd: std::os::unix::io::RawFd) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags >= 0 {
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
}

#[cfg(not(unix))]
pub fn set_close_on_exec(_fd: i32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_and_ipv6_literals_are_detected() {
        assert!(is_ip_literal("127.0.0.1"));
        assert!(is_ip_literal("::1"));
        assert!(is_ip_literal("2001:db8::1"));
    }

    #[test]
    fn hostnames_are_not_ip_literals() {
        assert!(!is_ip_literal("localhost"));
        assert!(!is_ip_literal("db.example.com"));
        assert!(!is_ip_literal("mongo-0.sock"));
    }

    #[test]
    fn fake_clock_only_advances_when_told() {
        let clock = FakeClock::new();
        assert_eq!(clock.now(), 0.0);
        clock.advance(1.5);
        assert_eq!(clock.now(), 1.5);
        clock.advance(0.5);
        assert_eq!(clock.now(), 2.0);
    }

    #[test]
    fn system_clock_is_monotonic_nondecreasing() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}

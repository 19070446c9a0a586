//! Observer sink for pool lifecycle events.
//!
//! A plain callback trait rather than a metrics-scrape endpoint, so
//! callers can wire up whatever observability stack they already run
//! without this crate taking a dependency on one.

/// Every method has a no-op default so listeners can implement only the
/// events they care about.
pub trait ConnectionPoolListener: Send + Sync {
    fn connection_created(&self, endpoint: &str) {
        let _ = endpoint;
    }

    fn connection_closed(&self, endpoint: &str, reason: &str) {
        let _ = (endpoint, reason);
    }

    fn checkout_started(&self, endpoint: &str) {
        let _ = endpoint;
    }

    fn checkout_succeeded(&self, endpoint: &str) {
        let _ = endpoint;
    }

    fn checkout_failed(&self, endpoint: &str, reason: &str) {
        let _ = (endpoint, reason);
    }

    fn pool_cleared(&self, endpoint: &str) {
        let _ = endpoint;
    }
}

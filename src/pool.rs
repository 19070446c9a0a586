//! Pool core: idle set, generation counter, fork detection,
//! checkout/return protocol, stale eviction, min-size warm-up.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, instrument, warn};

use crate::auth::{AuthMechanism, Credential};
use crate::clock::Clock;
use crate::connector::{self, Endpoint};
use crate::error::Error;
use crate::handshake;
use crate::options::PoolOptions;
use crate::semaphore::{AcquireError, BoundedSemaphore};
use crate::socket::SocketRecord;

/// Returns the calling process's id. Injectable so a fork can be
/// simulated deterministically in tests without calling real `fork()`,
/// which is unsound from a multithreaded test process.
pub trait PidSource: Send + Sync {
    fn current_pid(&self) -> u32;
}

#[derive(Default)]
pub struct RealPid;
impl PidSource for RealPid {
    fn current_pid(&self) -> u32 {
        std::process::id()
    }
}

struct SharedState {
    idle: VecDeque<SocketRecord>,
    active_count: usize,
    generation: u64,
    owner_pid: u32,
}

/// One pool per endpoint; load balancing across endpoints is out of
/// scope here and belongs to a layer above this one. `Arc`-free by design — callers hold a `Pool` behind their
/// own `Arc` if sharing across tasks is needed, matching `tokio::sync`
/// primitives' usual ownership style.
pub struct Pool {
    pub endpoint: Endpoint,
    pub options: PoolOptions,
    state: Mutex<SharedState>,
    semaphore: BoundedSemaphore,
    clock: Arc<dyn Clock>,
    pid_source: Arc<dyn PidSource>,
    auth: Arc<dyn AuthMechanism>,
}

impl Pool {
    pub fn new(endpoint: Endpoint, options: PoolOptions, clock: Arc<dyn Clock>, auth: Arc<dyn AuthMechanism>) -> Self {
        let capacity = options.max_pool_size.unwrap_or(usize::MAX);
        let max_waiters = options.max_waiters();
        Pool {
            semaphore: BoundedSemaphore::new(capacity, max_waiters),
            state: Mutex::new(SharedState {
                idle: VecDeque::new(),
                active_count: 0,
                generation: 0,
                owner_pid: std::process::id(),
            }),
            endpoint,
            options,
            clock,
            pid_source: Arc::new(RealPid),
            auth,
        }
    }

    /// Swaps in an alternate pid source, used by tests to simulate a fork
    /// deterministically without calling real `fork()`.
    pub fn with_pid_source(mut self, pid_source: Arc<dyn PidSource>) -> Self {
        self.pid_source = pid_source;
        self
    }

    fn endpoint_display(&self) -> String {
        self.endpoint.display()
    }

    /// Opens a fresh connection and performs the handshake, stamping the
    /// record with the pool's current generation.
    #[instrument(skip(self), fields(endpoint = %self.endpoint_display()))]
    async fn connect(&self) -> Result<SocketRecord, Error> {
        let mut stream = connector::connect(&self.endpoint, &self.options).await?;
        let generation = self.state.lock().unwrap().generation;

        let capabilities = handshake::perform(&mut stream, &self.endpoint_display(), self.options.metadata()).await?;

        debug!(generation, "connected and handshook a new socket");
        Ok(SocketRecord::new(
            stream,
            self.endpoint.clone(),
            capabilities,
            generation,
            self.clock.now(),
            self.options.socket_timeout,
        ))
    }

    /// Pools are not inheritable across `fork`, so a pid mismatch forces
    /// a `reset()` before proceeding.
    fn check_fork(&self) {
        let current_pid = self.pid_source.current_pid();
        let needs_reset = {
            let state = self.state.lock().unwrap();
            state.owner_pid != current_pid
        };
        if needs_reset {
            warn!(current_pid, "detected process identity change, resetting pool");
            self.reset();
        }
    }

    /// Scoped checkout with guaranteed release on every exit path (spec
    /// §4.6). Returns a guard that calls `return_socket` on drop unless
    /// `keep_checked_out` is set, in which case the caller must call
    /// [`Pool::return_socket`] explicitly.
    #[instrument(skip(self, credentials), fields(endpoint = %self.endpoint_display()))]
    pub async fn get_socket(
        self: &Arc<Self>,
        credentials: &HashMap<String, Credential>,
        keep_checked_out: bool,
    ) -> Result<Checkout, Error> {
        self.check_fork();

        let permit = self.semaphore.acquire(self.options.wait_queue_timeout).await.map_err(|e| match e {
            AcquireError::TimedOut => Error::wait_queue_timeout(self.options.max_pool_size, self.options.wait_queue_timeout),
            AcquireError::TooManyWaiters => {
                Error::wait_queue_full(self.options.max_waiters().unwrap_or(0))
            }
        })?;

        {
            let mut state = self.state.lock().unwrap();
            state.active_count += 1;
        }

        match self.obtain_and_prepare(credentials).await {
            Ok(record) => {
                info!("checkout succeeded");
                for listener in self.options.event_listeners() {
                    listener.checkout_succeeded(&self.endpoint_display());
                }
                Ok(Checkout {
                    pool: self.clone(),
                    record: Some(record),
                    permit: Some(permit),
                    keep_checked_out,
                })
            }
            Err(e) => {
                let mut state = self.state.lock().unwrap();
                state.active_count = state.active_count.saturating_sub(1);
                drop(state);
                drop(permit);
                warn!(error = %e, "checkout failed");
                for listener in self.options.event_listeners() {
                    listener.checkout_failed(&self.endpoint_display(), &e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Steps 3-7 of the checkout protocol: obtain a record (pooled or
    /// freshly minted), evict it if stale or dead, stamp it, and
    /// reconcile authentication.
    async fn obtain_and_prepare(&self, credentials: &HashMap<String, Credential>) -> Result<SocketRecord, Error> {
        let popped = self.state.lock().unwrap().idle.pop_front();
        let from_pool = popped.is_some();

        let record = match popped {
            Some(record) => record,
            None => self.connect().await?,
        };

        let mut record = if self.is_too_old(&record) {
            record.close();
            self.connect().await?
        } else {
            record
        };

        if from_pool && self.should_liveness_check(&record) {
            if record.is_stream_closed().await {
                warn!("pooled socket failed liveness check, reconnecting");
                record.close();
                record = self.connect().await?;
            }
        }

        record.last_checkout = self.clock.now();

        if let Err(e) = record.reconcile_auth(credentials, self.auth.as_ref()).await {
            record.close();
            return Err(e);
        }

        Ok(record)
    }

    fn is_too_old(&self, record: &SocketRecord) -> bool {
        match self.options.max_idle_time_ms {
            Some(limit_ms) => {
                let age_ms = (self.clock.now() - record.last_checkout) * 1000.0;
                age_ms > limit_ms as f64
            }
            None => false,
        }
    }

    fn should_liveness_check(&self, record: &SocketRecord) -> bool {
        use crate::options::LivenessCheck;
        match self.options.liveness_check {
            LivenessCheck::Always => true,
            LivenessCheck::Disabled => false,
            LivenessCheck::Interval(interval) => {
                let elapsed = self.clock.now() - record.last_checkout;
                elapsed > interval.as_secs_f64()
            }
        }
    }

    /// Closes stale-generation or already-closed records instead of
    /// recycling them.
    #[instrument(skip(self, record), fields(endpoint = %self.endpoint_display()))]
    pub fn return_socket(&self, mut record: SocketRecord) {
        self.check_fork();

        let mut state = self.state.lock().unwrap();
        if record.generation != state.generation || record.is_closed() {
            record.close();
        } else {
            state.idle.push_back(record);
        }
        state.active_count = state.active_count.saturating_sub(1);
    }

    /// Bumps the generation and drains the idle set without waiting for
    /// checked-out sockets, which self-evict on return via their stale
    /// generation id.
    #[instrument(skip(self), fields(endpoint = %self.endpoint_display()))]
    pub fn reset(&self) {
        let drained: Vec<SocketRecord> = {
            let mut state = self.state.lock().unwrap();
            state.generation += 1;
            state.owner_pid = self.pid_source.current_pid();
            state.active_count = 0;
            std::mem::take(&mut state.idle).into_iter().collect()
        };
        for mut record in drained {
            record.close();
        }
        for listener in self.options.event_listeners() {
            listener.pool_cleared(&self.endpoint_display());
        }
    }

    /// Idempotent background-safe maintenance: evicts idle records older
    /// than `max_idle_time_ms`, then tops the idle set up to
    /// `min_pool_size`.
    #[instrument(skip(self), fields(endpoint = %self.endpoint_display()))]
    pub async fn remove_stale_sockets(&self) -> Result<(), Error> {
        let stale: Vec<SocketRecord> = {
            let mut state = self.state.lock().unwrap();
            if self.options.max_idle_time_ms.is_none() {
                Vec::new()
            } else {
                let mut kept = VecDeque::new();
                let mut evicted = Vec::new();
                for record in std::mem::take(&mut state.idle) {
                    if self.is_too_old(&record) {
                        evicted.push(record);
                    } else {
                        kept.push_back(record);
                    }
                }
                state.idle = kept;
                evicted
            }
        };
        for mut record in stale {
            record.close();
        }

        loop {
            let (idle_count, active_count) = {
                let state = self.state.lock().unwrap();
                (state.idle.len(), state.active_count)
            };
            if idle_count + active_count >= self.options.min_pool_size {
                break;
            }
            let record = self.connect().await?;
            self.state.lock().unwrap().idle.push_back(record);
        }

        Ok(())
    }

    /// Current idle-set size. Exposed for observability and tests.
    pub fn idle_count(&self) -> usize {
        self.state.lock().unwrap().idle.len()
    }

    /// Current checked-out count. Exposed for observability and tests.
    pub fn active_count(&self) -> usize {
        self.state.lock().unwrap().active_count
    }

    /// Current generation. Exposed for observability and tests.
    pub fn generation(&self) -> u64 {
        self.state.lock().unwrap().generation
    }
}

/// Closes every remaining idle socket on drop, so callers that forget an
/// explicit shutdown don't leak FDs.
impl Drop for Pool {
    fn drop(&mut self) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        for mut record in state.idle.drain(..) {
            record.close();
        }
    }
}

/// A checked-out socket. Dropping it returns the socket to the pool
/// unless `keep_checked_out` was requested, in which case the holder
/// must call [`Pool::return_socket`] explicitly.
pub struct Checkout {
    pool: Arc<Pool>,
    record: Option<SocketRecord>,
    permit: Option<crate::semaphore::Permit>,
    keep_checked_out: bool,
}

impl Checkout {
    pub fn socket(&mut self) -> &mut SocketRecord {
        self.record.as_mut().expect("checkout already released")
    }

    /// Releases the socket back to the pool now, rather than waiting for
    /// drop. The permit is released alongside it.
    pub fn release(mut self) {
        if let Some(record) = self.record.take() {
            self.pool.return_socket(record);
        }
        self.permit.take();
    }

    /// Detaches the socket for the caller to own and return later via
    /// [`Pool::return_socket`], without releasing the semaphore permit.
    pub fn into_detached(mut self) -> (Arc<Pool>, SocketRecord, crate::semaphore::Permit) {
        let record = self.record.take().expect("checkout already released");
        let permit = self.permit.take().expect("checkout already released");
        (self.pool.clone(), record, permit)
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if self.keep_checked_out {
            return;
        }
        if let Some(record) = self.record.take() {
            self.pool.return_socket(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoAuth;
    use crate::clock::FakeClock;
    use std::sync::atomic::{AtomicU32 as TestAtomicU32, Ordering};

    struct FakePid(TestAtomicU32);
    impl PidSource for FakePid {
        fn current_pid(&self) -> u32 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn test_pool(options: PoolOptions) -> Arc<Pool> {
        Arc::new(Pool::new(
            Endpoint::new("127.0.0.1", 1), // deliberately unroutable; tests that actually connect use the loopback fixture
            options,
            Arc::new(FakeClock::new()),
            Arc::new(NoAuth),
        ))
    }

    #[tokio::test]
    async fn reset_bumps_generation_and_closes_idle_records() {
        let pool = test_pool(PoolOptions::builder().build());
        assert_eq!(pool.generation(), 0);
        pool.reset();
        assert_eq!(pool.generation(), 1);
        pool.reset();
        assert_eq!(pool.generation(), 2);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn fork_detection_triggers_reset_on_pid_mismatch() {
        let pid = Arc::new(FakePid(TestAtomicU32::new(100)));
        let pool = Pool::new(
            Endpoint::new("127.0.0.1", 1),
            PoolOptions::builder().build(),
            Arc::new(FakeClock::new()),
            Arc::new(NoAuth),
        )
        .with_pid_source(pid.clone());
        let pool = Arc::new(pool);

        assert_eq!(pool.generation(), 0);
        pid.0.store(200, Ordering::SeqCst);
        pool.check_fork();
        assert_eq!(pool.generation(), 1);

        // No-op when the pid hasn't changed.
        pool.check_fork();
        assert_eq!(pool.generation(), 1);
    }
}

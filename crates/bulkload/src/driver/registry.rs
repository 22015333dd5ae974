//! Run-scoped driver registration
//!
//! Registration is process-wide state, so it is reference counted per driver
//! name: the first [`DriverSession`] for a name triggers
//! [`Driver::on_register`], the last release triggers
//! [`Driver::on_deregister`]. Concurrent runs in one process therefore never
//! deregister a driver another run still uses.

use super::{Connection, Driver};
use crate::config::Credentials;
use crate::error::DriverResult;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::debug;

static GLOBAL: OnceLock<Arc<DriverRegistry>> = OnceLock::new();

/// Reference counts of active driver sessions, keyed by driver name
#[derive(Debug, Default)]
pub struct DriverRegistry {
    registrations: Mutex<HashMap<String, usize>>,
}

impl DriverRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The registry shared by every run in this process.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(DriverRegistry::new))
    }

    fn registrations(&self) -> MutexGuard<'_, HashMap<String, usize>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `driver` for the lifetime of the returned session.
    pub fn acquire(self: &Arc<Self>, driver: Arc<dyn Driver>) -> DriverSession {
        {
            let mut registrations = self.registrations();
            let count = registrations.entry(driver.name().to_string()).or_insert(0);
            if *count == 0 {
                debug!(driver = driver.name(), "registering driver");
                driver.on_register();
            }
            *count += 1;
        }

        DriverSession {
            registry: Arc::clone(self),
            driver,
            released: false,
        }
    }

    /// Number of live sessions for `name`.
    pub fn active_sessions(&self, name: &str) -> usize {
        self.registrations().get(name).copied().unwrap_or(0)
    }

    fn release(&self, driver: &dyn Driver) {
        let mut registrations = self.registrations();
        if let Some(count) = registrations.get_mut(driver.name()) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                registrations.remove(driver.name());
                debug!(driver = driver.name(), "deregistering driver");
                driver.on_deregister();
            }
        }
    }
}

/// A registered driver, valid until released or dropped
///
/// Dropping releases the registration on early returns and on panics that
/// unwind. The release profile sets `panic = "abort"`, where a panic ends the
/// process without running `Drop` and the registration dies with it.
pub struct DriverSession {
    registry: Arc<DriverRegistry>,
    driver: Arc<dyn Driver>,
    released: bool,
}

impl DriverSession {
    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    pub async fn connect(
        &self,
        connection_string: &str,
        credentials: Option<&Credentials>,
    ) -> DriverResult<Box<dyn Connection>> {
        self.driver.connect(connection_string, credentials).await
    }

    /// Deregister now instead of at drop.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.release(self.driver.as_ref());
        }
    }
}

impl Drop for DriverSession {
    fn drop(&mut self) {
        self.release_once();
    }
}

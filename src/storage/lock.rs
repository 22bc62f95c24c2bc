use std::fs::File;
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use super::Storage;
use crate::error::{FathomError, Result};

const MAX_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Held advisory lock; released when dropped
#[derive(Debug)]
pub struct WriteLock {
    name: String,
    // closing the handle releases the OS lock
    _file: File,
}

impl WriteLock {
    pub(crate) fn new(name: impl Into<String>, file: File) -> Self {
        Self {
            name: name.into(),
            _file: file,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Take `name`, retrying with doubling backoff until `timeout` has passed
pub fn acquire_lock(
    storage: &dyn Storage,
    name: &str,
    timeout: Duration,
    initial_delay: Duration,
) -> Result<WriteLock> {
    let started = Instant::now();
    let mut delay = initial_delay.max(Duration::from_millis(1));
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        if let Some(lock) = storage.try_lock(name)? {
            if attempts > 1 {
                debug!(lock = name, attempts, "acquired contended lock");
            }
            return Ok(lock);
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            debug!(lock = name, attempts, ?timeout, "lock acquisition timed out");
            return Err(FathomError::Lock {
                name: name.to_string(),
                timeout,
            });
        }
        thread::sleep(delay.min(timeout - elapsed));
        delay = (delay * 2).min(MAX_RETRY_DELAY);
    }
}

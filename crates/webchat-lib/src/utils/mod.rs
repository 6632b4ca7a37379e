// Utility functions module

pub mod config;
pub mod database;
pub mod schema;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// App identifier used for the data directory
pub const APP_IDENTIFIER: &str = "com.webchat.WebChat";

/// Lock a std mutex, recovering the data if a previous holder panicked
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

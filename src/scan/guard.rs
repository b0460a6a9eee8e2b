//! Whole-pipeline singletons.
//!
//! `scan` and `discovery` each allow one run in flight. Acquisition is a
//! single compare-and-swap; release rides on `Drop` so every exit path,
//! including panics and early `?` returns, clears the flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::server::error::Error;

#[derive(Clone)]
pub struct Singleton {
    label: &'static str,
    flag: Arc<AtomicBool>,
}

pub struct SingletonGuard {
    flag: Arc<AtomicBool>,
}

impl Singleton {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// At most one winner; losers get [`Error::SingletonBusy`].
    pub fn try_acquire(&self) -> Result<SingletonGuard, Error> {
        if self
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::SingletonBusy(self.label));
        }
        Ok(SingletonGuard {
            flag: self.flag.clone(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl Drop for SingletonGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_transition_and_release_on_drop() {
        let singleton = Singleton::new("scan");
        assert!(!singleton.is_running());

        let guard = singleton.try_acquire().unwrap();
        assert!(singleton.is_running());
        assert!(matches!(
            singleton.try_acquire(),
            Err(Error::SingletonBusy("scan"))
        ));

        drop(guard);
        assert!(!singleton.is_running());
        assert!(singleton.try_acquire().is_ok());
    }

    #[test]
    fn concurrent_acquisition_has_one_winner() {
        let singleton = Singleton::new("discovery");
        let guards: Vec<_> = (0..8)
            .map(|_| singleton.try_acquire())
            .filter(Result::is_ok)
            .collect();
        assert_eq!(guards.len(), 1);
    }
}

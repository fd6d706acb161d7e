//! Progress reporting and cooperative cancellation.
//!
//! Long multi-block operations report fractional completion through a
//! caller-supplied callback. Returning `false` from the callback vetoes the
//! operation; the engine aborts with [`Error::Cancelled`] and touches no
//! further blocks. This veto is the only cancellation mechanism; there are
//! no timeouts.

use crate::error::{Error, Result};

/// Progress callback: receives completion in `[0.0, 1.0]`, returns `false`
/// to cancel the operation.
pub type ProgressFn<'a> = dyn FnMut(f64) -> bool + 'a;

/// Wrapper over an optional progress callback.
///
/// [`Progress::none`] is a no-op reporter that never cancels, so engine
/// code can report unconditionally.
pub struct Progress<'a> {
    callback: Option<&'a mut ProgressFn<'a>>,
}

impl<'a> Progress<'a> {
    /// A reporter that discards reports and never cancels.
    #[inline]
    pub fn none() -> Self {
        Self { callback: None }
    }

    /// A reporter forwarding to `callback`.
    #[inline]
    pub fn new(callback: &'a mut ProgressFn<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    /// Whether a real callback is attached.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.callback.is_some()
    }

    /// Reports `fraction` complete; fails with [`Error::Cancelled`] when the
    /// callback vetoes.
    pub fn report(&mut self, fraction: f64) -> Result<()> {
        if let Some(cb) = self.callback.as_mut() {
            if !cb(fraction.clamp(0.0, 1.0)) {
                return Err(Error::Cancelled);
            }
        }
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_never_cancels() {
        let mut p = Progress::none();
        assert!(!p.is_active());
        assert!(p.report(0.5).is_ok());
        assert!(p.report(2.0).is_ok());
    }

    #[test]
    fn test_veto() {
        let mut seen = Vec::new();
        let mut cb = |f: f64| {
            seen.push(f);
            f < 0.5
        };
        let mut p = Progress::new(&mut cb);
        assert!(p.report(0.25).is_ok());
        let err = p.report(0.75).unwrap_err();
        assert!(err.is_cancelled());
        drop(p);
        assert_eq!(seen, vec![0.25, 0.75]);
    }

    #[test]
    fn test_report_clamps() {
        let mut seen = Vec::new();
        let mut cb = |f: f64| {
            seen.push(f);
            true
        };
        let mut p = Progress::new(&mut cb);
        p.report(-0.5).unwrap();
        p.report(2.0).unwrap();
        drop(p);
        assert_eq!(seen, vec![0.0, 1.0]);
    }
}

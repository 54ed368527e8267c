//! Request tokens for asynchronous operation families.
//!
//! Every launch of a location check or save bumps its family's counter and
//! carries the new token. When the operation finishes, its result is applied
//! only if the token is still the latest one issued for that family.

/// Identity of one launched operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestToken(u64);

/// Monotonic token source for one operation family.
#[derive(Debug, Default)]
pub struct RequestCounter {
    latest: u64,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new token, invalidating every earlier one.
    pub fn bump(&mut self) -> RequestToken {
        self.latest += 1;
        RequestToken(self.latest)
    }

    /// Invalidate outstanding tokens without launching anything.
    pub fn invalidate(&mut self) {
        self.latest += 1;
    }

    pub fn is_current(&self, token: RequestToken) -> bool {
        token.0 == self.latest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_latest_token_is_current() {
        let mut counter = RequestCounter::new();
        let first = counter.bump();
        assert!(counter.is_current(first));

        let second = counter.bump();
        assert!(!counter.is_current(first));
        assert!(counter.is_current(second));
    }

    #[test]
    fn test_invalidate_retires_outstanding_token() {
        let mut counter = RequestCounter::new();
        let token = counter.bump();
        counter.invalidate();
        assert!(!counter.is_current(token));
    }

    #[test]
    fn test_counters_are_independent() {
        let mut location = RequestCounter::new();
        let mut save = RequestCounter::new();
        let loc = location.bump();
        let _ = save.bump();
        let _ = save.bump();
        assert!(location.is_current(loc));
    }
}

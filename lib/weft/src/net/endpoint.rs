use mio::{Events, Poll, Registry, Token};
use std::io;
use std::time::Duration;

/// One readiness notification, copied out of the poll so callers can route
/// it without holding a borrow on the event store.
#[derive(Debug, Copy, Clone)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
}

/// The per-process cooperative I/O dispatcher. Every socket in the node is
/// registered here; the traffic loop yields into `poll_once`, which fans
/// readiness back out to the channel objects.
pub struct Endpoint {
    poll: Poll,
    events: Events,
    next_token: usize,
}

impl Endpoint {
    pub fn new() -> io::Result<Endpoint> {
        Ok(Endpoint {
            poll: Poll::new()?,
            events: Events::with_capacity(1024),
            next_token: 0,
        })
    }

    /// Tokens are never reused within one context's lifetime, so a stale
    /// event can always be recognized and dropped.
    #[inline]
    pub fn allocate_token(&mut self) -> Token {
        let token = Token(self.next_token);

        self.next_token += 1;
        token
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        self.poll.registry()
    }

    /// Run one dispatcher pass, returning the readiness that fired.
    pub fn poll_once(&mut self, timeout: Duration) -> io::Result<Vec<Readiness>> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => (),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => return Ok(Vec::new()),
            Err(error) => return Err(error),
        }

        Ok(self
            .events
            .iter()
            .map(|event| Readiness {
                token: event.token(),
                readable: event.is_readable(),
                writable: event.is_writable(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        let mut endpoint = Endpoint::new().unwrap();

        let first = endpoint.allocate_token();
        let second = endpoint.allocate_token();

        assert_ne!(first, second);
    }

    #[test]
    fn test_poll_with_no_sources_times_out() {
        let mut endpoint = Endpoint::new().unwrap();

        let readiness = endpoint.poll_once(Duration::from_millis(5)).unwrap();

        assert!(readiness.is_empty());
    }
}

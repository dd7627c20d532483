//! Mock transport for testing

use super::{ServiceAddr, Transport, TransportEvent};
use crate::error::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

type Responder = Box<dyn FnMut(ServiceAddr, &[u8]) -> Vec<TransportEvent> + Send>;

/// Mock transport for unit testing
///
/// Clones share state, so a test can keep one handle while the client owns
/// another: inject events, inspect sent frames, or install a responder that
/// turns each sent frame into reply events (a scripted firmware).
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

struct MockInner {
    state: Mutex<MockState>,
    cond: Condvar,
}

#[derive(Default)]
struct MockState {
    events: VecDeque<TransportEvent>,
    sent: Vec<(ServiceAddr, Vec<u8>)>,
    lookups: Vec<(u32, u32)>,
    responder: Option<Responder>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MockInner {
                state: Mutex::new(MockState::default()),
                cond: Condvar::new(),
            }),
        }
    }

    /// Queue an event for the next poll
    pub fn inject(&self, event: TransportEvent) {
        let mut state = self.inner.state.lock();
        state.events.push_back(event);
        self.inner.cond.notify_all();
    }

    /// Install a scripted firmware: called once per sent frame
    pub fn set_responder<F>(&self, f: F)
    where
        F: FnMut(ServiceAddr, &[u8]) -> Vec<TransportEvent> + Send + 'static,
    {
        self.inner.state.lock().responder = Some(Box::new(f));
    }

    /// All frames sent so far, in order
    pub fn sent_frames(&self) -> Vec<(ServiceAddr, Vec<u8>)> {
        self.inner.state.lock().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.inner.state.lock().sent.clear();
    }

    /// Lookups issued so far
    pub fn lookups(&self) -> Vec<(u32, u32)> {
        self.inner.state.lock().lookups.clone()
    }
}

impl Transport for MockTransport {
    fn lookup(&mut self, service: u32, instance: u32) -> Result<()> {
        self.inner.state.lock().lookups.push((service, instance));
        Ok(())
    }

    fn send(&mut self, to: ServiceAddr, data: &[u8]) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.sent.push((to, data.to_vec()));
        if let Some(mut responder) = state.responder.take() {
            let replies = responder(to, data);
            state.responder = Some(responder);
            state.events.extend(replies);
        }
        self.inner.cond.notify_all();
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<TransportEvent>> {
        let mut state = self.inner.state.lock();
        if state.events.is_empty() {
            self.inner.cond.wait_for(&mut state, timeout);
        }
        Ok(state.events.pop_front())
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: ServiceAddr = ServiceAddr { node: 1, port: 62 };

    #[test]
    fn test_inject_and_poll() {
        let mut mock = MockTransport::new();
        assert!(mock.poll(Duration::from_millis(1)).unwrap().is_none());

        mock.inject(TransportEvent::NewServer(ADDR));
        match mock.poll(Duration::from_millis(1)).unwrap() {
            Some(TransportEvent::NewServer(addr)) => assert_eq!(addr, ADDR),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_responder_fires_per_send() {
        let mut mock = MockTransport::new();
        mock.set_responder(|from, data| {
            vec![TransportEvent::Message {
                from,
                data: data.to_vec(),
            }]
        });

        mock.send(ADDR, &[1, 2, 3]).unwrap();
        assert_eq!(mock.sent_frames().len(), 1);
        match mock.poll(Duration::from_millis(1)).unwrap() {
            Some(TransportEvent::Message { data, .. }) => assert_eq!(data, vec![1, 2, 3]),
            other => panic!("unexpected: {:?}", other),
        }
    }
}

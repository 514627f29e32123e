use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use crate::end_point::EndPoint;
use crate::platform::{Platform, PlatformError};

type DropFilter = Box<dyn FnMut(EndPoint, EndPoint, &[u8]) -> bool + Send>;

struct NetworkState {
    /// per bound end point: datagrams with their sender
    queues: FxHashMap<EndPoint, VecDeque<(EndPoint, Vec<u8>)>>,
    next_ephemeral_port: u16,
    drop_filter: Option<DropFilter>,
}

/// An in-process datagram network with a manually advanced clock. Datagrams are delivered
///  instantly and in order, unless a drop filter says otherwise; datagrams to end points that
///  nobody is bound to vanish.
///
/// Clones share the same network.
#[derive(Clone)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
    arrived: Arc<Condvar>,
    clock: Arc<AtomicU64>,
    wait_in_poll: bool,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        MemoryNetwork::new()
    }
}

impl MemoryNetwork {
    pub const START_TIME: u64 = 1000;

    /// A network for code that calls [crate::network_loop::NetworkLoop::tick] itself: polling
    ///  an empty queue returns right away.
    pub fn new() -> MemoryNetwork {
        MemoryNetwork {
            state: Arc::new(Mutex::new(NetworkState {
                queues: FxHashMap::default(),
                next_ephemeral_port: 49152,
                drop_filter: None,
            })),
            arrived: Arc::new(Condvar::new()),
            clock: Arc::new(AtomicU64::new(Self::START_TIME)),
            wait_in_poll: false,
        }
    }

    /// A network for sockets with their own network thread: polling an empty queue waits for
    ///  a datagram or the poll's timeout.
    pub fn threaded() -> MemoryNetwork {
        MemoryNetwork {
            wait_in_poll: true,
            ..MemoryNetwork::new()
        }
    }

    /// a new, unbound platform attached to this network
    pub fn platform(&self) -> MemoryPlatform {
        MemoryPlatform {
            network: self.clone(),
            local: None,
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    pub fn advance(&self, millis: u64) {
        self.clock.fetch_add(millis, Ordering::AcqRel);
    }

    /// The filter is called with sender, receiver and data for every datagram sent through a
    ///  platform, and returns `true` to drop it
    pub fn set_drop_filter(&self, filter: impl FnMut(EndPoint, EndPoint, &[u8]) -> bool + Send + 'static) {
        self.state.lock().drop_filter = Some(Box::new(filter));
    }

    pub fn clear_drop_filter(&self) {
        self.state.lock().drop_filter = None;
    }

    /// delivers a datagram bypassing the drop filter, e.g. for feeding crafted packets
    pub fn inject(&self, from: EndPoint, to: EndPoint, data: &[u8]) {
        if let Some(queue) = self.state.lock().queues.get_mut(&to) {
            queue.push_back((from, data.to_vec()));
            self.arrived.notify_all();
        }
    }

    /// number of datagrams that were delivered but not received yet
    pub fn in_flight(&self) -> usize {
        self.state.lock().queues.values()
            .map(|q| q.len())
            .sum()
    }

    fn send(&self, from: EndPoint, to: EndPoint, data: &[u8]) {
        let mut state = self.state.lock();
        if let Some(filter) = &mut state.drop_filter {
            if filter(from, to, data) {
                return;
            }
        }
        if let Some(queue) = state.queues.get_mut(&to) {
            queue.push_back((from, data.to_vec()));
            self.arrived.notify_all();
        }
    }
}


/// [Platform] implementation on a [MemoryNetwork]
pub struct MemoryPlatform {
    network: MemoryNetwork,
    local: Option<EndPoint>,
}

impl MemoryPlatform {
    fn local(&self) -> Result<EndPoint, PlatformError> {
        self.local
            .ok_or_else(|| PlatformError::other("not bound"))
    }
}

impl Drop for MemoryPlatform {
    fn drop(&mut self) {
        if let Some(local) = self.local.take() {
            self.network.state.lock().queues.remove(&local);
        }
    }
}

impl Platform for MemoryPlatform {
    fn bind(&mut self, end_point: EndPoint) -> Result<(), PlatformError> {
        if self.local.is_some() {
            return Err(PlatformError::other("already bound"));
        }

        let mut state = self.network.state.lock();
        let address = if end_point.address().is_unspecified() { Ipv4Addr::LOCALHOST } else { end_point.address() };
        let port = if end_point.port() == 0 {
            let port = state.next_ephemeral_port;
            state.next_ephemeral_port = state.next_ephemeral_port.wrapping_add(1).max(49152);
            port
        }
        else {
            end_point.port()
        };
        let end_point = EndPoint::new(address, port);

        if state.queues.contains_key(&end_point) {
            return Err(PlatformError::other(format!("{} is in use", end_point)));
        }
        state.queues.insert(end_point, VecDeque::new());
        self.local = Some(end_point);
        Ok(())
    }

    fn close(&mut self) -> Result<(), PlatformError> {
        let local = self.local()?;
        self.network.state.lock().queues.remove(&local);
        self.local = None;
        Ok(())
    }

    fn send_to(&mut self, buf: &[u8], to: EndPoint) -> Result<usize, PlatformError> {
        let local = self.local()?;
        self.network.send(local, to, buf);
        Ok(buf.len())
    }

    fn recv_poll(&mut self, timeout: Duration) -> bool {
        let Some(local) = self.local else {
            return false;
        };
        let has_data = |state: &NetworkState| state.queues.get(&local)
            .map_or(false, |q| !q.is_empty());

        let mut state = self.network.state.lock();
        if has_data(&state) {
            return true;
        }
        if !self.network.wait_in_poll || timeout.is_zero() {
            return false;
        }

        let deadline = Instant::now() + timeout;
        while !has_data(&state) {
            if self.network.arrived.wait_until(&mut state, deadline).timed_out() {
                return has_data(&state);
            }
        }
        true
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> Result<Option<(usize, EndPoint)>, PlatformError> {
        let local = self.local()?;
        let datagram = self.network.state.lock().queues.get_mut(&local)
            .and_then(|q| q.pop_front());

        Ok(datagram.map(|(from, data)| {
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            (len, from)
        }))
    }

    fn local_end_point(&self) -> Option<EndPoint> {
        self.local
    }

    fn precision_time_ms(&self) -> u64 {
        self.network.now()
    }
}

use std::os::fd::RawFd;

use crate::net::connection::Connection;

/// Live connections of one event loop, keyed by fd
///
/// Slab indexed directly by the fd number. The kernel hands out the lowest
/// free fd, so slots stay dense and get reused as connections close.
#[derive(Default)]
pub struct ConnectionTable {
    slots: Vec<Option<Connection>>,
    live: usize,
}

impl ConnectionTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            live: 0,
        }
    }

    /// Insert a connection under its own fd.
    ///
    /// Returns the previous occupant if the slot was taken, which means a
    /// closed fd was never removed.
    pub fn insert(&mut self, conn: Connection) -> Option<Connection> {
        let idx = slot_index(conn.fd());
        if idx >= self.slots.len() {
            self.slots.resize_with(idx + 1, || None);
        }
        let prev = self.slots[idx].replace(conn);
        if prev.is_none() {
            self.live += 1;
        }
        prev
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut Connection> {
        self.slots.get_mut(slot_index(fd)).and_then(|c| c.as_mut())
    }

    pub fn remove(&mut self, fd: RawFd) -> Option<Connection> {
        let conn = self.slots.get_mut(slot_index(fd)).and_then(|c| c.take());
        if conn.is_some() {
            self.live -= 1;
        }
        conn
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    #[cfg(test)]
    pub(crate) fn fds(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.slots.iter().flatten().map(Connection::fd)
    }
}

fn slot_index(fd: RawFd) -> usize {
    debug_assert!(fd >= 0, "negative fd {fd}");
    fd as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::poller::Interest;
    use std::net::{TcpListener, TcpStream};
    use std::os::fd::AsRawFd;

    fn connected_pair(listener: &TcpListener) -> (TcpStream, TcpStream) {
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    fn conn(stream: TcpStream) -> Connection {
        Connection::new(stream, Interest::READABLE.edge_triggered())
    }

    #[test]
    fn insert_get_remove() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (_c1, s1) = connected_pair(&listener);
        let (_c2, s2) = connected_pair(&listener);
        let (fd1, fd2) = (s1.as_raw_fd(), s2.as_raw_fd());

        let mut table = ConnectionTable::with_capacity(4);
        assert!(table.is_empty());
        assert!(table.insert(conn(s1)).is_none());
        assert!(table.insert(conn(s2)).is_none());
        assert_eq!(table.len(), 2);
        assert!(table.get_mut(fd1).is_some());
        assert_eq!(table.get_mut(fd2).unwrap().fd(), fd2);

        let mut fds: Vec<_> = table.fds().collect();
        fds.sort();
        let mut expected = vec![fd1, fd2];
        expected.sort();
        assert_eq!(fds, expected);

        let removed = table.remove(fd1).unwrap();
        assert_eq!(removed.fd(), fd1);
        assert_eq!(table.len(), 1);
        assert!(table.get_mut(fd1).is_none());
        assert!(table.remove(fd1).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unknown_fds_are_absent() {
        let mut table = ConnectionTable::default();
        assert!(table.get_mut(1000).is_none());
        assert!(table.remove(3).is_none());
        assert_eq!(table.len(), 0);
    }
}

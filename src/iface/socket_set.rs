//! The socket arena an [`Interface`](super::Interface) polls every tick.
//!
//! Sockets are stored by value in a flat slab so the interface can iterate
//! all of them each poll without any of them needing to know about each
//! other. A [`SocketHandle`] is just the slot index; it stays valid for the
//! life of the socket and is reused only after [`SocketSet::remove`].

use core::fmt;

use managed::ManagedSlice;

use crate::socket::Socket;

use super::socket_meta::Meta;

/// An opaque handle to a socket in a [`SocketSet`].
///
/// Handles are cheap to `Copy` and carry no borrow, so they can be stashed
/// in application state and used to look the socket back up on the next
/// poll iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle(usize);

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A socket plus the housekeeping metadata the interface attaches to it.
pub(crate) struct Item<'a> {
    pub(crate) meta: Meta,
    pub(crate) socket: Socket<'a>,
}

/// A set of sockets, indexed by [`SocketHandle`].
pub struct SocketSet<'a> {
    sockets: ManagedSlice<'a, Option<Item<'a>>>,
}

impl<'a> SocketSet<'a> {
    /// Creates a socket set using the provided storage.
    pub fn new<SocketsT>(sockets: SocketsT) -> SocketSet<'a>
    where
        SocketsT: Into<ManagedSlice<'a, Option<Item<'a>>>>,
    {
        let sockets = sockets.into();
        SocketSet { sockets }
    }

    /// Adds a socket to the set, returning its handle.
    ///
    /// # Panics
    /// Panics if adding a socket requires growing storage backed by a fixed
    /// slice rather than a `Vec`.
    pub fn add<T: Into<Socket<'a>>>(&mut self, socket: T) -> SocketHandle {
        let socket = socket.into();

        fn put<'a>(index: usize, slot: &mut Option<Item<'a>>, socket: Socket<'a>) -> SocketHandle {
            let handle = SocketHandle(index);
            *slot = Some(Item {
                meta: Meta::new(handle),
                socket,
            });
            handle
        }

        for (index, slot) in self.sockets.iter_mut().enumerate() {
            if slot.is_none() {
                return put(index, slot, socket);
            }
        }

        match &mut self.sockets {
            ManagedSlice::Borrowed(_) => panic!("adding a socket to a full SocketSet"),
            ManagedSlice::Owned(sockets) => {
                sockets.push(None);
                let index = sockets.len() - 1;
                put(index, &mut sockets[index], socket)
            }
        }
    }

    /// Gets a socket from the set by its handle, as mutable.
    ///
    /// # Panics
    /// Panics if the handle does not refer to a socket of this type, or to
    /// any socket at all.
    pub fn get_mut<T: crate::socket::AnySocket<'a>>(&mut self, handle: SocketHandle) -> &mut T {
        let item = self
            .sockets
            .get_mut(handle.0)
            .and_then(|item| item.as_mut())
            .expect("handle does not refer to a valid socket");
        T::downcast_mut(&mut item.socket).expect("handle refers to a socket of a wrong type")
    }

    /// Gets a socket from the set by its handle, as immutable.
    ///
    /// # Panics
    /// Panics if the handle does not refer to a socket of this type, or to
    /// any socket at all.
    pub fn get<T: crate::socket::AnySocket<'a>>(&self, handle: SocketHandle) -> &T {
        let item = self
            .sockets
            .get(handle.0)
            .and_then(|item| item.as_ref())
            .expect("handle does not refer to a valid socket");
        T::downcast(&item.socket).expect("handle refers to a socket of a wrong type")
    }

    /// Removes a socket from the set, returning it.
    ///
    /// # Panics
    /// Panics if the handle does not refer to any socket.
    pub fn remove(&mut self, handle: SocketHandle) -> Socket<'a> {
        let item = self.sockets[handle.0]
            .take()
            .expect("handle does not refer to a valid socket");
        item.socket
    }

    /// Returns true if the set has no sockets.
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Iterates over all sockets, as `(handle, &Socket)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (SocketHandle, &Socket<'a>)> {
        self.sockets.iter().filter_map(|i| {
            let item = i.as_ref()?;
            Some((item.meta.handle, &item.socket))
        })
    }

    /// Iterates over all sockets, as `(handle, &mut Socket)` pairs.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SocketHandle, &mut Socket<'a>)> {
        self.sockets.iter_mut().filter_map(|i| {
            let item = i.as_mut()?;
            Some((item.meta.handle, &mut item.socket))
        })
    }

    pub(crate) fn items(&self) -> impl Iterator<Item = &Item<'a>> {
        self.sockets.iter().filter_map(|i| i.as_ref())
    }

    pub(crate) fn items_mut(&mut self) -> impl Iterator<Item = &mut Item<'a>> {
        self.sockets.iter_mut().filter_map(|i| i.as_mut())
    }
}

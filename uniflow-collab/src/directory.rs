//! Reverse index from connection to the user it represents.
//!
//! A disconnect only carries a [`ConnectionId`]; the directory resolves it
//! back to the room and username in O(1) so cleanup never scans rooms.
//! An entry exists exactly while the connection is a member of some room.

use std::collections::HashMap;

use crate::user::{ConnectionId, User};

#[derive(Debug, Default)]
pub struct UserDirectory {
    users: HashMap<ConnectionId, User>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `user` for `connection`, returning any previous record.
    pub fn register(&mut self, connection: ConnectionId, user: User) -> Option<User> {
        self.users.insert(connection, user)
    }

    pub fn unregister(&mut self, connection: ConnectionId) -> Option<User> {
        self.users.remove(&connection)
    }

    pub fn lookup(&self, connection: ConnectionId) -> Option<&User> {
        self.users.get(&connection)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room_id::RoomId;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn user(name: &str) -> User {
        let mut rng = StdRng::seed_from_u64(9);
        User::new(
            ConnectionId::new(),
            name.to_string(),
            RoomId::parse("ROOM01").unwrap(),
            &mut rng,
        )
    }

    #[test]
    fn test_register_lookup_unregister() {
        let mut directory = UserDirectory::new();
        let alice = user("Alice");

        assert!(directory.register(alice.id, alice.clone()).is_none());
        assert_eq!(directory.lookup(alice.id), Some(&alice));
        assert_eq!(directory.len(), 1);

        assert_eq!(directory.unregister(alice.id), Some(alice.clone()));
        assert!(directory.lookup(alice.id).is_none());
        assert!(directory.is_empty());
    }

    #[test]
    fn test_unregister_absent_is_none() {
        let mut directory = UserDirectory::new();
        assert!(directory.unregister(ConnectionId::new()).is_none());
    }

    #[test]
    fn test_clear() {
        let mut directory = UserDirectory::new();
        let a = user("A");
        let b = user("B");
        directory.register(a.id, a);
        directory.register(b.id, b);
        directory.clear();
        assert!(directory.is_empty());
    }
}

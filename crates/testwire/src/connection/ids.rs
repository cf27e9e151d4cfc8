use testwire_core::ObjectId;

use super::Role;

/// Per-connection signed id counter.
///
/// The direction comes from the role, so both ends can allocate without
/// coordinating: server ids ascend from `1`, client ids descend from `-1`.
/// Ids are shared between object registrations and response correlation
/// and are never handed out twice.
#[derive(Debug)]
pub(crate) struct IdAllocator {
    next: i64,
    step: i64,
}

impl IdAllocator {
    pub(crate) fn for_role(role: Role) -> Self {
        match role {
            Role::Server => Self { next: 1, step: 1 },
            Role::Client => Self { next: -1, step: -1 },
        }
    }

    pub(crate) fn next(&mut self) -> ObjectId {
        let id = self.next;
        self.next += self.step;
        ObjectId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_ids_ascend_from_one() {
        let mut ids = IdAllocator::for_role(Role::Server);
        let allocated: Vec<i64> = (0..4).map(|_| ids.next().0).collect();
        assert_eq!(allocated, vec![1, 2, 3, 4]);
    }

    #[test]
    fn client_ids_descend_from_minus_one() {
        let mut ids = IdAllocator::for_role(Role::Client);
        let allocated: Vec<i64> = (0..4).map(|_| ids.next().0).collect();
        assert_eq!(allocated, vec![-1, -2, -3, -4]);
    }

    #[test]
    fn ranges_never_meet() {
        let mut server = IdAllocator::for_role(Role::Server);
        let mut client = IdAllocator::for_role(Role::Client);
        for _ in 0..1000 {
            let s = server.next();
            let c = client.next();
            assert!(s.0 > 0 && c.0 < 0);
            assert!(Role::Server.allocated(s) && Role::Client.allocated(c));
        }
    }
}

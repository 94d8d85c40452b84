//! Leader-election abstraction (spec §2 "Out of scope: leader-election
//! implementation — any primitive offering `IsMaster()` + lifecycle loop
//! works"). Only the interface is owned here; etcd/redis-backed electors
//! are external collaborators this service merely calls into.

/// Whatever needs `is_master()` plus the ability to be asked to stop. A
/// real backend (etcd lease, redis lock) runs its own background
/// acquire/renew loop and just answers `is_master()` cheaply from memory.
pub trait Elector: Send + Sync {
    fn is_master(&self) -> bool;
}

/// Single-node deployments (spec §1.3 `election_driver = "none"`): this
/// node is always the leader, since there's no cluster to coordinate with.
pub struct AlwaysMaster;

impl Elector for AlwaysMaster {
    fn is_master(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_master_is_always_master() {
        assert!(AlwaysMaster.is_master());
    }
}

//! Load Balancer - thread placement across cores
//!
//! Consumes each core's `Scheduler::calculate_load` figure. New threads go
//! to the least loaded core; migration of running threads is not done.

/// Index of the least loaded core, lowest index on ties
pub fn pick_core(loads: &[u64]) -> usize {
    loads
        .iter()
        .enumerate()
        .min_by_key(|&(core, load)| (*load, core))
        .map(|(core, _)| core)
        .unwrap_or(0)
}

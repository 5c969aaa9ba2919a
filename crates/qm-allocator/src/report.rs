use qm_domain::Resource;

/// Outcome of a reservation-mutating operation. The resource mutation itself
/// is always atomic (performed by one `Repository` call); per-device
/// share/unshare/refresh calls are best-effort and isolated from one another,
/// so a single unreachable host never blocks the reservation change — each
/// failure is recorded here instead of aborting the operation, following the
/// same per-item error isolation used for reconciliation passes elsewhere in
/// this workspace.
#[derive(Debug, Clone)]
pub struct ReservationOutcome {
    pub resource: Resource,
    pub share_errors: Vec<String>,
}

//! Caller context threaded into every engine call.

/// Who is performing an operation and for which organization.
///
/// The engine never reads this from ambient state: every ledger-affecting
/// call receives it explicitly. Rows belonging to another organization are
/// reported as not found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ctx {
    pub organization_id: String,
    /// `None` means the system itself (imports, migrations, scripts).
    pub actor_id: Option<String>,
}

impl Ctx {
    pub fn new(organization_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            actor_id: Some(actor_id.into()),
        }
    }

    pub fn system(organization_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            actor_id: None,
        }
    }
}

// SPDX-License-Identifier: Apache-2.0
//
// Authorization seam for administrative operations.
//
// The dispatcher consults an [`Authorizer`] before Set-Printer-Attributes
// and before cancelling a job submitted by a different user.  The system
// account database (PAM or otherwise) stays behind this trait; the daemon
// ships an allow-all policy for trusted networks and a static admin list.

use std::collections::HashSet;

/// The operations that require authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminOperation {
    /// Mutating printer description attributes.
    SetPrinterAttributes,
    /// Cancelling a job owned by another user.
    CancelForeignJob,
}

/// Decide whether `user` may perform `operation` on `printer`.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, user: &str, operation: AdminOperation, printer: &str) -> bool;
}

/// Allow-all policy, for single-user and trusted deployments.
pub struct OpenPolicy;

impl Authorizer for OpenPolicy {
    fn authorize(&self, _user: &str, _operation: AdminOperation, _printer: &str) -> bool {
        true
    }
}

/// Fixed set of administrator user names.
pub struct StaticAdmins {
    admins: HashSet<String>,
}

impl StaticAdmins {
    pub fn new(admins: impl IntoIterator<Item = String>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
        }
    }
}

impl Authorizer for StaticAdmins {
    fn authorize(&self, user: &str, _operation: AdminOperation, _printer: &str) -> bool {
        self.admins.contains(user)
    }
}

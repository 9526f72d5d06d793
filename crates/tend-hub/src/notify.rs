//! Outbound notification delivery (email, push). The hub only hands work
//! to a [`Notifier`]; delivery is fire-and-forget.

use futures::future::{self, BoxFuture, FutureExt as _};
use tend_core::invitation::Invitation;
use tracing::{debug, info};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub trait Notifier: Send + Sync {
  /// Get a freshly issued token to the invitee. Called once per invitation.
  fn invitation_issued(
    &self,
    invitation: Invitation,
    token: String,
  ) -> BoxFuture<'static, Result<(), BoxError>>;
}

/// Writes invitations to the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn invitation_issued(
    &self,
    invitation: Invitation,
    token: String,
  ) -> BoxFuture<'static, Result<(), BoxError>> {
    info!(
      invitation_id = %invitation.invitation_id,
      group_id = %invitation.group_id,
      email = %invitation.email,
      role = %invitation.role,
      "invitation issued"
    );
    debug!(invitation_id = %invitation.invitation_id, %token, "invitation token");
    future::ready(Ok(())).boxed()
  }
}

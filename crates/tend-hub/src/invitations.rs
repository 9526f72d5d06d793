//! Issuing, redeeming and revoking invitations.

use serde::Serialize;
use tend_core::{
  invitation::{
    Invitation, InvitationRestrictions, InvitationStatus, Redemption, RedemptionOutcome,
    normalize_email,
  },
  membership::{Membership, Role},
  permission::Action,
  store::CareStore,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{Error, Hub, Result, retry::with_retry, token};

/// A new invitation together with its plaintext token. The token is only
/// ever available here; the store keeps its hash.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedInvitation {
  pub invitation: Invitation,
  pub token:      String,
}

impl<S: CareStore> Hub<S> {
  pub async fn invite(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    email: &str,
    role: Role,
    restrictions: InvitationRestrictions,
  ) -> Result<IssuedInvitation> {
    self.authorize(user_id, group_id, &Action::InviteMember).await?;
    let email = normalize_email(email)?;
    let now = self.now();

    match (role, restrictions.access_expires_at) {
      (_, Some(expires)) if expires <= now => {
        return Err(Error::InvalidInput("access_expires_at must be in the future".into()));
      }
      (Role::Institutional, None) => {
        return Err(Error::InvalidInput("institutional invitations need access_expires_at".into()));
      }
      _ => {}
    }

    let token = token::generate();
    let invitation = Invitation {
      invitation_id: Uuid::new_v4(),
      token_hash: token::hash(&token),
      group_id,
      email,
      role,
      invited_by: user_id,
      created_at: now,
      expires_at: now + self.config.invitation_ttl(),
      status: InvitationStatus::Pending,
      restrictions,
      accepted_by: None,
      accepted_at: None,
    };
    let store = &self.store;
    let invitation = with_retry(&self.config.retry, "create_invitation", move || {
      store.create_invitation(invitation.clone())
    })
    .await?;
    info!(
      invitation_id = %invitation.invitation_id,
      %group_id,
      role = %invitation.role,
      by = %user_id,
      "invitation issued"
    );

    let invitation_id = invitation.invitation_id;
    let delivery = self.notifier.invitation_issued(invitation.clone(), token.clone());
    tokio::spawn(async move {
      if let Err(e) = delivery.await {
        warn!(%invitation_id, error = %e, "invitation delivery failed");
      }
    });

    Ok(IssuedInvitation { invitation, token })
  }

  /// Redeem a token for the caller. `email` is the caller's verified address
  /// as supplied by the identity provider.
  pub async fn accept_invitation(
    &self,
    user_id: Uuid,
    email: Option<&str>,
    token: &str,
  ) -> Result<Membership> {
    let email = email.map(normalize_email).transpose()?;
    let redemption = Redemption {
      token_hash: token::hash(token),
      user_id,
      email,
      at: self.now(),
    };
    let store = &self.store;
    let outcome = with_retry(&self.config.retry, "redeem_invitation", move || {
      store.redeem_invitation(redemption.clone())
    })
    .await?;

    match outcome {
      RedemptionOutcome::Accepted { invitation, membership } => {
        info!(
          invitation_id = %invitation.invitation_id,
          group_id = %membership.group_id,
          %user_id,
          role = %membership.role,
          "invitation accepted"
        );
        self.publish_membership(&membership).await;
        Ok(membership)
      }
      RedemptionOutcome::Rejected(reason) => {
        debug!(%user_id, %reason, "invitation rejected");
        Err(reason.into())
      }
      RedemptionOutcome::LastCoreMember => Err(Error::LastCoreMember),
    }
  }

  pub async fn revoke_invitation(
    &self,
    user_id: Uuid,
    group_id: Uuid,
    invitation_id: Uuid,
  ) -> Result<Invitation> {
    self.authorize(user_id, group_id, &Action::InviteMember).await?;
    let current = self
      .store
      .get_invitation(invitation_id)
      .await
      .map_err(Error::store)?
      .filter(|i| i.group_id == group_id)
      .ok_or(Error::NotFound("invitation"))?;

    let now = self.now();
    let status = current.effective_status(now);
    if status != InvitationStatus::Pending {
      return Err(Error::InvalidInput(format!("invitation is already {status}")));
    }

    let store = &self.store;
    let revoked = with_retry(&self.config.retry, "revoke_invitation", move || {
      store.revoke_invitation(invitation_id, user_id, now)
    })
    .await?
    .ok_or(Error::NotFound("invitation"))?;
    info!(%invitation_id, %group_id, by = %user_id, "invitation revoked");
    Ok(revoked)
  }

  /// Every invitation of the group, with expiry applied to the status.
  pub async fn list_invitations(&self, user_id: Uuid, group_id: Uuid) -> Result<Vec<Invitation>> {
    self.check_access(user_id, group_id, &Action::InviteMember).await?;
    let now = self.now();
    let mut invitations = self.store.list_invitations(group_id).await.map_err(Error::store)?;
    for invitation in &mut invitations {
      invitation.status = invitation.effective_status(now);
    }
    Ok(invitations)
  }
}

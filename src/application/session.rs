use crate::domain::loan::Identity;
use crate::domain::ports::{Signer, SignerRef};
use crate::error::{LoanError, Result};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Default)]
struct SessionState {
    identity: Option<Identity>,
    cancel: CancellationToken,
}

/// The connected identity of this process and the signer behind it.
///
/// Holds at most one identity. Disconnecting fires the session's
/// cancellation token, which stops any confirmation polling started under it.
pub struct SignerSession {
    signer: Option<SignerRef>,
    state: Mutex<SessionState>,
}

impl SignerSession {
    /// `None` models an environment with no signer capability at all.
    pub fn new(signer: Option<SignerRef>) -> Self {
        Self {
            signer,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn with_signer(signer: SignerRef) -> Self {
        Self::new(Some(signer))
    }

    pub fn signer(&self) -> Result<&dyn Signer> {
        self.signer.as_deref().ok_or(LoanError::NoSignerAvailable)
    }

    /// Connects, prompting the signer only when no identity is held yet.
    pub async fn connect(&self) -> Result<Identity> {
        if let Some(identity) = self.current_identity() {
            return Ok(identity);
        }

        let accounts = self.signer()?.request_accounts().await?;
        let identity = accounts.into_iter().next().ok_or(LoanError::UserRejected)?;
        Ok(self.establish(identity))
    }

    /// Picks up an account the signer already authorized, without prompting.
    pub async fn restore(&self) -> Result<Option<Identity>> {
        if let Some(identity) = self.current_identity() {
            return Ok(Some(identity));
        }
        let Some(signer) = self.signer.as_deref() else {
            return Ok(None);
        };

        match signer.accounts().await?.into_iter().next() {
            Some(identity) => Ok(Some(self.establish(identity))),
            None => Ok(None),
        }
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.lock().identity.clone()
    }

    /// Clears the identity and cancels work tracked under it.
    pub fn disconnect(&self) -> Option<Identity> {
        let mut state = self.lock();
        let previous = state.identity.take();
        state.cancel.cancel();
        state.cancel = CancellationToken::new();
        if let Some(identity) = &previous {
            info!(%identity, "Signer session disconnected");
        }
        previous
    }

    /// Token that fires when `identity` disconnects.
    ///
    /// Fails with `SessionClosed` if `identity` is no longer the connected
    /// one. The check and the token come from the same lock, so a disconnect
    /// racing with this call is always observed by one or the other.
    pub fn scope(&self, identity: &Identity) -> Result<CancellationToken> {
        let state = self.lock();
        if state.identity.as_ref() != Some(identity) {
            return Err(LoanError::SessionClosed);
        }
        Ok(state.cancel.child_token())
    }

    fn establish(&self, identity: Identity) -> Identity {
        let mut state = self.lock();
        // A concurrent connect may have won; keep the first identity.
        if let Some(existing) = &state.identity {
            debug!(%existing, "Signer session already established");
            return existing.clone();
        }
        info!(%identity, "Signer session connected");
        state.identity = Some(identity.clone());
        identity
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

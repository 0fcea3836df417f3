use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Candidate,
    Recruiter,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: String,
    pub role: Role,
}

/// Read-only view of whoever is signed in. The conversation page never
/// mutates it.
pub trait Identity: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
    fn role(&self) -> Option<Role>;

    /// Change feed for the signed-in user, if the store can provide one.
    fn watch_user(&self) -> Option<watch::Receiver<Option<SessionUser>>> {
        None
    }
}

/// App-wide auth store. The user may be unknown at first and filled in once
/// the sign-in flow resolves.
#[derive(Debug)]
pub struct AuthStore {
    user: watch::Sender<Option<SessionUser>>,
}

impl AuthStore {
    pub fn new(user: Option<SessionUser>) -> Self {
        let (user, _) = watch::channel(user);
        Self { user }
    }

    pub fn sign_in(&self, user: SessionUser) {
        self.user.send_replace(Some(user));
    }

    pub fn sign_out(&self) {
        self.user.send_replace(None);
    }

    pub fn user(&self) -> Option<SessionUser> {
        self.user.borrow().clone()
    }
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Identity for AuthStore {
    fn current_user_id(&self) -> Option<String> {
        self.user().map(|u| u.id)
    }

    fn role(&self) -> Option<Role> {
        self.user().map(|u| u.role)
    }

    fn watch_user(&self) -> Option<watch::Receiver<Option<SessionUser>>> {
        Some(self.user.subscribe())
    }
}

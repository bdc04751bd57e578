use palaver_storage::ContactRecord;

/// Identity collaborator: supplies the signed-in user's directory profile,
/// or nothing when signed out. Without a profile no operation may use the
/// caller as sender or owner.
pub trait IdentityProvider: Send + Sync {
    fn current_profile(&self) -> Option<ContactRecord>;
}

/// Identity resolved once before the session is constructed. Embedders that
/// run their own auth flow hand the result in through this.
#[derive(Debug, Clone)]
pub struct FixedIdentity {
    profile: Option<ContactRecord>,
}

impl FixedIdentity {
    pub fn signed_in(profile: ContactRecord) -> Self {
        Self {
            profile: Some(profile),
        }
    }

    pub fn signed_out() -> Self {
        Self { profile: None }
    }
}

impl IdentityProvider for FixedIdentity {
    fn current_profile(&self) -> Option<ContactRecord> {
        self.profile.clone()
    }
}

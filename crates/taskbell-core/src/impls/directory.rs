//! StaticDirectory - 起動時に与えたプロフィールを返すだけの OwnerDirectory

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::{OwnerId, OwnerProfile};
use crate::error::Result;
use crate::ports::OwnerDirectory;

/// Unknown owners resolve to `OwnerProfile::anonymous`, so a missing profile
/// never blocks delivery to channels that only need the owner id.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    profiles: HashMap<OwnerId, OwnerProfile>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: OwnerProfile) -> Self {
        self.profiles.insert(profile.owner_id.clone(), profile);
        self
    }
}

#[async_trait]
impl OwnerDirectory for StaticDirectory {
    async fn profile(&self, owner: &OwnerId) -> Result<OwnerProfile> {
        Ok(self
            .profiles
            .get(owner)
            .cloned()
            .unwrap_or_else(|| OwnerProfile::anonymous(owner.clone())))
    }
}

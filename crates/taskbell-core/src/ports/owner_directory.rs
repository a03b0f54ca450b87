//! OwnerDirectory port - 配送先の解決

use async_trait::async_trait;

use crate::domain::{OwnerId, OwnerProfile};
use crate::error::Result;

#[async_trait]
pub trait OwnerDirectory: Send + Sync {
    async fn profile(&self, owner: &OwnerId) -> Result<OwnerProfile>;
}

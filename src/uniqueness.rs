use std::sync::Arc;

use crate::repository::UserExistenceQuery;

/// Answers whether an email is already taken.
///
/// The answer reflects whatever the query collaborator sees at the moment of
/// the call. Nothing is locked, so a concurrent creation with the same
/// email can slip in between this check and the commit. Only a unique
/// constraint in the store closes that gap.
#[derive(Clone)]
pub struct UniquenessChecker {
    query: Arc<dyn UserExistenceQuery>,
}

impl UniquenessChecker {
    pub fn new(query: Arc<dyn UserExistenceQuery>) -> Self {
        Self { query }
    }

    #[tracing::instrument(name = "Check email uniqueness", skip_all)]
    pub async fn email_exists(&self, email: &str) -> Result<bool, anyhow::Error> {
        let exists = self.query.email_exists(email).await?;
        tracing::debug!(exists, "Email uniqueness checked");
        Ok(exists)
    }
}

//! Request-scoped identity. Wraps the JWT-validated `AuthenticatedUser` with
//! the corresponding DB `User` row, created on first sight via C4's
//! find-or-create (§3 — "created on first authenticated request").

use std::sync::Arc;

use r2e::http::extract::FromRef;
use r2e::r2e_security::{impl_claims_identity_extractor, AuthenticatedUser, ClaimsIdentity, JwtClaimsValidator};
use r2e::Identity;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::ImageStore;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StagehouseUser {
    pub auth: AuthenticatedUser,
    pub user_id: Uuid,
    pub role: String,
}

impl Identity for StagehouseUser {
    fn sub(&self) -> &str {
        self.auth.sub()
    }

    fn roles(&self) -> &[String] {
        self.auth.roles()
    }

    fn email(&self) -> Option<&str> {
        self.auth.email()
    }

    fn claims(&self) -> Option<&serde_json::Value> {
        self.auth.claims()
    }
}

impl StagehouseUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin" || self.auth.has_role("admin")
    }
}

impl<S> ClaimsIdentity<S> for StagehouseUser
where
    S: Send + Sync,
    ImageStore: FromRef<S>,
    Arc<JwtClaimsValidator>: FromRef<S>,
{
    async fn from_jwt_claims(claims: serde_json::Value, state: &S) -> Result<Self, r2e::AppError> {
        let auth = AuthenticatedUser::from_claims(claims);
        let store = ImageStore::from_ref(state);
        let user = store
            .get_or_create_user(auth.sub())
            .await
            .map_err(|e| r2e::AppError::Internal(e.to_string()))?;

        Ok(StagehouseUser {
            role: user.role,
            user_id: user.id,
            auth,
        })
    }
}

impl_claims_identity_extractor!(StagehouseUser);

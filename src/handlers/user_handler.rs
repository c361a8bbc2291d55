// src/handlers/user_handler.rs
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use super::{Actor, AppJson};
use crate::{
    errors::{SparrowError, SparrowResult},
    models::{User, UserRegistration},
    services::UserOperations,
    state::AppState,
};

/// Registration happens before the caller has an identity, so no [`Actor`].
pub async fn register_user(
    State(state): State<Arc<AppState>>,
    AppJson(registration): AppJson<UserRegistration>,
) -> SparrowResult<(StatusCode, Json<User>)> {
    let user = state.user_service.register_user(registration).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Users may only read their own profile.
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(user_id): Path<String>,
) -> SparrowResult<Json<User>> {
    if actor.user_id != user_id {
        return Err(SparrowError::access_denied("Users can only view their own profile"));
    }
    Ok(Json(state.user_service.get_user(&user_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRole;
    use crate::test_helpers::seeded_state;

    #[tokio::test]
    async fn test_profile_is_private() {
        let state = Arc::new(seeded_state().await);
        let actor = Actor {
            user_id: "usr-p1".to_string(),
            role: UserRole::Passenger,
        };

        let Json(user) = get_user(State(state.clone()), actor.clone(), Path("usr-p1".to_string()))
            .await
            .unwrap();
        assert_eq!(user.id, "usr-p1");

        assert!(matches!(
            get_user(State(state), actor, Path("usr-d1".to_string())).await,
            Err(SparrowError::AccessDenied(_))
        ));
    }
}

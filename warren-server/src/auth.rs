use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json,
};
use warren_lobby::{Credentials, Database, NewAccount, SessionData, UserData};

use crate::{
    errors::{ServerError, ServerResult},
    schemas::{LoginSchema, RegisterSchema, ValidatedJson},
    serialized::{AuthResult, Envelope, ToSerialized, UserPayload},
    Router, ServerContext,
};

/// Wraps [SessionData] so [FromRequestParts] can be implemented for it
pub struct Session(SessionData);

impl Session {
    /// Returns the user of the session
    pub fn user(&self) -> UserData {
        self.0.user.clone()
    }

    /// Returns the token the session was resolved from
    pub fn token(&self) -> &str {
        &self.0.token
    }
}

#[async_trait]
impl<Db> FromRequestParts<ServerContext<Db>> for Session
where
    Db: Database,
{
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServerContext<Db>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|x| x.to_str().ok())
            .ok_or(ServerError::Unauthorized("Missing authorization"))?;

        let parts: Vec<_> = token.split_ascii_whitespace().collect();

        if parts.first() != Some(&"Bearer") {
            return Err(ServerError::Unauthorized("Authorization must be Bearer"));
        }

        let token = parts.last().cloned().unwrap_or_default();

        let session = state
            .lobby
            .auth
            .session(token)
            .await
            .map_err(|_| ServerError::Unauthorized("Session does not exist"))?;

        Ok(Self(session))
    }
}

async fn register<Db>(
    State(context): State<ServerContext<Db>>,
    ValidatedJson(body): ValidatedJson<RegisterSchema>,
) -> ServerResult<impl IntoResponse>
where
    Db: Database,
{
    let session = context
        .lobby
        .auth
        .register(NewAccount {
            username: body.username,
            email: body.email,
            password: body.password,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(Envelope::with_message(
            "User registered successfully",
            session.to_serialized(),
        )),
    ))
}

async fn login<Db>(
    State(context): State<ServerContext<Db>>,
    ValidatedJson(body): ValidatedJson<LoginSchema>,
) -> ServerResult<Json<Envelope<AuthResult>>>
where
    Db: Database,
{
    let session = context
        .lobby
        .auth
        .login(Credentials {
            email: body.email,
            password: body.password,
        })
        .await?;

    Ok(Json(Envelope::with_message(
        "Login successful",
        session.to_serialized(),
    )))
}

/// Returns a fresh copy of the authenticated user
async fn me<Db>(
    session: Session,
    State(context): State<ServerContext<Db>>,
) -> ServerResult<Json<Envelope<UserPayload>>>
where
    Db: Database,
{
    let user = context.lobby.auth.user_by_id(session.user().id).await?;

    Ok(Json(Envelope::data(UserPayload {
        user: user.to_serialized(),
    })))
}

async fn logout<Db>(
    session: Session,
    State(context): State<ServerContext<Db>>,
) -> ServerResult<Json<Envelope<()>>>
where
    Db: Database,
{
    context.lobby.auth.logout(session.token()).await?;

    Ok(Json(Envelope::message("Logged out")))
}

pub fn router<Db>() -> Router<Db>
where
    Db: Database,
{
    Router::new()
        .route("/register", post(register::<Db>))
        .route("/login", post(login::<Db>))
        .route("/logout", post(logout::<Db>))
        .route("/me", get(me::<Db>))
}

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::authz::is_participant;
use crate::error::HandshakeRejection;
use crate::store::MessageStore;
use crate::token::verify_token;

/// Query parameters of a realtime upgrade request.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeParams {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Identity and target of a connection that passed the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedPeer {
    pub user_id: Uuid,
    pub username: String,
    pub conversation_id: Uuid,
}

/// Header token wins over the query token. Empty values count as absent.
pub fn select_token<'a>(header: Option<&'a str>, query: Option<&'a str>) -> Option<&'a str> {
    header
        .filter(|t| !t.is_empty())
        .or_else(|| query.filter(|t| !t.is_empty()))
}

/// Run the handshake checks in order: token present, token valid,
/// conversation given, caller is a participant.
pub async fn authorize(
    store: &Arc<dyn MessageStore>,
    jwt_secret: &str,
    header_token: Option<&str>,
    params: &HandshakeParams,
) -> Result<AuthorizedPeer, HandshakeRejection> {
    let token = select_token(header_token, params.token.as_deref())
        .ok_or(HandshakeRejection::MissingToken)?;
    let claims = verify_token(jwt_secret, token)?;
    debug!("Handshake authenticated {} ({})", claims.username, claims.sub);

    let conversation_id: Uuid = params
        .conversation_id
        .as_deref()
        .and_then(|raw| raw.parse().ok())
        .ok_or(HandshakeRejection::MissingConversation)?;

    match is_participant(store, conversation_id, claims.sub).await {
        Ok(true) => Ok(AuthorizedPeer {
            user_id: claims.sub,
            username: claims.username,
            conversation_id,
        }),
        Ok(false) => Err(HandshakeRejection::NotParticipant),
        Err(e) => Err(HandshakeRejection::Storage(e)),
    }
}

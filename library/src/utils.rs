use serde::{Deserialize, Serialize};

/// Public STUN server used when none is configured.
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// One entry of a peer connection's ICE server list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Specifies what kind of peer connection to create
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionType {
    /// Within local network
    Local,
    /// Setup with STUN server, WAN capabilities but can fail
    Stun { urls: String },
    /// Setup with STUN and TURN servers, will fallback to TURN if needed, most stable connection
    StunAndTurn {
        stun_urls: String,
        turn_urls: String,
        username: String,
        credential: String,
    },
}

impl Default for ConnectionType {
    fn default() -> Self {
        Self::Stun {
            urls: DEFAULT_STUN_SERVER.to_owned(),
        }
    }
}

impl ConnectionType {
    pub fn ice_servers(&self) -> Vec<IceServer> {
        match self {
            Self::Local => Vec::new(),
            Self::Stun { urls } => vec![IceServer::stun(urls.clone())],
            Self::StunAndTurn {
                stun_urls,
                turn_urls,
                username,
                credential,
            } => vec![
                IceServer::stun(stun_urls.clone()),
                IceServer {
                    urls: vec![turn_urls.clone()],
                    username: Some(username.clone()),
                    credential: Some(credential.clone()),
                },
            ],
        }
    }
}

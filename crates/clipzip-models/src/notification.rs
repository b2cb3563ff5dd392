//! Outcome notifications sent to the video owner.

use serde::{Deserialize, Serialize};

use crate::user::User;
use crate::video::Video;

/// Message body for a finished archive.
pub const SUCCESS_MESSAGE: &str = "Pronto para download";

/// Message prefix for a failed video.
pub const FAILURE_MESSAGE: &str = "Erro ao processar o vídeo";

/// Terminal outcome as seen by the downstream consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationStatus {
    #[serde(rename = "Finalizado")]
    Finished,
    #[serde(rename = "Erro")]
    Failed,
}

impl NotificationStatus {
    /// Wire value.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Finished => "Finalizado",
            NotificationStatus::Failed => "Erro",
        }
    }
}

/// Notification published once per terminal transition.
///
/// Fields are private so a notification cannot change after it is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeNotification {
    #[serde(rename = "titulo")]
    title: String,
    status: NotificationStatus,
    #[serde(rename = "mensagem")]
    message: String,
    #[serde(rename = "emailUsuario")]
    user_email: String,
    #[serde(rename = "nomeUsuario")]
    user_name: String,
}

impl OutcomeNotification {
    /// Notification for a video whose archive is ready.
    pub fn success(video: &Video, owner: &User) -> Self {
        Self {
            title: video.display_title(),
            status: NotificationStatus::Finished,
            message: SUCCESS_MESSAGE.to_string(),
            user_email: owner.email.clone(),
            user_name: owner.display_name().to_string(),
        }
    }

    /// Notification for a video that ended in error.
    pub fn failure(video: &Video, owner: &User, reason: &str) -> Self {
        let message = if reason.is_empty() {
            FAILURE_MESSAGE.to_string()
        } else {
            format!("{}: {}", FAILURE_MESSAGE, reason)
        };

        Self {
            title: video.display_title(),
            status: NotificationStatus::Failed,
            message,
            user_email: owner.email.clone(),
            user_name: owner.display_name().to_string(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn status(&self) -> NotificationStatus {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn user_email(&self) -> &str {
        &self.user_email
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn is_success(&self) -> bool {
        self.status == NotificationStatus::Finished
    }

    /// Serialize to the wire shape.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

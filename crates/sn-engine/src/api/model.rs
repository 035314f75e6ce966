use serde::{Deserialize, Serialize};
use sn_common::{ChannelMask, ContentRefs, DeliveryChannel, NotificationType, Priority};
use std::collections::HashMap;
use utoipa::ToSchema;

/// Request body for `POST /notifications`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateNotificationRequest {
    pub recipient_id: String,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    pub action_link: Option<String>,
    #[serde(default)]
    pub content_refs: ContentRefs,
    #[schema(value_type = Option<Vec<DeliveryChannel>>)]
    pub channel_mask: Option<ChannelMask>,
    pub priority: Option<Priority>,
    #[serde(default)]
    pub template_vars: HashMap<String, String>,
    pub template_id: Option<String>,
    pub group_key: Option<String>,
    pub allow_bundling: Option<bool>,
    pub respect_quiet_hours: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateNotificationResponse {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Deserialize, ToSchema, Default)]
pub struct ListNotificationsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeviceRegisterRequest {
    pub device_id: String,
    pub push_token: String,
    pub platform: sn_common::Platform,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize, ToSchema, Default)]
pub struct SocketQuery {
    pub user_id: Option<String>,
}

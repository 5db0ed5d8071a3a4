use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known envelope context keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TagKey {
    #[serde(rename = "ai.application.ver")]
    ApplicationVersion,
    #[serde(rename = "ai.device.id")]
    DeviceId,
    #[serde(rename = "ai.device.locale")]
    DeviceLocale,
    #[serde(rename = "ai.device.model")]
    DeviceModel,
    #[serde(rename = "ai.device.oemName")]
    DeviceOemName,
    #[serde(rename = "ai.device.osVersion")]
    DeviceOsVersion,
    #[serde(rename = "ai.device.type")]
    DeviceType,
    #[serde(rename = "ai.location.ip")]
    LocationIp,
    #[serde(rename = "ai.location.country")]
    LocationCountry,
    #[serde(rename = "ai.location.province")]
    LocationProvince,
    #[serde(rename = "ai.location.city")]
    LocationCity,
    #[serde(rename = "ai.operation.id")]
    OperationId,
    #[serde(rename = "ai.operation.name")]
    OperationName,
    #[serde(rename = "ai.operation.parentId")]
    OperationParentId,
    #[serde(rename = "ai.operation.syntheticSource")]
    OperationSyntheticSource,
    #[serde(rename = "ai.operation.correlationVector")]
    OperationCorrelationVector,
    #[serde(rename = "ai.session.id")]
    SessionId,
    #[serde(rename = "ai.session.isFirst")]
    SessionIsFirst,
    #[serde(rename = "ai.user.accountId")]
    UserAccountId,
    #[serde(rename = "ai.user.id")]
    UserId,
    #[serde(rename = "ai.user.authUserId")]
    UserAuthUserId,
    #[serde(rename = "ai.cloud.role")]
    CloudRole,
    #[serde(rename = "ai.cloud.roleInstance")]
    CloudRoleInstance,
}

impl TagKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKey::ApplicationVersion => "ai.application.ver",
            TagKey::DeviceId => "ai.device.id",
            TagKey::DeviceLocale => "ai.device.locale",
            TagKey::DeviceModel => "ai.device.model",
            TagKey::DeviceOemName => "ai.device.oemName",
            TagKey::DeviceOsVersion => "ai.device.osVersion",
            TagKey::DeviceType => "ai.device.type",
            TagKey::LocationIp => "ai.location.ip",
            TagKey::LocationCountry => "ai.location.country",
            TagKey::LocationProvince => "ai.location.province",
            TagKey::LocationCity => "ai.location.city",
            TagKey::OperationId => "ai.operation.id",
            TagKey::OperationName => "ai.operation.name",
            TagKey::OperationParentId => "ai.operation.parentId",
            TagKey::OperationSyntheticSource => "ai.operation.syntheticSource",
            TagKey::OperationCorrelationVector => "ai.operation.correlationVector",
            TagKey::SessionId => "ai.session.id",
            TagKey::SessionIsFirst => "ai.session.isFirst",
            TagKey::UserAccountId => "ai.user.accountId",
            TagKey::UserId => "ai.user.id",
            TagKey::UserAuthUserId => "ai.user.authUserId",
            TagKey::CloudRole => "ai.cloud.role",
            TagKey::CloudRoleInstance => "ai.cloud.roleInstance",
        }
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope tags, ordered by key so serialized output is deterministic.
pub type Tags = BTreeMap<TagKey, String>;

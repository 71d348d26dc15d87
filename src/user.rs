use serde::{Deserialize, Serialize};

/// Free-form user properties sent along with the user.
pub type UserProperties = serde_json::Map<String, serde_json::Value>;

/// Identity and attributes of the user variants are fetched for.
///
/// `UserContext` is immutable. Use [`UserContext::builder()`] to create one.
///
/// Serializes to the JSON object expected by the server, omitting absent fields.
///
/// # Examples
/// ```
/// # use skylab::UserContext;
/// let user = UserContext::builder()
///     .user_id("user@company.com")
///     .device_id("device-1")
///     .user_property("premium", true)
///     .build();
/// assert_eq!(user.user_id(), Some("user@company.com"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dma: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    device_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    carrier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    library: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_properties: Option<UserProperties>,
}

macro_rules! getters {
    ($($(#[$meta:meta])* $field:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            pub fn $field(&self) -> Option<&str> {
                self.$field.as_deref()
            }
        )*
    };
}

impl UserContext {
    /// Create an empty builder.
    pub fn builder() -> UserContextBuilder {
        UserContextBuilder::default()
    }

    getters! {
        /// User id.
        user_id,
        /// Device id.
        device_id,
        /// Country.
        country,
        /// Region.
        region,
        /// Designated market area.
        dma,
        /// City.
        city,
        /// Language.
        language,
        /// Platform.
        platform,
        /// Application version.
        version,
        /// Operating system.
        os,
        /// Device family.
        device_family,
        /// Device type.
        device_type,
        /// Device manufacturer.
        device_manufacturer,
        /// Device brand.
        device_brand,
        /// Device model.
        device_model,
        /// Network carrier.
        carrier,
        /// Client library tag.
        library,
    }

    /// Custom user properties, if any were set.
    pub fn user_properties(&self) -> Option<&UserProperties> {
        self.user_properties.as_ref()
    }

    /// Returns `true` if neither `user_id` nor `device_id` is set. The server cannot resolve the
    /// identity of such a user.
    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none() && self.device_id.is_none()
    }

    /// Serialize to the JSON object sent to the server.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Accumulating builder for [`UserContext`].
#[derive(Debug, Clone, Default)]
pub struct UserContextBuilder {
    user: UserContext,
}

macro_rules! setters {
    ($($field:ident),* $(,)?) => {
        $(
            #[doc = concat!("Set `", stringify!($field), "`.")]
            pub fn $field(mut self, $field: impl Into<String>) -> Self {
                self.user.$field = Some($field.into());
                self
            }
        )*
    };
}

impl UserContextBuilder {
    setters! {
        user_id,
        device_id,
        country,
        region,
        dma,
        city,
        language,
        platform,
        version,
        os,
        device_family,
        device_type,
        device_manufacturer,
        device_brand,
        device_model,
        carrier,
        library,
    }

    /// Replace all user properties. An empty map clears them.
    pub fn user_properties(mut self, properties: UserProperties) -> Self {
        self.user.user_properties = (!properties.is_empty()).then_some(properties);
        self
    }

    /// Set a single user property. A later value for the same property replaces the earlier one.
    pub fn user_property(
        mut self,
        property: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.user
            .user_properties
            .get_or_insert_with(UserProperties::new)
            .insert(property.into(), value.into());
        self
    }

    /// Merge `user` into the builder.
    ///
    /// Every field present in `user` overwrites the builder's value, absent fields are left as
    /// they are. User properties are replaced as a whole if `user` has any.
    pub fn copy_user(mut self, user: &UserContext) -> Self {
        macro_rules! merge {
            ($target:expr, $source:expr; $($field:ident),*) => {
                $(
                    if let Some(value) = &$source.$field {
                        $target.$field = Some(value.clone());
                    }
                )*
            };
        }
        merge!(
            self.user, user;
            user_id,
            device_id,
            country,
            region,
            dma,
            city,
            language,
            platform,
            version,
            os,
            device_family,
            device_type,
            device_manufacturer,
            device_brand,
            device_model,
            carrier,
            library,
            user_properties
        );
        self
    }

    /// Build the user.
    pub fn build(self) -> UserContext {
        self.user
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::UserContext;

    #[test]
    fn serializes_present_fields_only() {
        let user = UserContext::builder()
            .user_id("user_id")
            .device_id("device_id")
            .country("country")
            .user_property("userPropertyKey", "value")
            .build();

        let json: serde_json::Value = serde_json::from_str(&user.to_json().unwrap()).unwrap();

        assert_eq!(
            json,
            json!({
                "user_id": "user_id",
                "device_id": "device_id",
                "country": "country",
                "user_properties": {"userPropertyKey": "value"},
            })
        );
    }

    #[test]
    fn last_user_property_write_wins() {
        let user = UserContext::builder()
            .user_property("plan", "free")
            .user_property("plan", "paid")
            .build();

        assert_eq!(user.user_properties().unwrap()["plan"], json!("paid"));
    }

    #[test]
    fn copy_user_overlays_present_fields() {
        let base = UserContext::builder()
            .user_id("user_id")
            .device_id("device_id")
            .country("country")
            .city("test")
            .language("test")
            .platform("test")
            .library("test")
            .carrier("test")
            .user_property("userPropertyKey", "value");

        let overlay = UserContext::builder()
            .country("newCountry")
            .version("newVersion")
            .user_property("userPropertyKey2", "value2")
            .build();

        let merged = base.copy_user(&overlay).build();

        let expected = UserContext::builder()
            .user_id("user_id")
            .device_id("device_id")
            .country("newCountry")
            .version("newVersion")
            .city("test")
            .language("test")
            .platform("test")
            .library("test")
            .carrier("test")
            .user_property("userPropertyKey2", "value2")
            .build();
        assert_eq!(merged, expected);
    }

    #[test]
    fn copy_user_keeps_properties_when_source_has_none() {
        let merged = UserContext::builder()
            .user_property("plan", "free")
            .copy_user(&UserContext::builder().user_id("u").build())
            .build();

        assert_eq!(merged.user_properties().unwrap()["plan"], json!("free"));
        assert_eq!(merged.user_id(), Some("u"));
    }

    #[test]
    fn equality_compares_every_field() {
        let a = UserContext::builder().device_id("d1").build();
        let b = UserContext::builder().device_id("d1").build();
        let c = UserContext::builder().device_id("d1").os("linux").build();
        let d = UserContext::builder()
            .device_id("d1")
            .user_property("k", 1)
            .build();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn anonymous_without_ids() {
        assert!(UserContext::default().is_anonymous());
        assert!(!UserContext::builder().device_id("d").build().is_anonymous());
    }
}

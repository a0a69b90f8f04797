//! Avatar URLs for a code-review host.
//!
//! With Conduit bindings configured the avatar is the user's Phabricator
//! profile image. Without them it falls back to a URL template.

use thiserror::Error;
use tracing::warn;

use crate::conduit::PhabConduit;
use crate::error::ConduitError;
use crate::http::{HttpExecutor, UreqExecutor};

pub const USER_PLACEHOLDER: &str = "${user}";
pub const EMAIL_PLACEHOLDER: &str = "${email}";
pub const SIZE_PLACEHOLDER: &str = "${size}";

/// Host-side avatar settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvatarConfig {
    /// Avatar URL template containing `${user}` and/or `${email}`.
    pub url: Option<String>,
    /// Template for the page where users change their avatar.
    pub change_url: Option<String>,
    /// Query parameter template containing `${size}`, e.g. `s=${size}`.
    pub size_parameter: Option<String>,
    /// The host is served over https, so avatar URLs must be too.
    pub ssl: bool,
}

/// The host user an avatar is requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_name: String,
    pub preferred_email: Option<String>,
}

#[derive(Debug, Error)]
pub enum AvatarError {
    #[error("avatar URL is not configured")]
    NotConfigured,

    #[error("avatar URL `{0}` contains neither ${{user}} nor ${{email}}")]
    MissingPlaceholder(String),

    #[error("no avatar found for `{0}`")]
    NotFound(String),

    #[error(transparent)]
    Conduit(#[from] ConduitError),
}

pub struct AvatarProvider<E = UreqExecutor> {
    config: AvatarConfig,
    conduit: Option<PhabConduit<E>>,
}

impl AvatarProvider<UreqExecutor> {
    /// Resolves avatars from the URL template only.
    pub fn from_template(config: AvatarConfig) -> Self {
        Self { config, conduit: None }
    }
}

impl<E: HttpExecutor> AvatarProvider<E> {
    /// Resolves avatars from Phabricator profile images.
    pub fn with_conduit(config: AvatarConfig, conduit: PhabConduit<E>) -> Self {
        Self {
            config,
            conduit: Some(conduit),
        }
    }

    /// Avatar URL for `user`, asking for `size` pixels when the host knows
    /// a size parameter.
    pub fn avatar_url(&self, user: &UserIdentity, size: Option<u32>) -> Result<String, AvatarError> {
        let mut url = match &self.conduit {
            Some(conduit) => self.profile_image(conduit, user)?,
            None => self.templated_url(user)?,
        };

        if self.config.ssl && url.starts_with("http://") {
            url = url.replacen("http://", "https://", 1);
        }

        if let (Some(size), Some(parameter)) = (size.filter(|s| *s > 0), &self.config.size_parameter) {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&parameter.replace(SIZE_PLACEHOLDER, &size.to_string()));
        }
        Ok(url)
    }

    /// URL of the page where `user` changes their avatar.
    pub fn change_avatar_url(&self, user: &UserIdentity) -> Option<String> {
        self.config.change_url.as_deref().map(|template| substitute(template, user))
    }

    fn profile_image(&self, conduit: &PhabConduit<E>, user: &UserIdentity) -> Result<String, AvatarError> {
        conduit
            .user_by_identity(&user.user_name)?
            .and_then(|found| found.image)
            .ok_or_else(|| AvatarError::NotFound(user.user_name.clone()))
    }

    fn templated_url(&self, user: &UserIdentity) -> Result<String, AvatarError> {
        let Some(template) = self.config.url.as_deref() else {
            warn!("avatar URL is not configured, cannot show avatars");
            return Err(AvatarError::NotConfigured);
        };
        // Every user sharing one image is almost certainly a misconfiguration.
        if !template.contains(USER_PLACEHOLDER) && !template.contains(EMAIL_PLACEHOLDER) {
            warn!(template, "avatar URL has no user placeholder");
            return Err(AvatarError::MissingPlaceholder(template.to_string()));
        }
        Ok(substitute(template, user))
    }
}

/// Replaces the user and email placeholders with URL-encoded values. A missing
/// email leaves its placeholder untouched.
fn substitute(template: &str, user: &UserIdentity) -> String {
    let mut url = template.replace(USER_PLACEHOLDER, &encode(&user.user_name));
    if let Some(email) = &user.preferred_email {
        url = url.replace(EMAIL_PLACEHOLDER, &encode(email));
    }
    url
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

//! An HTTP client that fetches variants for a user from the server.
use std::{collections::HashMap, time::Duration};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use reqwest::{header::AUTHORIZATION, StatusCode, Url};

use crate::{Error, Result, UserContext, Variant};

const VARDATA_ENDPOINT: [&str; 2] = ["sdk", "vardata"];

/// Server response to a variants request.
#[derive(Debug)]
pub(crate) enum FetchResponse {
    /// Variants assigned to the user.
    Variants(HashMap<String, Variant>),
    /// The server answered with a non-2xx status.
    Rejected(StatusCode),
    /// The server answered with 2xx, but the body is not a valid variants object.
    Malformed,
}

/// A client that fetches variants from the server.
///
/// `VariantFetcher` is cheap to clone. Clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub(crate) struct VariantFetcher {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    server_url: Url,
    api_key: String,
    timeout: Duration,
}

impl VariantFetcher {
    pub fn new(
        client: reqwest::blocking::Client,
        server_url: &str,
        api_key: String,
        timeout: Duration,
    ) -> Result<VariantFetcher> {
        let server_url = Url::parse(server_url).map_err(Error::InvalidServerUrl)?;
        if server_url.cannot_be_a_base() {
            return Err(Error::InvalidServerUrl(
                url::ParseError::RelativeUrlWithCannotBeABaseBase,
            ));
        }

        Ok(VariantFetcher {
            client,
            server_url,
            api_key,
            timeout,
        })
    }

    /// URL of the variants request for `user`: `<server_url>/sdk/vardata/<base64url(user json)>`.
    pub fn variants_url(&self, user: &UserContext) -> Result<Url> {
        let encoded = URL_SAFE_NO_PAD.encode(user.to_json()?);

        let mut url = self.server_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidServerUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(VARDATA_ENDPOINT)
            .push(&encoded);
        Ok(url)
    }

    /// Request variants for `user`.
    ///
    /// Only transport failures are returned as errors. Non-2xx responses and unparseable bodies
    /// are logged and reported as [`FetchResponse::Rejected`] and [`FetchResponse::Malformed`].
    pub fn fetch_variants(&self, user: &UserContext) -> Result<FetchResponse> {
        let url = self.variants_url(user)?;

        log::debug!(target: "skylab", "requesting variants from {}", url);
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Api-Key {}", self.api_key))
            .timeout(self.timeout)
            .send()?;

        let status = response.status();
        let body = response.text()?;

        if !status.is_success() {
            log::warn!(target: "skylab", status = status.as_u16(); "received non-2xx response while fetching variants: {}", body);
            return Ok(FetchResponse::Rejected(status));
        }

        // A single malformed entry fails the whole response.
        match serde_json::from_str::<HashMap<String, Variant>>(&body) {
            Ok(variants) => Ok(FetchResponse::Variants(variants)),
            Err(err) => {
                log::error!(target: "skylab", "could not parse variants response {:?}: {:?}", body, err);
                Ok(FetchResponse::Malformed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    use super::VariantFetcher;
    use crate::{Error, UserContext};

    fn fetcher(server_url: &str) -> crate::Result<VariantFetcher> {
        VariantFetcher::new(
            reqwest::blocking::Client::new(),
            server_url,
            "api-key".to_owned(),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn url_encodes_user_as_unpadded_base64url() {
        let user = UserContext::builder().device_id("d1").build();

        let url = fetcher("https://x/").unwrap().variants_url(&user).unwrap();

        let encoded = URL_SAFE_NO_PAD.encode(r#"{"device_id":"d1"}"#);
        assert_eq!(url.as_str(), format!("https://x/sdk/vardata/{encoded}"));
        assert!(!url.as_str().contains('='));
    }

    #[test]
    fn url_appends_to_server_path() {
        let user = UserContext::default();

        let url = fetcher("https://x/api")
            .unwrap()
            .variants_url(&user)
            .unwrap();

        assert!(url.as_str().starts_with("https://x/api/sdk/vardata/"));
    }

    #[test]
    fn rejects_invalid_server_urls() {
        assert!(matches!(
            fetcher("not a url"),
            Err(Error::InvalidServerUrl(_))
        ));
        assert!(matches!(
            fetcher("mailto:someone@example.com"),
            Err(Error::InvalidServerUrl(_))
        ));
    }
}

use reqwest::header::LOCATION;
use reqwest::{redirect, Client, Url};
use std::time::Duration;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct HttpObservation {
    pub response_code: Option<u16>,
    pub redirect_url: Option<String>,
    pub redirect_target_ok: Option<bool>,
}

/// Two clients: `direct` reports the first response as-is, `follow` chases
/// a redirect to its end to judge the target.
pub struct HttpProbe {
    direct: Client,
    follow: Client,
}

impl HttpProbe {
    pub fn new(user_agent: &str, limit: Duration) -> reqwest::Result<Self> {
        let direct = Client::builder()
            .redirect(redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .timeout(limit)
            .user_agent(user_agent)
            .build()?;
        let follow = Client::builder()
            .redirect(redirect::Policy::limited(10))
            .danger_accept_invalid_certs(true)
            .timeout(limit)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { direct, follow })
    }

    /// HTTPS first, plain HTTP when HTTPS does not answer. A host answering
    /// neither yields an empty observation.
    pub async fn observe(&self, name: &str) -> HttpObservation {
        for scheme in ["https", "http"] {
            let url = format!("{scheme}://{name}/");
            match self.direct.get(&url).send().await {
                Ok(response) => return self.inspect(response).await,
                Err(e) => tracing::debug!(url = %url, error = %e, "HTTP probe failed"),
            }
        }
        HttpObservation::default()
    }

    async fn inspect(&self, response: reqwest::Response) -> HttpObservation {
        let status = response.status();
        let mut observation = HttpObservation {
            response_code: Some(status.as_u16()),
            ..Default::default()
        };
        if !status.is_redirection() {
            return observation;
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| resolve_location(response.url(), value));
        let Some(target) = location else {
            observation.redirect_target_ok = Some(false);
            return observation;
        };

        let target_ok = match self.follow.get(target.clone()).send().await {
            Ok(followed) => followed.status().is_success(),
            Err(e) => {
                tracing::debug!(target = %target, error = %e, "Redirect target unreachable");
                false
            }
        };
        observation.redirect_url = Some(target.to_string());
        observation.redirect_target_ok = Some(target_ok);
        observation
    }
}

/// `Location` may be relative to the request URL.
fn resolve_location(base: &Url, location: &str) -> Option<Url> {
    base.join(location.trim()).ok()
}

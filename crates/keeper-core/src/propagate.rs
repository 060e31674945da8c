//! Cross-channel propagation: tell one channel's running instance the final
//! address of another.
//!
//! The receiving app exposes a GET action (`?action=setX&url=...&secret=...`)
//! and answers with a literal `OK`. Redirects are followed only inside the
//! trusted platform domains, at most [`MAX_REDIRECTS`] hops.

use crate::config::PlatformSettings;
use reqwest::blocking::Client;
use reqwest::redirect::{Attempt, Policy};
use reqwest::Url;
use std::time::Duration;
use thiserror::Error;

pub const MAX_REDIRECTS: usize = 5;

const EXPECTED_BODY: &str = "OK";

/// Longest body excerpt kept in an error.
const BODY_EXCERPT: usize = 200;

#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("redirect to untrusted host '{host}' refused")]
    UntrustedRedirect { host: String },

    #[error("more than {MAX_REDIRECTS} redirects")]
    TooManyRedirects,

    #[error("expected 'OK', got HTTP {status}: {body}")]
    UnexpectedBody { status: u16, body: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Delivers a finalized address to a sibling channel.
pub trait Notifier {
    fn notify(
        &self,
        target: &str,
        action: &str,
        url: &str,
        secret: Option<&str>,
    ) -> Result<(), PropagationError>;
}

// ---------------------------------------------------------------------------
// Trusted domains
// ---------------------------------------------------------------------------

/// True when `host` is one of `domains` or a subdomain of one.
pub fn is_trusted_host(host: &str, domains: &[String]) -> bool {
    let host = host.to_ascii_lowercase();
    domains.iter().any(|d| {
        let d = d.trim().to_ascii_lowercase();
        !d.is_empty() && (host == d || host.ends_with(&format!(".{d}")))
    })
}

/// Raised from inside the redirect policy; recovered from the error chain.
#[derive(Debug, Error)]
enum RedirectRejected {
    #[error("untrusted redirect host {0}")]
    Untrusted(String),
    #[error("too many redirects")]
    TooMany,
}

fn redirect_policy(domains: Vec<String>) -> Policy {
    Policy::custom(move |attempt: Attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error(RedirectRejected::TooMany);
        }
        let host = attempt.url().host_str().unwrap_or_default().to_string();
        if is_trusted_host(&host, &domains) {
            attempt.follow()
        } else {
            attempt.error(RedirectRejected::Untrusted(host))
        }
    })
}

fn rejection(err: &reqwest::Error) -> Option<PropagationError> {
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        if let Some(rejected) = e.downcast_ref::<RedirectRejected>() {
            return Some(match rejected {
                RedirectRejected::Untrusted(host) => {
                    PropagationError::UntrustedRedirect { host: host.clone() }
                }
                RedirectRejected::TooMany => PropagationError::TooManyRedirects,
            });
        }
        source = e.source();
    }
    None
}

// ---------------------------------------------------------------------------
// HttpPropagator
// ---------------------------------------------------------------------------

pub struct HttpPropagator {
    client: Client,
    trusted: Vec<String>,
}

impl HttpPropagator {
    pub fn new(settings: &PlatformSettings) -> Result<Self, PropagationError> {
        let trusted = settings.trusted_domains.clone();
        let mut builder = Client::builder()
            .redirect(redirect_policy(trusted.clone()))
            .user_agent(concat!("keeper/", env!("CARGO_PKG_VERSION")));
        if settings.timeout_seconds > 0 {
            builder = builder.timeout(Duration::from_secs(settings.timeout_seconds));
        }
        Ok(Self {
            client: builder.build()?,
            trusted,
        })
    }

    fn request_url(
        &self,
        target: &str,
        action: &str,
        url: &str,
        secret: Option<&str>,
    ) -> Result<Url, PropagationError> {
        let mut request = Url::parse(target).map_err(|e| PropagationError::InvalidAddress {
            address: target.to_string(),
            reason: e.to_string(),
        })?;
        let host = request.host_str().unwrap_or_default();
        if !is_trusted_host(host, &self.trusted) {
            return Err(PropagationError::InvalidAddress {
                address: target.to_string(),
                reason: format!("host '{host}' is not a trusted domain"),
            });
        }
        {
            let mut pairs = request.query_pairs_mut();
            pairs.append_pair("action", action).append_pair("url", url);
            if let Some(secret) = secret {
                pairs.append_pair("secret", secret);
            }
        }
        Ok(request)
    }
}

impl Notifier for HttpPropagator {
    fn notify(
        &self,
        target: &str,
        action: &str,
        url: &str,
        secret: Option<&str>,
    ) -> Result<(), PropagationError> {
        let request = self.request_url(target, action, url, secret)?;
        tracing::debug!(%target, %action, "propagating address");

        let response = match self.client.get(request).send() {
            Ok(r) => r,
            Err(e) => return Err(rejection(&e).unwrap_or(PropagationError::Http(e))),
        };
        let status = response.status().as_u16();
        let body = response.text()?;
        if body.trim() == EXPECTED_BODY {
            return Ok(());
        }
        let mut excerpt: String = body.trim().chars().take(BODY_EXCERPT).collect();
        if body.trim().chars().count() > BODY_EXCERPT {
            excerpt.push_str("...");
        }
        Err(PropagationError::UnexpectedBody {
            status,
            body: excerpt,
        })
    }
}

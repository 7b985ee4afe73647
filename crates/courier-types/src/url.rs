//! Transport URL grammar.
//!
//! ```text
//! scheme://[user[:pass]@]host1[:port1][,[user[:pass]@]host2[:port2],...]/exchange[?opt=val&...]
//! ```
//!
//! - The network location is split on `,` into a host list.
//! - Credentials given before a host carry over to the hosts after it until
//!   another `user[:pass]@` prefix replaces them; `,:@host` resets them to
//!   empty strings.
//! - The first path segment is the exchange, falling back to the caller's
//!   default.
//! - The query string becomes a map of option name to every value given.

use std::collections::BTreeMap;

use crate::error::UrlError;

/// One broker host with the credentials in effect for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHost {
    pub host: String,
    pub username: String,
    pub password: String,
}

/// A parsed transport URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportUrl {
    /// Driver name (the URL scheme). `None` for an empty URL.
    pub transport: Option<String>,
    pub exchange: Option<String>,
    pub hosts: Vec<TransportHost>,
    pub parameters: BTreeMap<String, Vec<String>>,
}

impl TransportUrl {
    /// Parse `url`. An empty string yields only the default exchange.
    pub fn parse(url: &str, default_exchange: Option<&str>) -> Result<Self, UrlError> {
        let default_exchange = default_exchange.map(str::to_string);
        if url.is_empty() {
            return Ok(Self {
                exchange: default_exchange,
                ..Self::default()
            });
        }

        let (scheme, rest) = split_scheme(url)?;

        // Fragment is never meaningful here.
        let rest = rest.split('#').next().unwrap_or_default();
        let (rest, query) = match rest.split_once('?') {
            Some((r, q)) => (r, q),
            None => (rest, ""),
        };
        let (netloc, path) = match rest.strip_prefix("//") {
            Some(after) => match after.find('/') {
                Some(idx) => (&after[..idx], &after[idx..]),
                None => (after, ""),
            },
            None => ("", rest),
        };

        let exchange = path
            .strip_prefix('/')
            .and_then(|p| p.split('/').next())
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .or(default_exchange);

        Ok(Self {
            transport: Some(scheme.to_string()),
            exchange,
            hosts: parse_hosts(netloc),
            parameters: parse_query(query),
        })
    }
}

/// Exchange named by `url`, or `default_exchange` when it names none.
pub fn exchange_from_url(
    url: &str,
    default_exchange: Option<&str>,
) -> Result<Option<String>, UrlError> {
    Ok(TransportUrl::parse(url, default_exchange)?.exchange)
}

fn split_scheme(url: &str) -> Result<(&str, &str), UrlError> {
    let missing = || UrlError::MissingScheme(url.to_string());
    let (scheme, rest) = url.split_once(':').ok_or_else(missing)?;
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !valid {
        return Err(missing());
    }
    Ok((scheme, rest))
}

fn parse_hosts(netloc: &str) -> Vec<TransportHost> {
    let mut hosts = Vec::new();
    let mut username = String::new();
    let mut password = String::new();

    for entry in netloc.split(',') {
        if entry.is_empty() {
            continue;
        }
        let mut host = entry;
        if let Some((creds, h)) = entry.split_once('@') {
            host = h;
            match creds.split_once(':') {
                Some((user, pass)) => {
                    username = user.to_string();
                    password = pass.to_string();
                }
                None => username = creds.to_string(),
            }
        }
        hosts.push(TransportHost {
            host: host.to_string(),
            username: username.clone(),
            password: password.clone(),
        });
    }
    hosts
}

/// `a=1&a=2&b=x` -> `{a: [1, 2], b: [x]}`. Pairs without `=` and blank
/// values are dropped. Malformed escapes such as `%zz` are kept as text.
fn parse_query(query: &str) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in ::url::form_urlencoded::parse(query.as_bytes()) {
        if value.is_empty() {
            continue;
        }
        params
            .entry(name.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

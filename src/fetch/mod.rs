//! HTTP seam shared by the backend client and the upstream map-data fetcher.

mod basic;
mod client;
pub mod auth;

#[cfg(test)]
pub(crate) mod fake;

pub use basic::BasicClient;
pub use client::HttpClient;

use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Method, Request, Url};

use crate::error::{SyncError, SyncResult};

fn parse_url(url: &str) -> SyncResult<Url> {
    url.parse()
        .map_err(|e| SyncError::Network(format!("invalid url {url}: {e}")))
}

/// A bare GET request for `url`.
pub fn get(url: &str) -> SyncResult<Request> {
    Ok(Request::new(Method::GET, parse_url(url)?))
}

/// A GET request for `base` with each of `segments` appended as one
/// percent-encoded path segment.
pub fn get_with_segments(base: &str, segments: &[&str]) -> SyncResult<Request> {
    let mut url = parse_url(base)?;
    url.path_segments_mut()
        .map_err(|_| SyncError::Network(format!("url {base} cannot take a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(Request::new(Method::GET, url))
}

/// A GET request with `query` appended as url-encoded pairs.
pub fn get_with_query(url: &str, query: &[(&str, String)]) -> SyncResult<Request> {
    let mut url = parse_url(url)?;
    url.query_pairs_mut()
        .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
    Ok(Request::new(Method::GET, url))
}

/// A POST with an `application/x-www-form-urlencoded` body.
pub fn post_form(url: &str, fields: &[(&str, &str)]) -> SyncResult<Request> {
    let mut req = Request::new(Method::POST, parse_url(url)?);
    req.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    *req.body_mut() = Some(form_body(fields).into());
    Ok(req)
}

fn form_body(fields: &[(&str, &str)]) -> String {
    let Ok(mut encoder) = Url::parse("http://form.invalid/") else {
        return String::new();
    };
    encoder.query_pairs_mut().extend_pairs(fields.iter().copied());
    encoder.query().unwrap_or_default().to_string()
}

/// Executes `req` and returns the body text of a successful response.
pub async fn fetch_text<C: HttpClient + ?Sized>(client: &C, req: Request) -> SyncResult<String> {
    let resp = client.execute(req).await?;
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        let excerpt: String = body.chars().take(300).collect();
        return Err(SyncError::Network(format!("{status}: {excerpt}")));
    }
    Ok(body)
}

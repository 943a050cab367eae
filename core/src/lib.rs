#![cfg_attr(docsrs, feature(doc_cfg))]

//! Core types shared by the DAP interoperability test runner: task identifiers and secrets, the
//! plaintext reference model of each aggregation scheme, time helpers and retry parameters.

use url::Url;

pub mod retries;
pub mod task;
#[cfg(feature = "test-util")]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod test_util;
pub mod time;
pub mod vdaf;

/// Returns the given [`Url`], possibly modified to end with a slash.
///
/// Base URLs of interop API endpoints should end with a slash if they will be used with
/// [`Url::join`], because that method will drop the last path component of the base URL if it
/// does not end with a slash.
pub fn url_ensure_trailing_slash(mut url: Url) -> Url {
    if !url.as_str().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    url
}

/// Choose aws-lc-rs as the default rustls crypto provider. HTTP clients built with the workspace's
/// reqwest configuration fail at construction time unless a provider has been installed.
pub fn initialize_rustls() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

#[cfg(test)]
mod tests {
    use crate::url_ensure_trailing_slash;
    use url::Url;

    #[test]
    fn trailing_slash() {
        assert_eq!(
            url_ensure_trailing_slash(Url::parse("http://dap-leader-abc:8080").unwrap()).as_str(),
            "http://dap-leader-abc:8080/"
        );
        assert_eq!(
            url_ensure_trailing_slash(Url::parse("http://127.0.0.1:1234/prefix").unwrap()).as_str(),
            "http://127.0.0.1:1234/prefix/"
        );
        assert_eq!(
            url_ensure_trailing_slash(Url::parse("http://127.0.0.1:1234/prefix/").unwrap())
                .as_str(),
            "http://127.0.0.1:1234/prefix/"
        );
    }
}

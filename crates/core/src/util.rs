use url::Url;

pub trait UrlExt {
    /// The URL without its query string, fragment or credentials.
    ///
    /// Log download URLs carry a signed token in the query, so this is the only form
    /// that may appear in logs or error messages.
    fn redacted(&self) -> String;
}

impl UrlExt for Url {
    #[inline]
    fn redacted(&self) -> String {
        let mut out = self.clone();
        out.set_query(None);
        out.set_fragment(None);
        let _ = out.set_username("");
        let _ = out.set_password(None);
        out.to_string()
    }
}

/// Format a size in bytes to a human-readable string.
/// Uses SI (kilo = 1000) units, formatted to two decimal places.
pub fn size(value: u64) -> String {
    let units = ["B", "kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];
    let mut value = value as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < units.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.2} {}", value, units[unit])
}

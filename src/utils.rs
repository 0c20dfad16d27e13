use url::Url;

/// Image search result links carry the real image in an `imgurl` query
/// parameter; unwrap it when present and valid.
pub fn image_url(url: &Url) -> Url {
    url.query_pairs()
        .find(|(name, _)| name == "imgurl")
        .and_then(|(_, value)| Url::parse(&value).ok())
        .unwrap_or_else(|| url.clone())
}

/// Parses a dropped or typed source and resolves it to the image it points at.
pub fn parse_source(input: &str) -> Result<Url, url::ParseError> {
    Url::parse(input.trim()).map(|url| image_url(&url))
}

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

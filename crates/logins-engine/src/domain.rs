use url::{Host, Url};

/// Registrable domain of an origin, approximated as the last two labels of
/// its host. IP literals and single-label hosts are returned whole.
///
/// Accepts full origins (`https://www.example.com:8443`) and bare hosts
/// (`www.example.com`). Returns `None` when no host can be found.
pub fn base_domain(origin: &str) -> Option<String> {
    let origin = origin.trim();
    let url = match Url::parse(origin) {
        Ok(url) if url.host().is_some() => url,
        _ => Url::parse(&format!("https://{origin}")).ok()?,
    };

    match url.host()? {
        Host::Domain(domain) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            let labels: Vec<&str> = domain.split('.').filter(|l| !l.is_empty()).collect();
            if labels.len() <= 2 {
                Some(labels.join("."))
            } else {
                Some(labels[labels.len() - 2..].join("."))
            }
        }
        Host::Ipv4(ip) => Some(ip.to_string()),
        Host::Ipv6(ip) => Some(format!("[{ip}]")),
    }
}

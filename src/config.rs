use std::{env, path::{Path, PathBuf}, time::Duration};

use confique::Config as _;
use serde::{Deserialize, Deserializer};
use hyper::{Uri, http::uri::{Authority, PathAndQuery, Scheme}};

use crate::{
    auth::AuthConfig,
    log::LogConfig,
    prelude::*,
    scenario::ScenarioConfig,
    swarm::{LoadConfig, TargetConfig},
};


/// Environment variable that can point to the config file.
pub const CONFIG_PATH_ENV: &str = "KAWA_LOADTEST_CONFIG";

/// Locations searched (in order) if no path is given explicitly.
const DEFAULT_PATHS: &[&str] = &["config.toml"];


/// Finds the config file to use. If `explicit` is given, that is returned
/// as is. Otherwise `KAWA_LOADTEST_CONFIG` and then the default locations are
/// tried. Returns `None` if no file is found.
pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(p) => Some(p.to_owned()),
        None => env::var_os(CONFIG_PATH_ENV).map(PathBuf::from).or_else(|| {
            DEFAULT_PATHS.iter().map(PathBuf::from).find(|p| p.exists())
        }),
    }
}

/// Loads the configuration from `path`, or only from defaults if `None`.
pub fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config file '{}'", path.display())),
        None => Config::builder().load().context("failed to build default configuration"),
    }
}

pub fn template() -> String {
    let mut options = confique::toml::FormatOptions::default();
    options.general.nested_field_gap = 2;
    confique::toml::template::<Config>(options)
}

#[derive(Debug, confique::Config)]
pub struct Config {
    #[config(nested)]
    pub auth: AuthConfig,

    #[config(nested)]
    pub target: TargetConfig,

    #[config(nested)]
    pub scenario: ScenarioConfig,

    #[config(nested)]
    pub load: LoadConfig,

    #[config(nested)]
    pub log: LogConfig,
}


/// Scheme and authority of an HTTP(S) server, without any path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct HttpHost {
    pub scheme: Scheme,
    pub authority: Authority,
}

impl HttpHost {
    pub fn with_path_and_query(&self, pq: PathAndQuery) -> Uri {
        Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(pq)
            .build()
            .expect("scheme, authority and path are all valid")
    }
}

impl std::fmt::Display for HttpHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}

impl std::str::FromStr for HttpHost {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl TryFrom<String> for HttpHost {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let uri: Uri = s.parse().map_err(|e| format!("invalid URI: {e}"))?;
        let parts = uri.into_parts();

        let scheme = parts.scheme.ok_or("URI must contain a scheme")?;
        if scheme != Scheme::HTTP && scheme != Scheme::HTTPS {
            return Err("scheme must be 'http' or 'https'".into());
        }
        let authority = parts.authority.ok_or("URI must contain a host")?;
        if authority.as_str().contains('@') {
            return Err("must not contain user part".into());
        }
        if parts.path_and_query.is_some_and(|pq| pq.as_str() != "/") {
            return Err("must not contain a path or query".into());
        }

        Ok(Self { scheme, authority })
    }
}

/// Absolute HTTP(S) URL, e.g. of the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct HttpUrl(pub Uri);

impl std::fmt::Display for HttpUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for HttpUrl {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let uri: Uri = s.parse().map_err(|e| format!("invalid URI: {e}"))?;
        match uri.scheme() {
            Some(scheme) if *scheme == Scheme::HTTP || *scheme == Scheme::HTTPS => {}
            _ => return Err("must be an http:// or https:// URL".into()),
        }
        match uri.authority() {
            None => return Err("must have authority part".into()),
            Some(authority) if authority.as_str().contains('@')
                => return Err("must not contain user part".into()),
            _ => {}
        }
        if s.contains('#') {
            return Err("must not contain fragment part (#...)".into());
        }

        Ok(Self(uri))
    }
}

/// Custom format for durations. We allow a couple useful units and required
/// a unit to increase readability of config files.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where D: Deserializer<'de>,
{
    use serde::de::Error;

    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(D::Error::custom)
}

/// Parses durations like `150ms`, `5s` or `2min`. A unit-less `0` is allowed.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let start_unit = s.find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| "no time unit for duration".to_owned())?;
    let (num, unit) = s.split_at(start_unit);
    let num: u32 = num.parse()
        .map_err(|e| format!("invalid integer for duration: {}", e))?;
    let num: u64 = num.into();

    match unit {
        "ms" => Ok(Duration::from_millis(num)),
        "s" => Ok(Duration::from_secs(num)),
        "min" => Ok(Duration::from_secs(num * 60)),
        "h" => Ok(Duration::from_secs(num * 60 * 60)),
        "d" => Ok(Duration::from_secs(num * 60 * 60 * 24)),
        _ => Err("invalid unit of time for duration".into()),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_built_in_scenario() {
        let config = Config::builder().load().unwrap();

        assert_eq!(
            config.auth.token_url.to_string(),
            "http://localhost/auth/realms/paye-ton-kawa/protocol/openid-connect/token",
        );
        assert_eq!(config.auth.client_id, "gateway");
        assert_eq!(config.auth.username, "admin");
        assert_eq!(config.auth.password, "admin");
        assert!(!config.auth.require_token);

        assert_eq!(config.target.host.to_string(), "http://localhost");
        assert_eq!(config.target.request_timeout, Duration::ZERO);

        assert_eq!(config.scenario.weights.get_products, 2);
        assert_eq!(config.scenario.weights.get_customers, 1);
        assert_eq!(config.scenario.weights.create_order, 1);
        assert_eq!(config.scenario.wait_min, Duration::from_secs(1));
        assert_eq!(config.scenario.wait_max, Duration::from_secs(5));
        assert_eq!(config.scenario.order.customer_id, 1);
        assert_eq!(config.scenario.order.product_id, 1);
        assert_eq!(config.scenario.order.quantity, 2);
    }

    #[test]
    fn template_mentions_every_section() {
        let template = template();
        for section in ["[auth]", "[target]", "[scenario]", "[scenario.order]", "[load]", "[log]"] {
            assert!(template.contains(section), "missing {section}");
        }
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("0"), Ok(Duration::ZERO));
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("5s"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration("2min"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("5 s").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("3weeks").is_err());
    }

    #[test]
    fn http_host() {
        let host = HttpHost::try_from("https://api.example.com:8443".to_owned()).unwrap();
        assert_eq!(
            host.with_path_and_query(PathAndQuery::from_static("/api/order/orders")).to_string(),
            "https://api.example.com:8443/api/order/orders",
        );
        assert!(HttpHost::try_from("http://localhost/".to_owned()).is_ok());
        assert!(HttpHost::try_from("localhost".to_owned()).is_err());
        assert!(HttpHost::try_from("ftp://localhost".to_owned()).is_err());
        assert!(HttpHost::try_from("http://localhost/api".to_owned()).is_err());
        assert!(HttpHost::try_from("http://user@localhost".to_owned()).is_err());
    }

    #[test]
    fn http_url() {
        assert!(HttpUrl::try_from("http://localhost/auth/token".to_owned()).is_ok());
        assert!(HttpUrl::try_from("/auth/token".to_owned()).is_err());
        assert!(HttpUrl::try_from("http://localhost/token#frag".to_owned()).is_err());
        assert!(HttpUrl::try_from("http://a:b@localhost/token".to_owned()).is_err());
    }
}

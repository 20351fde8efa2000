use std::{fmt, marker::PhantomData, str::FromStr, time::Duration};

use ascii::AsciiString;
use duration_str::deserialize_option_duration;
use url::Url;

/// CORS rules applied in front of the transports.
#[derive(Clone, Default, Debug, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Whether credentials are allowed in cross-origin requests.
    pub allow_credentials: bool,
    /// Origins allowed to make cross-origin requests. Entries may be globs.
    pub allow_origins: Option<AnyOrUrlArray>,
    /// How long a preflight response may be cached.
    #[serde(deserialize_with = "deserialize_option_duration")]
    pub max_age: Option<Duration>,
    /// Allowed request methods.
    pub allow_methods: Option<AnyOrHttpMethodArray>,
    /// Allowed request headers.
    pub allow_headers: Option<AnyOrAsciiStringArray>,
    /// Response headers exposed to the browser. `Mcp-Session-Id` belongs here.
    pub expose_headers: Option<AnyOrAsciiStringArray>,
}

/// HTTP methods the CORS rules can name.
#[derive(Debug, PartialEq, Clone, Copy, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[allow(missing_docs)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
    Options,
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "DELETE" => Ok(HttpMethod::Delete),
            "OPTIONS" => Ok(HttpMethod::Options),
            _ => Err(format!("Unsupported HTTP method: {s}")),
        }
    }
}

impl From<HttpMethod> for http::Method {
    fn from(value: HttpMethod) -> Self {
        match value {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Delete => http::Method::DELETE,
            HttpMethod::Options => http::Method::OPTIONS,
        }
    }
}

/// `"*"` or a list of URLs.
pub type AnyOrUrlArray = AnyOrArray<Url>;

/// `"*"` or a list of HTTP methods.
pub type AnyOrHttpMethodArray = AnyOrArray<HttpMethod>;

/// `"*"` or a list of ASCII strings.
pub type AnyOrAsciiStringArray = AnyOrArray<AsciiString>;

/// Either the wildcard `"*"` or an explicit list of values. A single non-wildcard
/// string is accepted as a one-element list.
#[derive(Clone, Debug, PartialEq)]
pub enum AnyOrArray<T> {
    /// The wildcard.
    Any,
    /// An explicit list.
    Explicit(Vec<T>),
}

impl<'de, T> serde::Deserialize<'de> for AnyOrArray<T>
where
    T: serde::Deserialize<'de> + FromStr<Err: fmt::Display>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor<T>(PhantomData<T>);

        impl<'de, T> serde::de::Visitor<'de> for Visitor<T>
        where
            T: serde::Deserialize<'de> + FromStr<Err: fmt::Display>,
        {
            type Value = AnyOrArray<T>;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("the string \"*\" or an array of values")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if value == "*" {
                    return Ok(AnyOrArray::Any);
                }

                value
                    .parse::<T>()
                    .map(|value| AnyOrArray::Explicit(vec![value]))
                    .map_err(E::custom)
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut values = Vec::new();

                while let Some(value) = seq.next_element()? {
                    values.push(value);
                }

                Ok(AnyOrArray::Explicit(values))
            }
        }

        deserializer.deserialize_any(Visitor(PhantomData))
    }
}

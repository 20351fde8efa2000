use config::{AnyOrAsciiStringArray, AnyOrHttpMethodArray, AnyOrUrlArray, CorsConfig};
use http::{HeaderName, HeaderValue};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders};

pub(super) fn generate(
    CorsConfig {
        allow_credentials,
        allow_origins,
        max_age,
        allow_methods,
        allow_headers,
        expose_headers,
    }: &CorsConfig,
) -> CorsLayer {
    let mut cors_layer = CorsLayer::new().allow_credentials(*allow_credentials);

    if let Some(allow_origins) = allow_origins {
        cors_layer = cors_layer.allow_origin(match allow_origins {
            AnyOrUrlArray::Any => AllowOrigin::any(),
            AnyOrUrlArray::Explicit(origins) => {
                let mut constants = Vec::new();
                let mut globs = Vec::new();

                for origin in origins {
                    let origin = &origin[..url::Position::BeforePath];

                    if origin.chars().any(|c| "?*[]{}!\\".contains(c)) {
                        globs.push(origin.to_owned());
                    } else {
                        match HeaderValue::from_str(origin) {
                            Ok(value) => constants.push(value),
                            Err(_) => log::warn!("Ignoring CORS origin that is not a valid header value: {origin}"),
                        }
                    }
                }

                if globs.is_empty() {
                    AllowOrigin::list(constants)
                } else {
                    AllowOrigin::predicate(move |origin, _| -> bool {
                        if constants.iter().any(|constant| origin == constant) {
                            return true;
                        }

                        let Ok(origin) = origin.to_str() else {
                            return false;
                        };

                        globs.iter().any(|glob| fast_glob::glob_match(glob, origin))
                    })
                }
            }
        });
    }

    if let Some(max_age) = max_age {
        cors_layer = cors_layer.max_age(*max_age);
    }

    if let Some(allow_methods) = allow_methods {
        cors_layer = cors_layer.allow_methods(match allow_methods {
            AnyOrHttpMethodArray::Any => AllowMethods::any(),
            AnyOrHttpMethodArray::Explicit(methods) => {
                let mut methods: Vec<http::Method> = methods.iter().map(|method| http::Method::from(*method)).collect();

                // Preflights must always pass.
                if !methods.contains(&http::Method::OPTIONS) {
                    methods.push(http::Method::OPTIONS);
                }

                AllowMethods::list(methods)
            }
        });
    }

    if let Some(allow_headers) = allow_headers {
        cors_layer = cors_layer.allow_headers(match allow_headers {
            AnyOrAsciiStringArray::Any => AllowHeaders::any(),
            AnyOrAsciiStringArray::Explicit(headers) => AllowHeaders::list(header_names(headers)),
        });
    }

    if let Some(expose_headers) = expose_headers {
        cors_layer = cors_layer.expose_headers(match expose_headers {
            AnyOrAsciiStringArray::Any => ExposeHeaders::any(),
            AnyOrAsciiStringArray::Explicit(headers) => ExposeHeaders::list(header_names(headers)),
        });
    }

    cors_layer
}

fn header_names<H: AsRef<str>>(headers: &[H]) -> Vec<HeaderName> {
    headers
        .iter()
        .map(AsRef::as_ref)
        .filter_map(|header| match HeaderName::from_bytes(header.as_bytes()) {
            Ok(name) => Some(name),
            Err(_) => {
                log::warn!("Ignoring invalid CORS header name: {header}");
                None
            }
        })
        .collect()
}

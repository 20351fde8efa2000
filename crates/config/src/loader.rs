use std::{fmt::Write, path::Path, str::FromStr};

use anyhow::{Context, bail};
use serde::Deserialize;
use serde_dynamic_string::DynamicString;
use toml::Value;

use crate::Config;

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();

    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read configuration at {}", path.display()))?;

    let mut raw_config: Value = toml::from_str(&content)?;
    expand_dynamic_strings(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate(&config)?;

    let connectors: usize = config.tenants.values().map(|tenant| tenant.connectors.len()).sum();

    log::debug!(
        "Loaded configuration from {} with {} tenant(s) and {connectors} connector(s)",
        path.display(),
        config.tenants.len(),
    );

    if config.tenants.is_empty() {
        log::warn!("No tenants configured, every transport request will be rejected");
    }

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    let gateway = &config.gateway;

    if !gateway.path.starts_with('/') {
        bail!("gateway.path must start with '/', got '{}'", gateway.path);
    }

    if let Some(stats_path) = &gateway.stats_path
        && !stats_path.starts_with('/')
    {
        bail!("gateway.stats_path must start with '/', got '{stats_path}'");
    }

    if gateway.pool.max_size == 0 {
        bail!("gateway.pool.max_size must be at least 1");
    }

    if gateway.events.capacity == 0 {
        bail!("gateway.events.capacity must be at least 1");
    }

    if gateway.sse.channel_capacity == 0 {
        bail!("gateway.sse.channel_capacity must be at least 1");
    }

    for (tenant_id, tenant) in &config.tenants {
        for (connector_id, connector) in &tenant.connectors {
            if connector.cmd.is_some() && connector.url.is_some() {
                bail!("Connector '{tenant_id}.{connector_id}' sets both 'cmd' and 'url', choose one downstream");
            }

            if connector.cmd.as_ref().is_some_and(|cmd| cmd.is_empty()) {
                bail!("Connector '{tenant_id}.{connector_id}' has an empty 'cmd'");
            }

            if connector.credential_env.is_some() && connector.cmd.is_none() {
                bail!("Connector '{tenant_id}.{connector_id}' sets 'credential_env' without a stdio 'cmd'");
            }
        }
    }

    Ok(())
}

fn expand_dynamic_strings<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => match DynamicString::<String>::from_str(s) {
            Ok(out) => *s = out.into_inner(),
            Err(err) => {
                let mut p = String::new();

                for segment in path.iter() {
                    match segment {
                        Ok(key) => {
                            if !p.is_empty() {
                                p.push('.');
                            }

                            p.push_str(key);
                        }
                        Err(i) => write!(p, "[{i}]")?,
                    }
                }

                bail!("Failed to expand dynamic string at path '{p}': {err}");
            }
        },
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}
